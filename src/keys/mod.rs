pub mod extract;
pub mod pack;

pub use extract::{extract_keys_for_track, group_times_by_key, ExtractedTrack};
pub use pack::{derive_version, pack_key, shard_for_key, unpack_key, Key, KeyWithTime};
