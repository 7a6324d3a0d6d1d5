pub mod builder;
pub mod postings;
pub mod store;

pub use builder::{build_index, ingest_track, TrackSource, TrackStats};
pub use postings::{encode_posting_block, parse_posting_blocks, PostingAnchor, PostingIter};
pub use store::{OpenMode, ShardedStore};
