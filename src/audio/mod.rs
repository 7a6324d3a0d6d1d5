pub mod conditioner;
pub mod loader;

pub use conditioner::condition;
pub use loader::{load_bytes, load_path, MidSide, Pcm};
