pub mod dog;
pub mod pairing;
pub mod peaks;
pub mod scale;
pub mod stft;

pub use dog::Surfaces;
pub use peaks::Peak;
pub use scale::{ScaleUnit, ScaledSpectrogram};
pub use stft::Spectrogram;
