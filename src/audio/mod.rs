// Audio processing module
// Sample buffers, WAV boundary and shared spectral features

pub mod buffer;
pub mod features;
pub mod wav;

pub use buffer::AudioBuffer;
pub use features::{onset_strength_envelope, EnvelopeConfig, OnsetEnvelope, SpectrumAnalyzer};
pub use wav::{decode_wav, encode_wav, read_wav, write_wav, AudioError};
