// Stem source backend abstraction
// Caller-owned handle over the separation backend: Passthrough (built in),
// Demucs and SAM Audio (external models, not available in this crate)

use std::collections::BTreeMap;
use thiserror::Error;

use crate::audio::AudioBuffer;

/// Name of the single stem produced by the passthrough backend
pub const MIX_STEM: &str = "mix";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparationBackend {
    /// No separation: the mix is processed as one stem
    Passthrough,

    /// Demucs neural separation (external)
    Demucs,

    /// SAM Audio prompt-based separation (external)
    SamAudio,
}

#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("Backend not implemented: {0:?}")]
    BackendNotImplemented(SeparationBackend),

    #[error("Model context already torn down")]
    TornDown,
}

/// Explicit init/teardown handle for whatever separation model is in use
pub struct ModelContext {
    backend: SeparationBackend,
    active: bool,
}

impl ModelContext {
    pub fn new(backend: SeparationBackend) -> Result<Self, SeparationError> {
        match backend {
            SeparationBackend::Passthrough => {
                log::debug!("Model context ready: {:?}", backend);
                Ok(ModelContext {
                    backend,
                    active: true,
                })
            }
            SeparationBackend::Demucs | SeparationBackend::SamAudio => {
                Err(SeparationError::BackendNotImplemented(backend))
            }
        }
    }

    pub fn backend(&self) -> SeparationBackend {
        self.backend
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Split a mix into named stems
    pub fn separate(&self, mix: &AudioBuffer) -> Result<BTreeMap<String, AudioBuffer>, SeparationError> {
        if !self.active {
            return Err(SeparationError::TornDown);
        }

        match self.backend {
            SeparationBackend::Passthrough => {
                let mut stems = BTreeMap::new();
                stems.insert(MIX_STEM.to_string(), mix.clone());
                Ok(stems)
            }
            other => Err(SeparationError::BackendNotImplemented(other)),
        }
    }

    /// Release the backend; later calls to `separate` fail
    pub fn teardown(&mut self) {
        if self.active {
            log::debug!("Model context torn down: {:?}", self.backend);
        }
        self.active = false;
    }
}
