//! Opaque inference capability
//!
//! The registry and dispatcher are written once against these traits;
//! implementations differ per accelerator backend. An unload must
//! trigger the backend's cache/GC hooks so resident memory actually
//! drops; dropping a reference without forcing collection does not
//! satisfy the contract.

pub mod sidecar;
pub mod tone;

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::ModelVariant;
use crate::error::Result;

/// Mode-specific synthesis parameters, validated by the dispatcher
/// before they reach a backend.
#[derive(Debug, Clone)]
pub enum SynthesisParams {
    Clone {
        text: String,
        ref_audio_path: PathBuf,
        ref_text: Option<String>,
    },
    Control {
        text: String,
        speaker: String,
        language: String,
        instruct: Option<String>,
    },
    Design {
        text: String,
        language: String,
        instruct: String,
    },
}

impl SynthesisParams {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Clone { .. } => "clone",
            Self::Control { .. } => "control",
            Self::Design { .. } => "design",
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Clone { text, .. }
            | Self::Control { text, .. }
            | Self::Design { text, .. } => text,
        }
    }
}

/// Raw synthesis output before container encoding.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A loaded checkpoint. Exclusively owned by its registry entry; the
/// only other holder is a generation permit for the duration of one
/// synthesis call.
pub trait VoiceModel: Send + Sync {
    /// Blocking inference. May run from seconds to tens of minutes.
    fn synthesize(&self, params: &SynthesisParams) -> Result<Synthesis>;
}

/// Backend-specific load/unload capability.
pub trait TtsBackend: Send + Sync + 'static {
    /// Resolve and load a checkpoint. Blocking.
    fn load(&self, variant: ModelVariant) -> Result<Arc<dyn VoiceModel>>;

    /// Release a checkpoint, including backend cache/GC hooks. The
    /// registry guarantees `model` is the last live reference.
    fn unload(&self, variant: ModelVariant, model: Arc<dyn VoiceModel>) -> Result<()>;
}
