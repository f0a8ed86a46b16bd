//! Model variants, capability classes, and control-mode vocabulary

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The synthesis mode a model supports, determining which request
/// schema applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Voice cloning from a reference recording.
    Clone,
    /// Preset speakers with style instructions.
    ControlVoice,
    /// Free-form voice description.
    VoiceDesign,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::ControlVoice => "control_voice",
            Self::VoiceDesign => "voice_design",
        }
    }
}

/// Checkpoints known at startup. The catalog is static; identifiers
/// are the upstream repository ids the inference backend resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    /// 0.6B base model (voice cloning)
    #[serde(rename = "mlx-community/Qwen3-TTS-12Hz-0.6B-Base-bf16")]
    Base06B,
    /// 1.7B base model (voice cloning)
    #[serde(rename = "mlx-community/Qwen3-TTS-12Hz-1.7B-Base-bf16")]
    Base17B,
    /// 0.6B custom voice model (control mode)
    #[serde(rename = "mlx-community/Qwen3-TTS-12Hz-0.6B-CustomVoice-bf16")]
    CustomVoice06B,
    /// 1.7B custom voice model (control mode)
    #[serde(rename = "mlx-community/Qwen3-TTS-12Hz-1.7B-CustomVoice-bf16")]
    CustomVoice17B,
    /// 1.7B voice design model; the single checkpoint serving design
    /// requests
    #[serde(rename = "mlx-community/Qwen3-TTS-12Hz-1.7B-VoiceDesign-bf16")]
    VoiceDesign17B,
}

impl ModelVariant {
    /// Opaque stable identity used on the wire and by the backend.
    pub fn model_id(&self) -> &'static str {
        match self {
            Self::Base06B => "mlx-community/Qwen3-TTS-12Hz-0.6B-Base-bf16",
            Self::Base17B => "mlx-community/Qwen3-TTS-12Hz-1.7B-Base-bf16",
            Self::CustomVoice06B => "mlx-community/Qwen3-TTS-12Hz-0.6B-CustomVoice-bf16",
            Self::CustomVoice17B => "mlx-community/Qwen3-TTS-12Hz-1.7B-CustomVoice-bf16",
            Self::VoiceDesign17B => "mlx-community/Qwen3-TTS-12Hz-1.7B-VoiceDesign-bf16",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Base06B => "Qwen3-TTS 0.6B Base",
            Self::Base17B => "Qwen3-TTS 1.7B Base",
            Self::CustomVoice06B => "Qwen3-TTS 0.6B CustomVoice",
            Self::CustomVoice17B => "Qwen3-TTS 1.7B CustomVoice",
            Self::VoiceDesign17B => "Qwen3-TTS 1.7B VoiceDesign",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Base06B | Self::Base17B => Capability::Clone,
            Self::CustomVoice06B | Self::CustomVoice17B => Capability::ControlVoice,
            Self::VoiceDesign17B => Capability::VoiceDesign,
        }
    }

    /// Design requests always target this checkpoint; there is no
    /// per-request model selection in design mode.
    pub fn design_model() -> Self {
        Self::VoiceDesign17B
    }

    /// All catalog entries, in listing order.
    pub fn all() -> &'static [ModelVariant] {
        &[
            Self::Base06B,
            Self::Base17B,
            Self::CustomVoice06B,
            Self::CustomVoice17B,
            Self::VoiceDesign17B,
        ]
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.model_id())
    }
}

/// Parse a model identifier by full repo id or its tail after the
/// owner prefix.
pub fn parse_model_variant(s: &str) -> Result<ModelVariant> {
    let trimmed = s.trim();
    for variant in ModelVariant::all() {
        if trimmed == variant.model_id() {
            return Ok(*variant);
        }
        if let Some(tail) = variant.model_id().rsplit('/').next() {
            if trimmed == tail {
                return Ok(*variant);
            }
        }
    }
    Err(Error::UnknownModel(trimmed.to_string()))
}

/// Languages accepted by the control and design modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Chinese,
    English,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chinese => "Chinese",
            Self::English => "English",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chinese" | "zh" => Some(Self::Chinese),
            "english" | "en" => Some(Self::English),
            _ => None,
        }
    }
}

/// Preset speakers for the control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    Vivian,
    Serena,
    UncleFu,
    Dylan,
    Eric,
    Ryan,
    Aiden,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vivian => "Vivian",
            Self::Serena => "Serena",
            Self::UncleFu => "Uncle_Fu",
            Self::Dylan => "Dylan",
            Self::Eric => "Eric",
            Self::Ryan => "Ryan",
            Self::Aiden => "Aiden",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vivian" => Some(Self::Vivian),
            "serena" => Some(Self::Serena),
            "uncle_fu" | "uncle fu" => Some(Self::UncleFu),
            "dylan" => Some(Self::Dylan),
            "eric" => Some(Self::Eric),
            "ryan" => Some(Self::Ryan),
            "aiden" => Some(Self::Aiden),
            _ => None,
        }
    }

    /// Dialect voices only speak Chinese; the rest accept both
    /// catalog languages.
    pub fn supports(&self, language: Language) -> bool {
        match self {
            Self::UncleFu | Self::Dylan | Self::Eric => language == Language::Chinese,
            Self::Vivian | Self::Serena | Self::Ryan | Self::Aiden => {
                matches!(language, Language::Chinese | Language::English)
            }
        }
    }

    pub fn all() -> &'static [Speaker] {
        &[
            Self::Vivian,
            Self::Serena,
            Self::UncleFu,
            Self::Dylan,
            Self::Eric,
            Self::Ryan,
            Self::Aiden,
        ]
    }
}
