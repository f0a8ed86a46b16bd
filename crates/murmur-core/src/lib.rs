//! Murmur Core - TTS Model Lifecycle and Synthesis Engine
//!
//! This crate owns the model registry (load/unload lifecycle with
//! memory accounting), the synthesis dispatcher (clone, control, and
//! design modes), the in-memory event log, and the inference backend
//! abstraction. The HTTP surface lives in `murmur-server`.
//!
//! # Example
//!
//! ```ignore
//! use murmur_core::{EventLog, ModelRegistry, ModelVariant};
//! use murmur_core::backend::tone::ToneBackend;
//! use std::sync::Arc;
//!
//! let events = Arc::new(EventLog::new(256));
//! let registry = ModelRegistry::new(Arc::new(ToneBackend::new()), events);
//! registry.load(ModelVariant::Base06B).await?;
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logbus;
pub mod memory;
pub mod registry;
pub mod synth;

pub use backend::{Synthesis, SynthesisParams, TtsBackend, VoiceModel};
pub use catalog::{parse_model_variant, Capability, Language, ModelVariant, Speaker};
pub use config::{BackendKind, ServerConfig};
pub use error::{Error, Result};
pub use logbus::{EventLog, LogLevel, LogRecord};
pub use memory::resident_memory_mb;
pub use registry::{GenerationPermit, LifecycleState, ModelRegistry, ModelRuntimeState};
pub use synth::{GenerationJob, SynthesisDispatcher};
