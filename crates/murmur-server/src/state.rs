//! Shared application state

use std::sync::Arc;

use murmur_core::backend::TtsBackend;
use murmur_core::{EventLog, ModelRegistry, ServerConfig, SynthesisDispatcher};

use crate::speaker_store::SpeakerStore;

/// Cheaply cloneable handle bundle; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub events: Arc<EventLog>,
    pub registry: Arc<ModelRegistry>,
    pub dispatcher: Arc<SynthesisDispatcher>,
    pub speakers: SpeakerStore,
}

impl AppState {
    pub fn new(config: ServerConfig, backend: Arc<dyn TtsBackend>) -> anyhow::Result<Self> {
        let events = Arc::new(EventLog::new(config.log_channel_capacity));
        let registry = Arc::new(ModelRegistry::new(backend, events.clone()));
        let dispatcher = Arc::new(SynthesisDispatcher::new(registry.clone(), events.clone()));
        let speakers = SpeakerStore::open(config.data_dir.join("speakers"))?;

        Ok(Self {
            config: Arc::new(config),
            events,
            registry,
            dispatcher,
            speakers,
        })
    }
}
