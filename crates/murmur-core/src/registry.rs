//! Model lifecycle registry
//!
//! Owns the map of catalog entries to lifecycle state and the loaded
//! handle, serializes load/unload per model, and records memory
//! deltas around every transition. Two distinct models may load,
//! unload, or generate fully in parallel; operations on the same
//! model never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::backend::{TtsBackend, VoiceModel};
use crate::catalog::ModelVariant;
use crate::error::{Error, Result};
use crate::logbus::{EventLog, LogLevel};
use crate::memory;

/// Residency of a model in memory. `Error` is never terminal; a fresh
/// load re-enters the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Error,
}

/// Snapshot of one registry entry. Copies only; never a live
/// reference to internal state.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRuntimeState {
    pub variant: ModelVariant,
    pub state: LifecycleState,
    pub memory_before_mb: Option<f64>,
    pub memory_after_mb: Option<f64>,
    pub memory_delta_mb: Option<f64>,
    pub load_time_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl ModelRuntimeState {
    fn new(variant: ModelVariant) -> Self {
        Self {
            variant,
            state: LifecycleState::Unloaded,
            memory_before_mb: None,
            memory_after_mb: None,
            memory_delta_mb: None,
            load_time_seconds: None,
            error_message: None,
        }
    }
}

struct ModelEntry {
    info: ModelRuntimeState,
    // Present iff info.state == Loaded.
    handle: Option<Arc<dyn VoiceModel>>,
}

/// Holds the generation lock for one model for the duration of one
/// synthesis call, along with the handle it runs against. While a
/// permit is live, unload of that model fails with `Busy`.
pub struct GenerationPermit {
    model: Arc<dyn VoiceModel>,
    _guard: OwnedMutexGuard<()>,
}

impl GenerationPermit {
    pub fn model(&self) -> &Arc<dyn VoiceModel> {
        &self.model
    }
}

pub struct ModelRegistry {
    backend: Arc<dyn TtsBackend>,
    events: Arc<EventLog>,
    entries: RwLock<HashMap<ModelVariant, ModelEntry>>,
    // Both lock maps are created eagerly for every catalog entry so
    // there is no race on lock creation itself.
    transition_locks: HashMap<ModelVariant, Arc<Mutex<()>>>,
    generation_locks: HashMap<ModelVariant, Arc<Mutex<()>>>,
}

impl ModelRegistry {
    pub fn new(backend: Arc<dyn TtsBackend>, events: Arc<EventLog>) -> Self {
        let mut entries = HashMap::new();
        let mut transition_locks = HashMap::new();
        let mut generation_locks = HashMap::new();
        for variant in ModelVariant::all() {
            entries.insert(
                *variant,
                ModelEntry {
                    info: ModelRuntimeState::new(*variant),
                    handle: None,
                },
            );
            transition_locks.insert(*variant, Arc::new(Mutex::new(())));
            generation_locks.insert(*variant, Arc::new(Mutex::new(())));
        }

        Self {
            backend,
            events,
            entries: RwLock::new(entries),
            transition_locks,
            generation_locks,
        }
    }

    /// Instantaneous snapshot of every catalog entry, in catalog
    /// order. Always available and non-blocking relative to
    /// transitions in flight.
    pub async fn list(&self) -> Vec<ModelRuntimeState> {
        let entries = self.entries.read().await;
        ModelVariant::all()
            .iter()
            .filter_map(|v| entries.get(v).map(|e| e.info.clone()))
            .collect()
    }

    /// Snapshot of one entry.
    pub async fn get(&self, variant: ModelVariant) -> Result<ModelRuntimeState> {
        let entries = self.entries.read().await;
        entries
            .get(&variant)
            .map(|e| e.info.clone())
            .ok_or_else(|| Error::UnknownModel(variant.model_id().to_string()))
    }

    pub async fn loaded_count(&self) -> usize {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|e| e.info.state == LifecycleState::Loaded)
            .count()
    }

    /// Load a checkpoint. Fails fast with `Busy` when a transition is
    /// already in flight for this model rather than queueing.
    pub async fn load(&self, variant: ModelVariant) -> Result<ModelRuntimeState> {
        let model_id = variant.model_id();
        let lock = self
            .transition_locks
            .get(&variant)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;
        let _transition = lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy(model_id.to_string()))?;

        // With the transition lock held the entry can only be
        // Unloaded, Loaded, or Error here.
        {
            let mut entries = self.entries.write().await;
            let entry = entry_mut(&mut entries, variant)?;
            if entry.info.state == LifecycleState::Loaded {
                return Err(Error::AlreadyLoaded(model_id.to_string()));
            }
            entry.info.state = LifecycleState::Loading;
            entry.info.error_message = None;
        }

        self.events
            .append(LogLevel::Info, format!("Loading model: {model_id}"));

        let memory_before = memory::resident_memory_mb();
        self.events.append(
            LogLevel::Debug,
            format!("Memory before load: {}", memory::format_mb(memory_before)),
        );

        let started = Instant::now();
        let backend = self.backend.clone();
        // A panicking backend load must still land the entry in the
        // Error state, so join failures feed the failure arm below.
        let loaded = match tokio::task::spawn_blocking(move || backend.load(variant)).await {
            Ok(result) => result,
            Err(join_err) => Err(Error::Backend(format!("load task failed: {join_err}"))),
        };

        match loaded {
            Ok(model) => {
                let load_time = started.elapsed().as_secs_f64();
                let memory_after = memory::resident_memory_mb();
                let delta = zip_delta(memory_before, memory_after);

                let snapshot = {
                    let mut entries = self.entries.write().await;
                    let entry = entry_mut(&mut entries, variant)?;
                    entry.handle = Some(model);
                    entry.info.state = LifecycleState::Loaded;
                    entry.info.memory_before_mb = memory_before;
                    entry.info.memory_after_mb = memory_after;
                    entry.info.memory_delta_mb = delta;
                    entry.info.load_time_seconds = Some(load_time);
                    entry.info.clone()
                };

                self.events
                    .append(LogLevel::Info, "Model loaded successfully");
                self.events.append(
                    LogLevel::Debug,
                    format!(
                        "Memory after load: {} ({})",
                        memory::format_mb(memory_after),
                        format_delta(delta)
                    ),
                );
                self.events
                    .append(LogLevel::Debug, format!("Load time: {load_time:.1} seconds"));

                Ok(snapshot)
            }
            Err(err) => {
                let message = err.to_string();
                {
                    let mut entries = self.entries.write().await;
                    let entry = entry_mut(&mut entries, variant)?;
                    entry.handle = None;
                    entry.info.state = LifecycleState::Error;
                    entry.info.error_message = Some(message.clone());
                }
                self.events.append(
                    LogLevel::Error,
                    format!("Failed to load model {model_id}: {message}"),
                );
                Err(Error::LoadFailed {
                    model: model_id.to_string(),
                    message,
                })
            }
        }
    }

    /// Unload a checkpoint and verify that resident memory actually
    /// dropped. A release that fails is reported, never presented as
    /// freed memory.
    pub async fn unload(&self, variant: ModelVariant) -> Result<ModelRuntimeState> {
        let model_id = variant.model_id();
        let lock = self
            .transition_locks
            .get(&variant)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;
        let _transition = lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy(model_id.to_string()))?;

        // A generation in flight holds this lock; unload must not
        // yank the handle out from under it.
        let gen_lock = self
            .generation_locks
            .get(&variant)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;
        let _generation = gen_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy(model_id.to_string()))?;

        let handle = {
            let mut entries = self.entries.write().await;
            let entry = entry_mut(&mut entries, variant)?;
            if entry.info.state != LifecycleState::Loaded {
                return Err(Error::NotLoaded(model_id.to_string()));
            }
            entry.info.state = LifecycleState::Unloading;
            entry.info.error_message = None;
            entry
                .handle
                .take()
                .ok_or_else(|| Error::Backend("loaded entry without handle".to_string()))?
        };

        self.events
            .append(LogLevel::Info, format!("Unloading model: {model_id}"));

        let memory_before = memory::resident_memory_mb();
        self.events.append(
            LogLevel::Debug,
            format!("Memory before unload: {}", memory::format_mb(memory_before)),
        );

        let backend = self.backend.clone();
        let released = match tokio::task::spawn_blocking(move || backend.unload(variant, handle))
            .await
        {
            Ok(result) => result,
            Err(join_err) => Err(Error::Backend(format!("unload task failed: {join_err}"))),
        };

        match released {
            Ok(()) => {
                let memory_after = memory::resident_memory_mb();
                let delta = zip_delta(memory_before, memory_after);

                let snapshot = {
                    let mut entries = self.entries.write().await;
                    let entry = entry_mut(&mut entries, variant)?;
                    entry.info.state = LifecycleState::Unloaded;
                    entry.info.memory_before_mb = memory_before;
                    entry.info.memory_after_mb = memory_after;
                    entry.info.memory_delta_mb = delta;
                    entry.info.load_time_seconds = None;
                    entry.info.clone()
                };

                self.events
                    .append(LogLevel::Info, "Model unloaded successfully");
                self.events.append(
                    LogLevel::Debug,
                    format!(
                        "Memory after unload: {} ({})",
                        memory::format_mb(memory_after),
                        format_delta(delta)
                    ),
                );
                if let Some(d) = delta {
                    if d > 0.0 {
                        self.events.append(
                            LogLevel::Warning,
                            format!(
                                "Resident memory did not drop after unloading {model_id} \
                                 ({d:+.1} MB); the backend may defer its release"
                            ),
                        );
                    }
                }

                Ok(snapshot)
            }
            Err(err) => {
                let message = err.to_string();
                {
                    let mut entries = self.entries.write().await;
                    let entry = entry_mut(&mut entries, variant)?;
                    entry.info.state = LifecycleState::Error;
                    entry.info.error_message = Some(message.clone());
                }
                self.events.append(
                    LogLevel::Error,
                    format!("Failed to unload model {model_id}: {message}"),
                );
                Err(Error::UnloadFailed {
                    model: model_id.to_string(),
                    message,
                })
            }
        }
    }

    /// Acquire the per-model generation slot and the loaded handle.
    /// A second generation against the same model returns `Busy`
    /// rather than queueing.
    pub async fn begin_generation(&self, variant: ModelVariant) -> Result<GenerationPermit> {
        let model_id = variant.model_id();
        let gen_lock = self
            .generation_locks
            .get(&variant)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;
        let guard = gen_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy(model_id.to_string()))?;

        // State is read after the lock so an unload cannot slip in
        // between the check and the permit.
        let entries = self.entries.read().await;
        let entry = entries
            .get(&variant)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))?;
        if entry.info.state != LifecycleState::Loaded {
            return Err(Error::NotLoaded(model_id.to_string()));
        }
        let model = entry
            .handle
            .clone()
            .ok_or_else(|| Error::Backend("loaded entry without handle".to_string()))?;

        Ok(GenerationPermit {
            model,
            _guard: guard,
        })
    }
}

fn entry_mut<'a>(
    entries: &'a mut HashMap<ModelVariant, ModelEntry>,
    variant: ModelVariant,
) -> Result<&'a mut ModelEntry> {
    entries
        .get_mut(&variant)
        .ok_or_else(|| Error::UnknownModel(variant.model_id().to_string()))
}

fn zip_delta(before: Option<f64>, after: Option<f64>) -> Option<f64> {
    match (before, after) {
        (Some(b), Some(a)) => Some(a - b),
        _ => None,
    }
}

fn format_delta(delta: Option<f64>) -> String {
    match delta {
        Some(d) => format!("{d:+.1} MB"),
        None => "delta unavailable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tone::ToneBackend;
    use crate::backend::{Synthesis, SynthesisParams};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    // Empirical, platform-specific threshold for "memory really
    // dropped". Measured baselines are discussed in DESIGN.md; keep
    // this parameterized rather than buried in assertions.
    const UNLOAD_TOLERANCE_MB: f64 = 16.0;
    const BALLAST_BYTES: usize = 64 * 1024 * 1024;

    fn registry_with(backend: Arc<dyn TtsBackend>) -> ModelRegistry {
        ModelRegistry::new(backend, Arc::new(EventLog::new(64)))
    }

    fn tone_registry() -> ModelRegistry {
        registry_with(Arc::new(ToneBackend::new()))
    }

    /// Backend whose loads block long enough for two calls to overlap.
    struct SlowBackend;

    impl TtsBackend for SlowBackend {
        fn load(&self, variant: ModelVariant) -> Result<Arc<dyn VoiceModel>> {
            std::thread::sleep(Duration::from_millis(300));
            ToneBackend::new().load(variant)
        }

        fn unload(&self, variant: ModelVariant, model: Arc<dyn VoiceModel>) -> Result<()> {
            ToneBackend::new().unload(variant, model)
        }
    }

    /// Backend that fails its first load, then behaves.
    struct FlakyBackend {
        failed_once: AtomicBool,
    }

    impl TtsBackend for FlakyBackend {
        fn load(&self, variant: ModelVariant) -> Result<Arc<dyn VoiceModel>> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(Error::Backend("out of memory".to_string()));
            }
            ToneBackend::new().load(variant)
        }

        fn unload(&self, variant: ModelVariant, model: Arc<dyn VoiceModel>) -> Result<()> {
            ToneBackend::new().unload(variant, model)
        }
    }

    /// Backend that panics instead of returning an error.
    struct PanickingBackend {
        panic_on_unload: bool,
    }

    impl TtsBackend for PanickingBackend {
        fn load(&self, variant: ModelVariant) -> Result<Arc<dyn VoiceModel>> {
            if self.panic_on_unload {
                ToneBackend::new().load(variant)
            } else {
                panic!("backend crashed during load");
            }
        }

        fn unload(&self, _variant: ModelVariant, _model: Arc<dyn VoiceModel>) -> Result<()> {
            panic!("backend crashed during unload");
        }
    }

    #[tokio::test]
    async fn load_unload_round_trip() {
        let registry = tone_registry();
        let variant = ModelVariant::Base06B;

        let loaded = registry.load(variant).await.unwrap();
        assert_eq!(loaded.state, LifecycleState::Loaded);
        assert!(loaded.load_time_seconds.is_some());
        assert!(loaded.memory_delta_mb.is_some());

        let unloaded = registry.unload(variant).await.unwrap();
        assert_eq!(unloaded.state, LifecycleState::Unloaded);
        assert!(unloaded.load_time_seconds.is_none());
    }

    #[tokio::test]
    async fn second_load_is_already_loaded() {
        let registry = tone_registry();
        let variant = ModelVariant::Base17B;

        registry.load(variant).await.unwrap();
        let before = registry.get(variant).await.unwrap();

        let err = registry.load(variant).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyLoaded(_)));

        // Registry state unchanged by the rejected call.
        let after = registry.get(variant).await.unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.load_time_seconds, before.load_time_seconds);
    }

    #[tokio::test]
    async fn unload_without_load_is_not_loaded() {
        let registry = tone_registry();
        let err = registry.unload(ModelVariant::CustomVoice06B).await.unwrap_err();
        assert!(matches!(err, Error::NotLoaded(_)));
    }

    #[tokio::test]
    async fn concurrent_loads_yield_one_success_and_one_busy() {
        let registry = Arc::new(registry_with(Arc::new(SlowBackend)));
        let variant = ModelVariant::CustomVoice17B;

        let first = tokio::spawn({
            let registry = registry.clone();
            async move { registry.load(variant).await }
        });
        // Give the first call time to take the transition lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = registry.load(variant).await;

        let first = first.await.unwrap();
        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::Busy(_))));

        // Never a handle without the Loaded state.
        let state = registry.get(variant).await.unwrap();
        assert_eq!(state.state, LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn failed_load_enters_error_and_is_retriable() {
        let registry = registry_with(Arc::new(FlakyBackend {
            failed_once: AtomicBool::new(false),
        }));
        let variant = ModelVariant::VoiceDesign17B;

        let err = registry.load(variant).await.unwrap_err();
        assert!(matches!(err, Error::LoadFailed { .. }));

        let state = registry.get(variant).await.unwrap();
        assert_eq!(state.state, LifecycleState::Error);
        assert!(state.error_message.as_deref().unwrap().contains("out of memory"));

        // Error is not terminal; the retry re-enters the load path.
        let retried = registry.load(variant).await.unwrap();
        assert_eq!(retried.state, LifecycleState::Loaded);
        assert!(retried.error_message.is_none());
    }

    #[tokio::test]
    async fn panicking_load_lands_in_error_state() {
        let registry = registry_with(Arc::new(PanickingBackend {
            panic_on_unload: false,
        }));
        let variant = ModelVariant::Base06B;

        let result = registry.load(variant).await;
        assert!(matches!(result, Err(Error::LoadFailed { .. })));

        let state = registry.get(variant).await.unwrap();
        assert_eq!(state.state, LifecycleState::Error);
        assert!(state
            .error_message
            .as_deref()
            .unwrap()
            .contains("load task failed"));
    }

    #[tokio::test]
    async fn panicking_unload_lands_in_error_state() {
        let registry = registry_with(Arc::new(PanickingBackend {
            panic_on_unload: true,
        }));
        let variant = ModelVariant::Base17B;
        registry.load(variant).await.unwrap();

        let result = registry.unload(variant).await;
        assert!(matches!(result, Err(Error::UnloadFailed { .. })));

        let state = registry.get(variant).await.unwrap();
        assert_eq!(state.state, LifecycleState::Error);
        assert!(state
            .error_message
            .as_deref()
            .unwrap()
            .contains("unload task failed"));
    }

    #[tokio::test]
    async fn unknown_model_never_mutates_entries() {
        // The registry API is typed, so unknown identifiers are
        // rejected at the catalog boundary; `get` after a full listing
        // confirms no entry moved.
        let registry = tone_registry();
        assert!(matches!(
            crate::catalog::parse_model_variant("no-such-model"),
            Err(Error::UnknownModel(_))
        ));
        for state in registry.list().await {
            assert_eq!(state.state, LifecycleState::Unloaded);
        }
    }

    #[tokio::test]
    async fn list_is_idempotent_without_mutation() {
        let registry = tone_registry();
        registry.load(ModelVariant::Base06B).await.unwrap();

        let a = registry.list().await;
        let b = registry.list().await;
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.variant, y.variant);
            assert_eq!(x.state, y.state);
            assert_eq!(x.memory_delta_mb, y.memory_delta_mb);
        }
    }

    #[tokio::test]
    async fn unload_during_generation_is_busy() {
        let registry = tone_registry();
        let variant = ModelVariant::Base06B;
        registry.load(variant).await.unwrap();

        let permit = registry.begin_generation(variant).await.unwrap();

        let err = registry.unload(variant).await.unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        // The in-flight generation completes normally.
        let out = permit
            .model()
            .synthesize(&SynthesisParams::Design {
                text: "hello".into(),
                language: "English".into(),
                instruct: "calm".into(),
            })
            .unwrap();
        assert!(!out.samples.is_empty());
        drop(permit);

        let unloaded = registry.unload(variant).await.unwrap();
        assert_eq!(unloaded.state, LifecycleState::Unloaded);
    }

    #[tokio::test]
    async fn concurrent_generation_on_same_model_is_busy() {
        let registry = tone_registry();
        let variant = ModelVariant::Base17B;
        registry.load(variant).await.unwrap();

        let _permit = registry.begin_generation(variant).await.unwrap();
        let second = registry.begin_generation(variant).await;
        assert!(matches!(second, Err(Error::Busy(_))));
    }

    #[tokio::test]
    async fn generation_against_unloaded_model_is_not_loaded() {
        let registry = tone_registry();
        let result = registry.begin_generation(ModelVariant::VoiceDesign17B).await;
        assert!(matches!(result, Err(Error::NotLoaded(_))));
    }

    #[tokio::test]
    async fn distinct_models_load_independently() {
        let registry = Arc::new(registry_with(Arc::new(SlowBackend)));

        let a = tokio::spawn({
            let registry = registry.clone();
            async move { registry.load(ModelVariant::Base06B).await }
        });
        let b = tokio::spawn({
            let registry = registry.clone();
            async move { registry.load(ModelVariant::CustomVoice06B).await }
        });

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(registry.loaded_count().await, 2);
    }

    /// Memory accounting must reflect true resource release. This
    /// test fails loudly rather than skipping when the invariant is
    /// violated.
    #[tokio::test]
    async fn memory_delta_tracks_ballast() {
        let registry = registry_with(Arc::new(ToneBackend::with_ballast(BALLAST_BYTES)));
        let variant = ModelVariant::Base06B;

        let loaded = registry.load(variant).await.unwrap();
        let load_delta = loaded
            .memory_delta_mb
            .expect("memory probe must be available in tests");
        let ballast_mb = BALLAST_BYTES as f64 / (1024.0 * 1024.0);
        assert!(
            load_delta > ballast_mb / 2.0,
            "load delta {load_delta:.1} MB does not reflect {ballast_mb:.0} MB ballast"
        );

        let unloaded = registry.unload(variant).await.unwrap();
        let unload_after = unloaded.memory_after_mb.unwrap();
        let unload_before = unloaded.memory_before_mb.unwrap();
        assert!(
            unload_after <= unload_before + UNLOAD_TOLERANCE_MB,
            "unload did not release memory: before {unload_before:.1} MB, \
             after {unload_after:.1} MB (tolerance {UNLOAD_TOLERANCE_MB} MB)"
        );
    }
}
