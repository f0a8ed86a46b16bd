//! Synthesis dispatcher
//!
//! Validates mode-specific parameters, runs inference against a
//! loaded handle obtained from the registry, and writes the output
//! WAV. The dispatcher never mutates registry state; per-model
//! serialization comes from the generation permit it holds for the
//! duration of the call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{Synthesis, SynthesisParams};
use crate::catalog::{Capability, Language, ModelVariant, Speaker};
use crate::error::{Error, Result};
use crate::logbus::{EventLog, LogLevel};
use crate::registry::ModelRegistry;

/// One generation request, discarded after the response is sent.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub params: SynthesisParams,
    pub output_path: PathBuf,
}

pub struct SynthesisDispatcher {
    registry: Arc<ModelRegistry>,
    events: Arc<EventLog>,
}

impl SynthesisDispatcher {
    pub fn new(registry: Arc<ModelRegistry>, events: Arc<EventLog>) -> Self {
        Self { registry, events }
    }

    /// Validate, synthesize, and write the output file. Long-running
    /// and blocking from the caller's perspective; callers must not
    /// assume sub-second response.
    pub async fn generate(&self, variant: ModelVariant, job: GenerationJob) -> Result<PathBuf> {
        validate(variant, &job)?;

        let permit = self.registry.begin_generation(variant).await?;

        let mode = job.params.mode();
        self.events.append(
            LogLevel::Info,
            format!("Generating {mode} audio with {}", variant.model_id()),
        );

        let model = permit.model().clone();
        let params = job.params.clone();
        let output_path = job.output_path.clone();
        let events = self.events.clone();

        let written = tokio::task::spawn_blocking(move || {
            let synthesis = model
                .synthesize(&params)
                .map_err(|e| Error::GenerationFailed(e.to_string()))?;
            events.append(LogLevel::Info, "Saving output...");
            write_wav(&output_path, &synthesis)?;
            Ok::<PathBuf, Error>(output_path)
        })
        .await
        .map_err(|e| Error::GenerationFailed(format!("generation task failed: {e}")))?;

        drop(permit);

        match &written {
            Ok(path) => self.events.append(
                LogLevel::Info,
                format!("Generated {mode} audio: {}", path.display()),
            ),
            Err(err) => self
                .events
                .append(LogLevel::Error, format!("Generation failed: {err}")),
        };

        written
    }
}

/// Per-mode validation. Fails with `InvalidInput` naming the field;
/// nothing is dispatched to the backend on failure.
fn validate(variant: ModelVariant, job: &GenerationJob) -> Result<()> {
    if job.params.text().trim().is_empty() {
        return Err(Error::invalid_input("text", "must be non-empty"));
    }

    let required = match job.params {
        SynthesisParams::Clone { .. } => Capability::Clone,
        SynthesisParams::Control { .. } => Capability::ControlVoice,
        SynthesisParams::Design { .. } => Capability::VoiceDesign,
    };
    if variant.capability() != required {
        return Err(Error::invalid_input(
            "model_id",
            format!(
                "{} is a {} model, not usable for {} mode",
                variant.model_id(),
                variant.capability().as_str(),
                job.params.mode()
            ),
        ));
    }

    match &job.params {
        SynthesisParams::Clone { ref_audio_path, .. } => {
            if !ref_audio_path.is_file() {
                return Err(Error::invalid_input(
                    "ref_audio_path",
                    format!("{} does not exist", ref_audio_path.display()),
                ));
            }
            std::fs::File::open(ref_audio_path).map_err(|e| {
                Error::invalid_input(
                    "ref_audio_path",
                    format!("{} is not readable: {e}", ref_audio_path.display()),
                )
            })?;
        }
        SynthesisParams::Control {
            speaker, language, ..
        } => {
            let language = Language::parse(language)
                .ok_or_else(|| Error::invalid_input("language", format!("unknown language '{language}'")))?;
            let speaker = Speaker::parse(speaker)
                .ok_or_else(|| Error::invalid_input("speaker", format!("unknown speaker '{speaker}'")))?;
            if !speaker.supports(language) {
                return Err(Error::invalid_input(
                    "speaker",
                    format!(
                        "{} does not speak {}",
                        speaker.as_str(),
                        language.as_str()
                    ),
                ));
            }
        }
        SynthesisParams::Design {
            language, instruct, ..
        } => {
            Language::parse(language)
                .ok_or_else(|| Error::invalid_input("language", format!("unknown language '{language}'")))?;
            if instruct.trim().is_empty() {
                return Err(Error::invalid_input("instruct", "must be non-empty"));
            }
        }
    }

    // The dispatcher writes into an existing directory; creating the
    // layout is the file service's job.
    match job.output_path.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        Some(parent) => Err(Error::invalid_input(
            "output_path",
            format!("directory {} does not exist", parent.display()),
        )),
        None => Err(Error::invalid_input("output_path", "not a file path")),
    }
}

/// Write mono 16-bit PCM.
fn write_wav(path: &Path, synthesis: &Synthesis) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: synthesis.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    for sample in &synthesis.samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    }
    writer
        .finalize()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tone::ToneBackend;
    use crate::logbus::EventLog;

    fn dispatcher() -> (SynthesisDispatcher, Arc<ModelRegistry>) {
        let events = Arc::new(EventLog::new(64));
        let registry = Arc::new(ModelRegistry::new(
            Arc::new(ToneBackend::new()),
            events.clone(),
        ));
        (SynthesisDispatcher::new(registry.clone(), events), registry)
    }

    fn design_job(dir: &Path) -> GenerationJob {
        GenerationJob {
            params: SynthesisParams::Design {
                text: "Hello world".into(),
                language: "English".into(),
                instruct: "calm male voice".into(),
            },
            output_path: dir.join("out.wav"),
        }
    }

    #[tokio::test]
    async fn design_generation_writes_wav() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, registry) = dispatcher();
        registry.load(ModelVariant::design_model()).await.unwrap();

        let path = dispatcher
            .generate(ModelVariant::design_model(), design_job(tmp.path()))
            .await
            .unwrap();
        assert!(path.is_file());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert!(reader.len() > 0);
    }

    #[tokio::test]
    async fn empty_text_is_invalid_before_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, _registry) = dispatcher();

        let job = GenerationJob {
            params: SynthesisParams::Design {
                text: "   ".into(),
                language: "English".into(),
                instruct: "calm".into(),
            },
            output_path: tmp.path().join("out.wav"),
        };
        let err = dispatcher
            .generate(ModelVariant::design_model(), job)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { field: "text", .. }));
    }

    #[tokio::test]
    async fn capability_mismatch_is_invalid_model_id() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, registry) = dispatcher();
        registry.load(ModelVariant::Base06B).await.unwrap();

        let err = dispatcher
            .generate(ModelVariant::Base06B, design_job(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { field: "model_id", .. }));
    }

    #[tokio::test]
    async fn clone_requires_existing_reference_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, registry) = dispatcher();
        registry.load(ModelVariant::Base06B).await.unwrap();

        let job = GenerationJob {
            params: SynthesisParams::Clone {
                text: "Hello from Murmur".into(),
                ref_audio_path: tmp.path().join("missing.wav"),
                ref_text: None,
            },
            output_path: tmp.path().join("out.wav"),
        };
        let err = dispatcher.generate(ModelVariant::Base06B, job).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidInput {
                field: "ref_audio_path",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn control_rejects_incompatible_speaker_language() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, registry) = dispatcher();
        registry.load(ModelVariant::CustomVoice06B).await.unwrap();

        let job = GenerationJob {
            params: SynthesisParams::Control {
                text: "hello".into(),
                speaker: "Uncle_Fu".into(),
                language: "English".into(),
                instruct: None,
            },
            output_path: tmp.path().join("out.wav"),
        };
        let err = dispatcher
            .generate(ModelVariant::CustomVoice06B, job)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { field: "speaker", .. }));
    }

    #[tokio::test]
    async fn missing_output_directory_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, registry) = dispatcher();
        registry.load(ModelVariant::design_model()).await.unwrap();

        let job = GenerationJob {
            output_path: tmp.path().join("nope").join("out.wav"),
            ..design_job(tmp.path())
        };
        let err = dispatcher
            .generate(ModelVariant::design_model(), job)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidInput {
                field: "output_path",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn generation_against_unloaded_model_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (dispatcher, _registry) = dispatcher();

        let err = dispatcher
            .generate(ModelVariant::design_model(), design_job(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotLoaded(_)));
    }
}
