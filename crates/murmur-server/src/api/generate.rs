//! Synthesis endpoints
//!
//! Each handler builds mode-specific parameters, then runs the
//! dispatcher under the configured wall-clock ceiling. On timeout the
//! response is 504 but the underlying generation keeps running; the
//! model stays busy until it completes.

use std::path::PathBuf;
use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use murmur_core::{Error, GenerationJob, ModelVariant, SynthesisParams};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CloneRequest {
    pub model_id: String,
    pub text: String,
    pub ref_audio_path: PathBuf,
    #[serde(default)]
    pub ref_text: Option<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub model_id: String,
    pub text: String,
    pub speaker: String,
    pub language: String,
    #[serde(default)]
    pub instruct: Option<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct DesignRequest {
    pub text: String,
    pub language: String,
    pub instruct: String,
    pub output_path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub output_path: PathBuf,
}

pub async fn generate_clone(
    State(state): State<AppState>,
    Json(request): Json<CloneRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let variant = murmur_core::parse_model_variant(&request.model_id)?;
    let job = GenerationJob {
        params: SynthesisParams::Clone {
            text: request.text,
            ref_audio_path: request.ref_audio_path,
            ref_text: request.ref_text,
        },
        output_path: request.output_path,
    };
    run_generation(state, variant, job).await
}

pub async fn generate_control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let variant = murmur_core::parse_model_variant(&request.model_id)?;
    let job = GenerationJob {
        params: SynthesisParams::Control {
            text: request.text,
            speaker: request.speaker,
            language: request.language,
            instruct: request.instruct,
        },
        output_path: request.output_path,
    };
    run_generation(state, variant, job).await
}

/// Design mode always runs against the voice-design checkpoint; there
/// is exactly one in the catalog.
pub async fn generate_design(
    State(state): State<AppState>,
    Json(request): Json<DesignRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let job = GenerationJob {
        params: SynthesisParams::Design {
            text: request.text,
            language: request.language,
            instruct: request.instruct,
        },
        output_path: request.output_path,
    };
    run_generation(state, ModelVariant::design_model(), job).await
}

async fn run_generation(
    state: AppState,
    variant: ModelVariant,
    job: GenerationJob,
) -> Result<Json<GenerateResponse>, ApiError> {
    info!(
        "Generation requested: mode={} model={}",
        job.params.mode(),
        variant.model_id()
    );

    let ceiling = Duration::from_secs(state.config.generation_timeout_secs);
    let dispatcher = state.dispatcher.clone();
    let task = tokio::spawn(async move { dispatcher.generate(variant, job).await });

    match tokio::time::timeout(ceiling, task).await {
        Ok(Ok(Ok(output_path))) => Ok(Json(GenerateResponse {
            success: true,
            output_path,
        })),
        Ok(Ok(Err(err))) => Err(err.into()),
        Ok(Err(join_err)) => Err(ApiError::internal(format!(
            "generation task failed: {join_err}"
        ))),
        Err(_) => {
            // The spawned task keeps running; the model stays busy
            // until it finishes.
            warn!(
                "Generation exceeded {}s ceiling for {}",
                ceiling.as_secs(),
                variant.model_id()
            );
            Err(Error::Timeout(ceiling.as_secs()).into())
        }
    }
}
