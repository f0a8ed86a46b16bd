//! Model lifecycle endpoints

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use murmur_core::registry::ModelRuntimeState;
use murmur_core::{parse_model_variant, LifecycleState};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MemoryAccounting {
    pub before_mb: Option<f64>,
    pub after_mb: Option<f64>,
    pub delta_mb: Option<f64>,
}

/// Wire form of one catalog entry's runtime state.
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub model_id: &'static str,
    pub state: LifecycleState,
    pub memory: MemoryAccounting,
    pub load_time_seconds: Option<f64>,
    pub error: Option<String>,
}

impl From<ModelRuntimeState> for ModelInfo {
    fn from(state: ModelRuntimeState) -> Self {
        Self {
            model_id: state.variant.model_id(),
            state: state.state,
            memory: MemoryAccounting {
                before_mb: state.memory_before_mb,
                after_mb: state.memory_after_mb,
                delta_mb: state.memory_delta_mb,
            },
            load_time_seconds: state.load_time_seconds,
            error: state.error_message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model_id: String,
}

/// List every catalog entry with its current lifecycle state.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state
        .registry
        .list()
        .await
        .into_iter()
        .map(ModelInfo::from)
        .collect();
    Json(ModelsResponse { models })
}

pub async fn load_model(
    State(state): State<AppState>,
    Json(request): Json<ModelRequest>,
) -> Result<Json<ModelInfo>, ApiError> {
    let variant = parse_model_variant(&request.model_id)?;
    info!("Load requested: {}", variant.model_id());

    let loaded = state.registry.load(variant).await?;
    Ok(Json(loaded.into()))
}

pub async fn unload_model(
    State(state): State<AppState>,
    Json(request): Json<ModelRequest>,
) -> Result<Json<ModelInfo>, ApiError> {
    let variant = parse_model_variant(&request.model_id)?;
    info!("Unload requested: {}", variant.model_id());

    let unloaded = state.registry.unload(variant).await?;
    Ok(Json(unloaded.into()))
}
