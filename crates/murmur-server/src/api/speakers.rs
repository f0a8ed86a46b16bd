//! Speaker profile endpoints
//!
//! Reference audio travels as base64 WAV in the JSON body; the store
//! owns decoding-agnostic bytes and the on-disk layout.

use axum::{
    extract::{Path, State},
    Json,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::speaker_store::SpeakerProfile;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SpeakerView {
    pub name: String,
    pub audio_path: String,
    pub text_reference: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct SpeakersResponse {
    pub speakers: Vec<SpeakerView>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSpeakerRequest {
    pub name: String,
    pub audio_base64: String,
    #[serde(default)]
    pub text_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSpeakerRequest {
    #[serde(default)]
    pub audio_base64: Option<String>,
    #[serde(default)]
    pub text_reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

fn view(state: &AppState, profile: SpeakerProfile) -> SpeakerView {
    SpeakerView {
        audio_path: profile
            .audio_path(state.speakers.dir())
            .display()
            .to_string(),
        name: profile.name,
        text_reference: profile.text_reference,
        created_at: profile.created_at,
    }
}

fn decode_audio(audio_base64: &str) -> Result<Vec<u8>, ApiError> {
    base64::engine::general_purpose::STANDARD
        .decode(audio_base64)
        .map_err(|e| ApiError::bad_request(format!("invalid audio_base64: {e}")))
}

pub async fn list_speakers(State(state): State<AppState>) -> Json<SpeakersResponse> {
    let speakers = state
        .speakers
        .list()
        .into_iter()
        .map(|p| view(&state, p))
        .collect();
    Json(SpeakersResponse { speakers })
}

pub async fn create_speaker(
    State(state): State<AppState>,
    Json(request): Json<CreateSpeakerRequest>,
) -> Result<Json<SpeakerView>, ApiError> {
    let audio = decode_audio(&request.audio_base64)?;
    let profile = state
        .speakers
        .create(&request.name, request.text_reference, audio)
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    info!("Speaker profile created: {}", profile.name);
    Ok(Json(view(&state, profile)))
}

pub async fn update_speaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<UpdateSpeakerRequest>,
) -> Result<Json<SpeakerView>, ApiError> {
    let audio = request
        .audio_base64
        .as_deref()
        .map(decode_audio)
        .transpose()?;
    let updated = state
        .speakers
        .update(&name, request.text_reference, audio)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("no speaker named '{name}'")))?;
    info!("Speaker profile updated: {}", updated.name);
    Ok(Json(view(&state, updated)))
}

pub async fn delete_speaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let removed = state
        .speakers
        .delete(&name)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !removed {
        return Err(ApiError::not_found(format!("no speaker named '{name}'")));
    }
    info!("Speaker profile deleted: {name}");
    Ok(Json(DeleteResponse { deleted: name }))
}
