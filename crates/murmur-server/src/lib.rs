//! HTTP surface for the Murmur TTS engine.

pub mod api;
pub mod error;
pub mod speaker_store;
pub mod state;

pub use api::create_router;
pub use state::AppState;
