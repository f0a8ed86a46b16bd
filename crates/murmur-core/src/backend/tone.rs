//! In-process diagnostics backend
//!
//! Synthesizes a short sine tone regardless of input. Used by the
//! test suites and selectable with `MURMUR_BACKEND=tone` for smoke
//! testing the full request path without an inference daemon. The
//! optional ballast allocation makes load/unload move real resident
//! memory so lifecycle accounting can be exercised end to end.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::backend::{Synthesis, SynthesisParams, TtsBackend, VoiceModel};
use crate::catalog::ModelVariant;
use crate::error::Result;

const SAMPLE_RATE: u32 = 24_000;
const TONE_HZ: f32 = 440.0;
const TONE_SECONDS: f32 = 0.25;

pub struct ToneBackend {
    ballast_bytes: usize,
}

impl ToneBackend {
    pub fn new() -> Self {
        Self { ballast_bytes: 0 }
    }

    /// Allocate (and touch) this many bytes per loaded model.
    pub fn with_ballast(ballast_bytes: usize) -> Self {
        Self { ballast_bytes }
    }
}

impl Default for ToneBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct ToneModel {
    ballast: Vec<u8>,
}

impl VoiceModel for ToneModel {
    fn synthesize(&self, _params: &SynthesisParams) -> Result<Synthesis> {
        let total = (SAMPLE_RATE as f32 * TONE_SECONDS) as usize;
        let samples = (0..total)
            .map(|i| (TAU * TONE_HZ * i as f32 / SAMPLE_RATE as f32).sin() * 0.2)
            .collect();
        // Keep the ballast reachable so the allocation is not elided.
        debug_assert!(self.ballast.len() == self.ballast.capacity());
        Ok(Synthesis {
            samples,
            sample_rate: SAMPLE_RATE,
        })
    }
}

impl TtsBackend for ToneBackend {
    fn load(&self, _variant: ModelVariant) -> Result<Arc<dyn VoiceModel>> {
        let mut ballast = vec![0u8; self.ballast_bytes];
        // Touch every page so the allocation shows up in RSS.
        for i in (0..ballast.len()).step_by(4096) {
            ballast[i] = 1;
        }
        Ok(Arc::new(ToneModel { ballast }))
    }

    fn unload(&self, _variant: ModelVariant, model: Arc<dyn VoiceModel>) -> Result<()> {
        // Dropping the last reference frees the ballast; there is no
        // cache layer to flush in this backend.
        drop(model);
        Ok(())
    }
}
