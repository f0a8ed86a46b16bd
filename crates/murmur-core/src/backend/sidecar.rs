//! MLX sidecar backend
//!
//! Talks to a persistent Python daemon that hosts the actual MLX
//! checkpoints, over a Unix socket with length-prefixed JSON frames.
//! Load keeps the checkpoint resident in the daemon; unload drops the
//! daemon-side reference and clears the MLX cache so memory is truly
//! returned.
//!
//! Because the weights live in the daemon process, the host-process
//! RSS delta understates model memory. The daemon reports its own RSS
//! in load/unload replies and those figures are logged here; host RSS
//! remains the registry's accounting metric.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{Synthesis, SynthesisParams, TtsBackend, VoiceModel};
use crate::catalog::ModelVariant;
use crate::config::ServerConfig;
use crate::error::{Error, Result};

const DAEMON_START_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
struct SidecarRequest {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruct: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ref_audio_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ref_text: Option<String>,
}

impl SidecarRequest {
    fn command(command: &str) -> Self {
        Self {
            command: command.to_string(),
            model_id: None,
            text: None,
            speaker: None,
            language: None,
            instruct: None,
            ref_audio_path: None,
            ref_text: None,
        }
    }

    fn for_model(command: &str, variant: ModelVariant) -> Self {
        let mut request = Self::command(command);
        request.model_id = Some(variant.model_id().to_string());
        request
    }
}

#[derive(Debug, Deserialize)]
struct SidecarResponse {
    status: Option<String>,
    error: Option<String>,
    audio_base64: Option<String>,
    sample_rate: Option<u32>,
    rss_mb: Option<f64>,
}

struct SidecarInner {
    socket_path: PathBuf,
    script_path: PathBuf,
    python_cmd: String,
    daemon: Mutex<Option<Child>>,
}

/// Backend over the persistent MLX daemon.
pub struct SidecarBackend {
    inner: Arc<SidecarInner>,
}

impl SidecarBackend {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            inner: Arc::new(SidecarInner {
                socket_path: config.sidecar_socket.clone(),
                script_path: config.sidecar_script.clone(),
                python_cmd: config.python_cmd.clone(),
                daemon: Mutex::new(None),
            }),
        }
    }

    /// Stop the daemon and clean up its socket. Used on shutdown.
    pub fn stop(&self) {
        self.inner.stop_daemon();
    }
}

impl SidecarInner {
    fn is_daemon_running(&self) -> bool {
        self.socket_path.exists() && self.connect().is_ok()
    }

    fn ensure_daemon_running(&self) -> Result<()> {
        if self.is_daemon_running() {
            debug!("TTS sidecar already running");
            return Ok(());
        }

        info!("Starting TTS sidecar daemon");

        let child = Command::new(&self.python_cmd)
            .arg(&self.script_path)
            .arg("--socket")
            .arg(&self.socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Backend(format!("failed to start sidecar: {e}")))?;

        {
            let mut guard = self.daemon.lock().unwrap();
            *guard = Some(child);
        }

        let deadline = DAEMON_START_TIMEOUT_MS / 100;
        for _ in 0..deadline {
            std::thread::sleep(Duration::from_millis(100));
            if self.socket_path.exists() {
                if let Ok(mut stream) = self.connect() {
                    let check = SidecarRequest::command("check");
                    if self.send_request(&mut stream, &check).is_ok() {
                        info!("TTS sidecar started");
                        return Ok(());
                    }
                }
            }
        }

        Err(Error::Backend(format!(
            "sidecar failed to start within {} seconds",
            DAEMON_START_TIMEOUT_MS / 1000
        )))
    }

    fn stop_daemon(&self) {
        if self.is_daemon_running() {
            if let Ok(mut stream) = self.connect() {
                let _ = self.send_request(&mut stream, &SidecarRequest::command("shutdown"));
            }
        }

        let mut guard = self.daemon.lock().unwrap();
        if let Some(mut child) = guard.take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.socket_path)
            .map_err(|e| Error::Backend(format!("failed to connect to sidecar: {e}")))?;

        // Generation can legitimately run for a long time; the socket
        // read timeout only guards against a wedged daemon.
        stream.set_read_timeout(Some(Duration::from_secs(3600))).ok();
        stream.set_write_timeout(Some(Duration::from_secs(30))).ok();

        Ok(stream)
    }

    fn send_request(
        &self,
        stream: &mut UnixStream,
        request: &SidecarRequest,
    ) -> Result<SidecarResponse> {
        let payload = serde_json::to_string(request)
            .map_err(|e| Error::Backend(format!("failed to serialize request: {e}")))?;

        let data = payload.as_bytes();
        let length = (data.len() as u32).to_be_bytes();

        stream
            .write_all(&length)
            .and_then(|_| stream.write_all(data))
            .and_then(|_| stream.flush())
            .map_err(|e| Error::Backend(format!("failed to write to sidecar: {e}")))?;

        let mut length_buf = [0u8; 4];
        stream
            .read_exact(&mut length_buf)
            .map_err(|e| Error::Backend(format!("failed to read reply length: {e}")))?;
        let reply_len = u32::from_be_bytes(length_buf) as usize;

        let mut reply_buf = vec![0u8; reply_len];
        stream
            .read_exact(&mut reply_buf)
            .map_err(|e| Error::Backend(format!("failed to read reply body: {e}")))?;

        serde_json::from_slice(&reply_buf).map_err(|e| {
            Error::Backend(format!(
                "failed to parse sidecar reply: {e} - {}",
                String::from_utf8_lossy(&reply_buf)
            ))
        })
    }

    fn call(&self, request: &SidecarRequest) -> Result<SidecarResponse> {
        self.ensure_daemon_running()?;
        let mut stream = self.connect()?;
        let response = self.send_request(&mut stream, request)?;
        if let Some(err) = response.error {
            return Err(Error::Backend(err));
        }
        Ok(response)
    }
}

struct SidecarModel {
    inner: Arc<SidecarInner>,
    variant: ModelVariant,
}

impl VoiceModel for SidecarModel {
    fn synthesize(&self, params: &SynthesisParams) -> Result<Synthesis> {
        let mut request = SidecarRequest::for_model("generate", self.variant);
        match params {
            SynthesisParams::Clone {
                text,
                ref_audio_path,
                ref_text,
            } => {
                request.text = Some(text.clone());
                request.ref_audio_path = Some(ref_audio_path.to_string_lossy().to_string());
                request.ref_text = ref_text.clone();
            }
            SynthesisParams::Control {
                text,
                speaker,
                language,
                instruct,
            } => {
                request.text = Some(text.clone());
                request.speaker = Some(speaker.clone());
                request.language = Some(language.clone());
                request.instruct = instruct.clone();
            }
            SynthesisParams::Design {
                text,
                language,
                instruct,
            } => {
                request.text = Some(text.clone());
                request.language = Some(language.clone());
                request.instruct = Some(instruct.clone());
            }
        }

        let response = self.inner.call(&request)?;

        let audio_b64 = response
            .audio_base64
            .ok_or_else(|| Error::Backend("no audio in sidecar reply".to_string()))?;
        let sample_rate = response.sample_rate.unwrap_or(24_000);

        use base64::Engine;
        let wav_bytes = base64::engine::general_purpose::STANDARD
            .decode(&audio_b64)
            .map_err(|e| Error::Backend(format!("failed to decode audio: {e}")))?;

        let samples = parse_wav_samples(&wav_bytes)?;
        debug!("Sidecar returned {} samples at {} Hz", samples.len(), sample_rate);

        Ok(Synthesis {
            samples,
            sample_rate,
        })
    }
}

impl TtsBackend for SidecarBackend {
    fn load(&self, variant: ModelVariant) -> Result<Arc<dyn VoiceModel>> {
        let response = self.inner.call(&SidecarRequest::for_model("load", variant))?;
        if response.status.as_deref() != Some("ok") {
            return Err(Error::Backend(format!(
                "sidecar refused to load {}",
                variant.model_id()
            )));
        }
        if let Some(rss) = response.rss_mb {
            debug!("Sidecar RSS after load: {rss:.1} MB");
        }

        Ok(Arc::new(SidecarModel {
            inner: self.inner.clone(),
            variant,
        }))
    }

    fn unload(&self, variant: ModelVariant, model: Arc<dyn VoiceModel>) -> Result<()> {
        drop(model);
        // The unload command drops the daemon-side reference, runs
        // garbage collection, and clears the MLX buffer cache.
        let response = self.inner.call(&SidecarRequest::for_model("unload", variant))?;
        if let Some(rss) = response.rss_mb {
            debug!("Sidecar RSS after unload: {rss:.1} MB");
        }
        Ok(())
    }
}

/// Extract f32 samples from a WAV container.
fn parse_wav_samples(wav_bytes: &[u8]) -> Result<Vec<f32>> {
    use std::io::Cursor;

    let cursor = Cursor::new(wav_bytes);
    let mut reader = hound::WavReader::new(cursor)
        .map_err(|e| Error::Backend(format!("failed to parse WAV: {e}")))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader.samples::<f32>().filter_map(|s| s.ok()).collect(),
    };

    Ok(samples)
}
