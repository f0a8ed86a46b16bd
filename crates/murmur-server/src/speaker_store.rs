//! Persistent speaker profile storage.
//!
//! Profiles pair a short display name with a reference WAV used for
//! clone-mode synthesis. The registry file and every audio file are
//! written to a temporary sibling first and renamed into place, so a
//! crash mid-write never leaves a half-written profile visible.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use tokio::task;

const MAX_NAME_LEN: usize = 16;
const REGISTRY_FILE: &str = "speakers.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub name: String,
    pub audio_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_reference: Option<String>,
    pub created_at: String,
}

impl SpeakerProfile {
    pub fn audio_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.audio_file_name)
    }
}

struct Inner {
    dir: PathBuf,
    registry_path: PathBuf,
    profiles: Mutex<BTreeMap<String, SpeakerProfile>>,
}

#[derive(Clone)]
pub struct SpeakerStore {
    inner: Arc<Inner>,
}

impl SpeakerStore {
    /// Open (or create) the store rooted at `dir`, loading any
    /// existing registry file.
    pub fn open(dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create speaker directory {}", dir.display()))?;

        let registry_path = dir.join(REGISTRY_FILE);
        let profiles = if registry_path.is_file() {
            let raw = std::fs::read_to_string(&registry_path).with_context(|| {
                format!("failed to read speaker registry {}", registry_path.display())
            })?;
            let list: Vec<SpeakerProfile> = serde_json::from_str(&raw).with_context(|| {
                format!("malformed speaker registry {}", registry_path.display())
            })?;
            list.into_iter().map(|p| (p.name.clone(), p)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                registry_path,
                profiles: Mutex::new(profiles),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn list(&self) -> Vec<SpeakerProfile> {
        self.inner
            .profiles
            .lock()
            .expect("speaker registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<SpeakerProfile> {
        self.inner
            .profiles
            .lock()
            .expect("speaker registry poisoned")
            .get(name)
            .cloned()
    }

    /// Create a new profile. Fails if the name is invalid or taken.
    pub async fn create(
        &self,
        name: &str,
        text_reference: Option<String>,
        audio_bytes: Vec<u8>,
    ) -> anyhow::Result<SpeakerProfile> {
        let name = validate_name(name)?;
        let profile = SpeakerProfile {
            audio_file_name: format!("{name}.wav"),
            name,
            text_reference,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let inner = self.inner.clone();
        self.run_blocking(move || {
            let mut profiles = inner.profiles.lock().expect("speaker registry poisoned");
            if profiles.contains_key(&profile.name) {
                bail!("speaker '{}' already exists", profile.name);
            }
            write_atomic(&profile.audio_path(&inner.dir), &audio_bytes)?;
            profiles.insert(profile.name.clone(), profile.clone());
            persist(&inner, &profiles)?;
            Ok(profile)
        })
        .await
    }

    /// Replace the reference audio (and optionally the reference
    /// text) of an existing profile. `text_reference: None` keeps the
    /// stored text; an empty or whitespace-only string clears it.
    /// Returns `None` if no profile by that name exists.
    pub async fn update(
        &self,
        name: &str,
        text_reference: Option<String>,
        audio_bytes: Option<Vec<u8>>,
    ) -> anyhow::Result<Option<SpeakerProfile>> {
        let name = name.trim().to_string();
        let inner = self.inner.clone();
        self.run_blocking(move || {
            let mut profiles = inner.profiles.lock().expect("speaker registry poisoned");
            let Some(profile) = profiles.get_mut(&name) else {
                return Ok(None);
            };
            if let Some(bytes) = audio_bytes {
                write_atomic(&inner.dir.join(&profile.audio_file_name), &bytes)?;
            }
            if let Some(text) = text_reference {
                profile.text_reference = if text.trim().is_empty() {
                    None
                } else {
                    Some(text)
                };
            }
            let updated = profile.clone();
            persist(&inner, &profiles)?;
            Ok(Some(updated))
        })
        .await
    }

    /// Remove a profile and its audio file. Returns `false` if no
    /// profile by that name exists.
    pub async fn delete(&self, name: &str) -> anyhow::Result<bool> {
        let name = name.trim().to_string();
        let inner = self.inner.clone();
        self.run_blocking(move || {
            let mut profiles = inner.profiles.lock().expect("speaker registry poisoned");
            let Some(profile) = profiles.remove(&name) else {
                return Ok(false);
            };
            let audio_path = profile.audio_path(&inner.dir);
            if audio_path.is_file() {
                std::fs::remove_file(&audio_path).with_context(|| {
                    format!("failed to remove {}", audio_path.display())
                })?;
            }
            persist(&inner, &profiles)?;
            Ok(true)
        })
        .await
    }

    async fn run_blocking<F, T>(&self, task_fn: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        task::spawn_blocking(task_fn)
            .await
            .map_err(|err| anyhow!("speaker storage worker failed: {err}"))?
    }
}

fn validate_name(raw: &str) -> anyhow::Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        bail!("speaker name must be non-empty");
    }
    if name.len() > MAX_NAME_LEN {
        bail!("speaker name must be at most {MAX_NAME_LEN} characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("speaker name may only contain letters, digits, '_' and '-'");
    }
    Ok(name.to_string())
}

fn persist(inner: &Inner, profiles: &BTreeMap<String, SpeakerProfile>) -> anyhow::Result<()> {
    let list: Vec<&SpeakerProfile> = profiles.values().collect();
    let json = serde_json::to_vec_pretty(&list).context("failed to encode speaker registry")?;
    write_atomic(&inner.registry_path, &json)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_list_delete_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SpeakerStore::open(tmp.path().join("speakers")).unwrap();

        let profile = store
            .create("Alice", Some("reference line".into()), vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(profile.audio_file_name, "Alice.wav");
        assert!(profile.audio_path(store.dir()).is_file());

        assert_eq!(store.list().len(), 1);
        assert!(store.get("Alice").is_some());

        assert!(store.delete("Alice").await.unwrap());
        assert!(store.list().is_empty());
        assert!(!store.delete("Alice").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_and_invalid_names_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SpeakerStore::open(tmp.path().join("speakers")).unwrap();

        store.create("Bob", None, vec![0]).await.unwrap();
        assert!(store.create("Bob", None, vec![0]).await.is_err());
        assert!(store.create("", None, vec![0]).await.is_err());
        assert!(store
            .create("name_longer_than_sixteen", None, vec![0])
            .await
            .is_err());
        assert!(store.create("bad/name", None, vec![0]).await.is_err());
    }

    #[tokio::test]
    async fn registry_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("speakers");

        let store = SpeakerStore::open(dir.clone()).unwrap();
        store
            .create("Carol", Some("hello".into()), vec![9, 9])
            .await
            .unwrap();
        drop(store);

        let reopened = SpeakerStore::open(dir).unwrap();
        let profile = reopened.get("Carol").unwrap();
        assert_eq!(profile.text_reference.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn update_swaps_audio_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SpeakerStore::open(tmp.path().join("speakers")).unwrap();

        store.create("Dave", None, vec![1]).await.unwrap();
        let updated = store
            .update("Dave", Some("new text".into()), Some(vec![2, 2]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.text_reference.as_deref(), Some("new text"));

        let bytes = std::fs::read(updated.audio_path(store.dir())).unwrap();
        assert_eq!(bytes, vec![2, 2]);

        assert!(store.update("Nobody", None, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_clears_reference_text_on_empty_string() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SpeakerStore::open(tmp.path().join("speakers")).unwrap();

        store
            .create("Erin", Some("original".into()), vec![1])
            .await
            .unwrap();

        // None keeps the stored text.
        let kept = store.update("Erin", None, None).await.unwrap().unwrap();
        assert_eq!(kept.text_reference.as_deref(), Some("original"));

        // An empty string clears it.
        let cleared = store
            .update("Erin", Some("  ".into()), None)
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.text_reference.is_none());
    }
}
