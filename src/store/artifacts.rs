//! Model artifact store.
//!
//! Artifacts are JSON parameter sets on the local filesystem; the handle
//! stored in the registry is the file path. A process-local cache keeps
//! deserialized models hot, keyed by (handle, artifact mtime) so replacing
//! the file behind a handle can never serve the old parameters.

use crate::models::{ModelFamily, ModelVersion};
use crate::predict::artifact::ModelArtifact;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why an entry left the model handle cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    Capacity,
    Expired,
    Replaced,
    Removed,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Capacity => "capacity",
            Self::Expired => "expired",
            Self::Replaced => "replaced",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

const ABSOLUTE_TTL: Duration = Duration::from_secs(24 * 3600);
const SLIDING_TTL: Duration = Duration::from_secs(3600);

struct CachedModel {
    model: Arc<ModelArtifact>,
    /// Artifact mtime (unix seconds) at load time.
    mtime: i64,
    loaded_at: Instant,
    last_access: Instant,
}

impl CachedModel {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.loaded_at) > ABSOLUTE_TTL
            || now.duration_since(self.last_access) > SLIDING_TTL
    }
}

pub struct ModelStore {
    root: PathBuf,
    capacity: usize,
    cache: Mutex<HashMap<String, CachedModel>>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create artifact root {}", root.display()))?;
        Ok(Self {
            root,
            capacity: capacity.max(1),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Persist an artifact and return its opaque handle.
    pub fn persist(
        &self,
        family: ModelFamily,
        version: ModelVersion,
        artifact: &ModelArtifact,
    ) -> Result<String> {
        let dir = self.root.join(family.as_str());
        fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{}-{}.json", version, uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec(artifact)?;
        fs::write(&file, bytes)
            .with_context(|| format!("write artifact {}", file.display()))?;
        Ok(file.to_string_lossy().into_owned())
    }

    /// Load a model, via the handle cache when possible.
    pub fn load(&self, handle: &str) -> Result<Arc<ModelArtifact>> {
        let mtime = file_mtime(Path::new(handle))?;
        let now = Instant::now();

        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get_mut(handle) {
                if entry.mtime != mtime {
                    debug!(handle, reason = %EvictReason::Replaced, "Model cache evict");
                    cache.remove(handle);
                } else if entry.expired(now) {
                    debug!(handle, reason = %EvictReason::Expired, "Model cache evict");
                    cache.remove(handle);
                } else {
                    entry.last_access = now;
                    return Ok(entry.model.clone());
                }
            }
        }

        let bytes = fs::read(handle).with_context(|| format!("read artifact {handle}"))?;
        let model: ModelArtifact =
            serde_json::from_slice(&bytes).with_context(|| format!("parse artifact {handle}"))?;
        let model = Arc::new(model);

        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity {
            // Evict the least-recently-used entry.
            if let Some(victim) = cache
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                debug!(handle = %victim, reason = %EvictReason::Capacity, "Model cache evict");
                cache.remove(&victim);
            }
        }
        cache.insert(
            handle.to_string(),
            CachedModel {
                model: model.clone(),
                mtime,
                loaded_at: now,
                last_access: now,
            },
        );
        Ok(model)
    }

    /// Drop a handle from the cache (registry row deleted, artifact gone).
    pub fn remove(&self, handle: &str) {
        if self.cache.lock().remove(handle).is_some() {
            debug!(handle, reason = %EvictReason::Removed, "Model cache evict");
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

fn file_mtime(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path).with_context(|| format!("stat artifact {}", path.display()))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64);
    match mtime {
        Some(t) => Ok(t),
        None => {
            warn!(path = %path.display(), "Artifact mtime unavailable, cache disabled for handle");
            Ok(0)
        }
    }
}
