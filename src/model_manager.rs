use std::path::{Path, PathBuf};

use chrono::Utc;
use hf_hub::api::sync::ApiBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    sentence_encoder::{self, OPTIONAL_FILES, REQUIRED_FILES, SentenceEncoder},
};

pub const DEFAULT_MODEL_ID: &str =
    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";
pub const MODEL_ENV_VAR: &str = "FAQBERT_MODEL";

const DEFAULT_OWNER: &str = "sentence-transformers";
const META_FILE: &str = "meta.json";
const HF_CACHE_DIR: &str = ".hf-cache";

/// Pick the model to use from, in order of priority:
/// 1. An explicit value (from --model)
/// 2. The FAQBERT_MODEL environment variable
/// 3. The `model_name` setting in config.redb
/// 4. The default model
pub fn pick_model_name(
    explicit: Option<&str>,
    env: Option<&str>,
    stored: Option<&str>,
) -> String {
    explicit
        .or(env)
        .or(stored)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_MODEL_ID)
        .to_string()
}

/// Expand a bare model name to a HuggingFace repository id.
///
/// `"all-MiniLM-L6-v2"` becomes `"sentence-transformers/all-MiniLM-L6-v2"`;
/// names that already carry an owner are returned unchanged.
pub fn qualify_model_id(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("{DEFAULT_OWNER}/{name}")
    }
}

/// Local directory name for a repository id (its last path segment).
pub fn short_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

/// Local model names become directories under the hub, so keep them to one
/// plain path component.
pub fn validate_model_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid model name: '{name}'")))
    }
}

/// Provenance recorded next to a downloaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub source: String,
    pub downloaded_at: String,
}

/// A model available in the local hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalModel {
    pub name: String,
    pub path: PathBuf,
    pub meta: Option<ModelMeta>,
}

/// Manages sentence encoders stored under the data directory's `hub/`.
pub struct ModelManager {
    hub_dir: PathBuf,
}

impl ModelManager {
    pub fn new(hub_dir: PathBuf) -> Self {
        Self { hub_dir }
    }

    pub fn hub_dir(&self) -> &Path {
        &self.hub_dir
    }

    pub fn local_dir(&self, name: &str) -> PathBuf {
        self.hub_dir.join(short_name(name))
    }

    /// Resolve a model reference to a directory that can be loaded: an
    /// existing model directory, a model already in the hub, or a fresh
    /// download.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let direct = Path::new(name);
        if sentence_encoder::is_model_dir(direct) {
            debug!(path = %direct.display(), "using local model directory");
            return Ok(direct.to_path_buf());
        }

        let local = self.local_dir(name);
        if sentence_encoder::is_model_dir(&local) {
            debug!(path = %local.display(), "using cached model");
            return Ok(local);
        }

        self.download(name, None)
    }

    /// Resolve and load `name` as a [`SentenceEncoder`].
    pub fn load_encoder(&self, name: &str) -> Result<SentenceEncoder> {
        let dir = self.resolve(name)?;
        let encoder = SentenceEncoder::load(&dir)?;
        let recorded = if Path::new(name).is_dir() {
            short_name(name).to_string()
        } else {
            qualify_model_id(name)
        };
        Ok(encoder.with_name(recorded))
    }

    /// Fetch a model from the HuggingFace Hub into `hub/<save_as>` (the
    /// repository's short name by default).
    pub fn download(&self, name: &str, save_as: Option<&str>) -> Result<PathBuf> {
        let model_id = qualify_model_id(name);
        let local_name = save_as.unwrap_or(short_name(&model_id));
        validate_model_name(local_name)?;
        let target = self.hub_dir.join(local_name);
        info!(model = %model_id, target = %target.display(), "downloading model");

        let api = ApiBuilder::new()
            .with_cache_dir(self.hub_dir.join(HF_CACHE_DIR))
            .with_progress(false)
            .build()?;
        let repo = api.model(model_id.clone());

        std::fs::create_dir_all(&target)?;
        for file in REQUIRED_FILES {
            let fetched = repo.get(file)?;
            std::fs::copy(&fetched, target.join(file))?;
        }
        for file in OPTIONAL_FILES {
            match repo.get(file) {
                Ok(fetched) => {
                    let to = target.join(file);
                    if let Some(parent) = to.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&fetched, to)?;
                }
                Err(e) => debug!(file, error = %e, "optional model file unavailable"),
            }
        }

        let meta = ModelMeta {
            source: model_id,
            downloaded_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(target.join(META_FILE), serde_json::to_vec_pretty(&meta)?)?;

        info!(path = %target.display(), "model saved");
        Ok(target)
    }

    /// Models present in the hub, sorted by name.
    pub fn list(&self) -> Result<Vec<LocalModel>> {
        if !self.hub_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut models = Vec::new();
        for entry in std::fs::read_dir(&self.hub_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if name.starts_with('.') || !sentence_encoder::is_model_dir(&path) {
                continue;
            }
            let meta = match std::fs::read(path.join(META_FILE)) {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        warn!(model = %name, error = %e, "ignoring unreadable model metadata");
                        None
                    }
                },
                Err(_) => None,
            };
            models.push(LocalModel { name, path, meta });
        }
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    /// Delete a model from the hub.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_model_name(name)?;
        let dir = self.hub_dir.join(name);
        if !dir.is_dir() {
            return Err(Error::NotFound {
                kind: "model",
                name: name.to_string(),
            });
        }
        std::fs::remove_dir_all(&dir)?;
        info!(model = name, "model removed");
        Ok(())
    }

    /// Drop the HuggingFace download cache. Returns whether anything was
    /// removed.
    pub fn clear_cache(&self) -> Result<bool> {
        let cache = self.hub_dir.join(HF_CACHE_DIR);
        if !cache.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&cache)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_model(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        for file in REQUIRED_FILES {
            std::fs::write(dir.join(file), "{}").unwrap();
        }
    }

    #[test]
    fn model_name_priority() {
        assert_eq!(pick_model_name(Some("a"), Some("b"), Some("c")), "a");
        assert_eq!(pick_model_name(None, Some("b"), Some("c")), "b");
        assert_eq!(pick_model_name(None, None, Some("c")), "c");
        assert_eq!(pick_model_name(None, None, None), DEFAULT_MODEL_ID);
        assert_eq!(pick_model_name(None, Some("  "), None), DEFAULT_MODEL_ID);
    }

    #[test]
    fn qualifies_bare_names() {
        assert_eq!(
            qualify_model_id("all-MiniLM-L6-v2"),
            "sentence-transformers/all-MiniLM-L6-v2"
        );
        assert_eq!(qualify_model_id("org/model"), "org/model");
        assert_eq!(short_name("org/model"), "model");
        assert_eq!(short_name("model"), "model");
    }

    #[test]
    fn resolve_prefers_cached_model() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path().to_path_buf());
        fake_model(&tmp.path().join("tiny"));

        let resolved = manager.resolve("someone/tiny").unwrap();
        assert_eq!(resolved, tmp.path().join("tiny"));
    }

    #[test]
    fn resolve_accepts_model_directory_path() {
        let tmp = tempfile::tempdir().unwrap();
        let model_dir = tmp.path().join("elsewhere");
        fake_model(&model_dir);
        let manager = ModelManager::new(tmp.path().join("hub"));

        let resolved = manager.resolve(&model_dir.to_string_lossy()).unwrap();
        assert_eq!(resolved, model_dir);
    }

    #[test]
    fn list_skips_hidden_and_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path().to_path_buf());
        fake_model(&tmp.path().join("b-model"));
        fake_model(&tmp.path().join("a-model"));
        fake_model(&tmp.path().join(HF_CACHE_DIR));
        std::fs::create_dir(tmp.path().join("partial")).unwrap();
        std::fs::write(
            tmp.path().join("a-model").join(META_FILE),
            r#"{"source": "org/a-model", "downloaded_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let models = manager.list().unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a-model", "b-model"]);
        assert_eq!(
            models[0].meta.as_ref().map(|m| m.source.as_str()),
            Some("org/a-model")
        );
        assert!(models[1].meta.is_none());
    }

    #[test]
    fn list_missing_hub_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path().join("missing"));
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn remove_model() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path().to_path_buf());
        fake_model(&tmp.path().join("tiny"));

        manager.remove("tiny").unwrap();
        assert!(!tmp.path().join("tiny").exists());
        assert!(matches!(
            manager.remove("tiny"),
            Err(Error::NotFound { kind: "model", .. })
        ));
    }

    #[test]
    fn remove_rejects_paths_outside_the_hub() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = tmp.path().join("hub");
        fake_model(&hub.join("tiny"));
        let sibling = tmp.path().join("build").join("support");
        std::fs::create_dir_all(&sibling).unwrap();
        let manager = ModelManager::new(hub.clone());

        for name in ["tiny/../x", "tiny/../../build/support", "..", "a\\b", ""] {
            assert!(
                matches!(manager.remove(name), Err(Error::Config(_))),
                "{name}"
            );
        }
        assert!(sibling.is_dir());
        assert!(hub.join("tiny").is_dir());
    }

    #[test]
    fn download_rejects_invalid_local_name() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path().join("hub"));

        for save_as in ["../escape", "a/b", ".hidden"] {
            assert!(
                matches!(
                    manager.download("org/model", Some(save_as)),
                    Err(Error::Config(_))
                ),
                "{save_as}"
            );
        }
        assert!(!tmp.path().join("escape").exists());
    }

    #[test]
    fn clear_cache_reports_removal() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(tmp.path().to_path_buf());
        assert!(!manager.clear_cache().unwrap());

        std::fs::create_dir_all(tmp.path().join(HF_CACHE_DIR).join("x")).unwrap();
        assert!(manager.clear_cache().unwrap());
        assert!(!tmp.path().join(HF_CACHE_DIR).exists());
    }
}
