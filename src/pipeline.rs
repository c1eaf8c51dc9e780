use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    embedding::EmbeddingMatrix,
    encoder::Encoder,
    error::{Error, Result},
    strategy::AnswerStrategy,
};

pub const EMBEDDINGS_FILE: &str = "question_embeddings.npy";
pub const ANSWERS_FILE: &str = "answers.json";
pub const META_FILE: &str = "meta.json";
pub const MODEL_DIR: &str = "model_files";

/// Encoder details recorded with a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub source: String,
    pub embedding_dim: usize,
    pub max_seq_length: usize,
    #[serde(default = "default_model_files_path")]
    pub model_files_path: String,
}

fn default_model_files_path() -> String {
    MODEL_DIR.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub answer_strategy: AnswerStrategy,
    pub created_at: String,
    #[serde(default)]
    pub chunk_size: usize,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub source_data: String,
    pub questions_count: usize,
    pub answers_count: usize,
    pub model_info: ModelInfo,
    pub training_params: TrainingParams,
}

/// The persisted unit produced by a build: one embedding per training
/// question, the answer paired with each row, and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineIndex {
    pub embeddings: EmbeddingMatrix,
    pub answers: Vec<String>,
    pub meta: PipelineMeta,
}

impl PipelineIndex {
    /// Write the index and the encoder into an existing directory.
    pub fn write_to(&self, dir: &Path, encoder: &dyn Encoder) -> Result<()> {
        self.embeddings.write_npy(&dir.join(EMBEDDINGS_FILE))?;
        std::fs::write(
            dir.join(ANSWERS_FILE),
            serde_json::to_string_pretty(&self.answers)?,
        )?;
        std::fs::write(
            dir.join(META_FILE),
            serde_json::to_string_pretty(&self.meta)?,
        )?;

        let model_dir = dir.join(MODEL_DIR);
        std::fs::create_dir_all(&model_dir)?;
        encoder.save(&model_dir)?;
        Ok(())
    }

    /// Load the index data from a pipeline directory. Every artifact,
    /// including the saved encoder, must be present.
    pub fn load(dir: &Path) -> Result<Self> {
        check_artifacts(dir)?;

        let embeddings = EmbeddingMatrix::read_npy(&dir.join(EMBEDDINGS_FILE))?;
        let answers: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(dir.join(ANSWERS_FILE))?)
                .map_err(|e| {
                    Error::InvalidFormat(format!("{ANSWERS_FILE}: {e}"))
                })?;
        let meta = read_meta(&dir.join(META_FILE))?;

        if embeddings.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "{} has no stored embeddings",
                dir.display()
            )));
        }
        if embeddings.rows() != answers.len() {
            return Err(Error::InvalidFormat(format!(
                "{} embedding rows but {} answers",
                embeddings.rows(),
                answers.len()
            )));
        }

        Ok(Self {
            embeddings,
            answers,
            meta,
        })
    }
}

/// Fail with `IndexNotFound` naming the first missing artifact.
pub fn check_artifacts(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::IndexNotFound {
            path: dir.to_path_buf(),
            missing: "pipeline directory",
        });
    }
    for name in [MODEL_DIR, EMBEDDINGS_FILE, ANSWERS_FILE, META_FILE] {
        if !dir.join(name).exists() {
            return Err(Error::IndexNotFound {
                path: dir.to_path_buf(),
                missing: name,
            });
        }
    }
    Ok(())
}

fn read_meta(path: &Path) -> Result<PipelineMeta> {
    serde_json::from_str(&std::fs::read_to_string(path)?)
        .map_err(|e| Error::InvalidFormat(format!("{META_FILE}: {e}")))
}

/// Pipeline names become directory names, so keep them to one plain path
/// component.
pub fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if ok {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid pipeline name: '{name}'")))
    }
}

/// Persist `index` as `<pipelines_dir>/<name>`, replacing any pipeline of
/// the same name.
///
/// Everything is written to a hidden staging directory first and renamed
/// into place only once complete, so a failed build never leaves a
/// half-written pipeline behind.
pub fn persist(
    pipelines_dir: &Path,
    name: &str,
    index: &PipelineIndex,
    encoder: &dyn Encoder,
) -> Result<PathBuf> {
    validate_name(name)?;
    std::fs::create_dir_all(pipelines_dir)?;

    let staging =
        pipelines_dir.join(format!(".{name}.partial-{}", std::process::id()));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    if let Err(e) = index.write_to(&staging, encoder) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let target = pipelines_dir.join(name);
    let backup =
        pipelines_dir.join(format!(".{name}.previous-{}", std::process::id()));
    if let Err(e) = swap_into_place(&staging, &target, &backup) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    info!(path = %target.display(), "pipeline saved");
    Ok(target)
}

/// Move `staging` to `target`. An existing `target` is renamed to `backup`
/// first and only deleted once the new directory is in place; if the final
/// rename fails it is moved back.
fn swap_into_place(staging: &Path, target: &Path, backup: &Path) -> Result<()> {
    let replacing = target.exists();
    if replacing {
        debug!(path = %target.display(), "replacing existing pipeline");
        if backup.exists() {
            std::fs::remove_dir_all(backup)?;
        }
        std::fs::rename(target, backup)?;
    }

    if let Err(e) = std::fs::rename(staging, target) {
        if replacing {
            std::fs::rename(backup, target)?;
        }
        return Err(e.into());
    }

    if replacing && let Err(e) = std::fs::remove_dir_all(backup) {
        warn!(path = %backup.display(), "could not remove previous pipeline: {e}");
    }
    Ok(())
}

/// A built pipeline found on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub name: String,
    pub source: String,
    pub questions: usize,
    pub created_at: String,
    pub path: PathBuf,
    pub strategy: AnswerStrategy,
    pub model_info: ModelInfo,
}

/// Scan `pipelines_dir` for directories with readable metadata, sorted by
/// name. Unreadable metadata is logged and skipped.
pub fn list_pipelines(pipelines_dir: &Path) -> Result<Vec<PipelineSummary>> {
    let mut pipelines = Vec::new();
    if !pipelines_dir.is_dir() {
        return Ok(pipelines);
    }

    for entry in std::fs::read_dir(pipelines_dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !path.is_dir() || name.starts_with('.') {
            continue;
        }
        let meta_path = path.join(META_FILE);
        if !meta_path.exists() {
            continue;
        }
        match read_meta(&meta_path) {
            Ok(meta) => pipelines.push(PipelineSummary {
                name,
                source: meta.source_data,
                questions: meta.questions_count,
                created_at: meta.training_params.created_at,
                path,
                strategy: meta.training_params.answer_strategy,
                model_info: meta.model_info,
            }),
            Err(e) => {
                warn!(path = %meta_path.display(), "skipping pipeline: {e}");
            }
        }
    }

    pipelines.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(pipelines)
}

/// Delete a built pipeline directory.
pub fn remove_pipeline(pipelines_dir: &Path, name: &str) -> Result<()> {
    validate_name(name)?;
    let path = pipelines_dir.join(name);
    if !path.is_dir() {
        return Err(Error::NotFound {
            kind: "pipeline",
            name: name.to_string(),
        });
    }
    std::fs::remove_dir_all(&path)?;
    info!(path = %path.display(), "pipeline removed");
    Ok(())
}
