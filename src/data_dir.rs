use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "FAQBERT_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The FAQBERT_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/faqbert/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("faqbert")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join("config.redb")
    }

    /// Directory holding FAQ dataset files (`*.json`).
    pub fn datasets_dir(&self) -> Result<PathBuf> {
        self.ensure("data")
    }

    /// Directory holding built pipelines, one sub-directory each.
    pub fn pipelines_dir(&self) -> Result<PathBuf> {
        self.ensure("build")
    }

    /// Directory holding locally cached encoders.
    pub fn hub_dir(&self) -> Result<PathBuf> {
        self.ensure("hub")
    }

    fn ensure(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.config_db(), tmp.path().join("config.redb"));
    }

    #[test]
    fn sub_directories_are_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        let data = dir.datasets_dir().unwrap();
        let build = dir.pipelines_dir().unwrap();
        let hub = dir.hub_dir().unwrap();

        assert_eq!(data, tmp.path().join("data"));
        assert_eq!(build, tmp.path().join("build"));
        assert_eq!(hub, tmp.path().join("hub"));
        assert!(data.is_dir() && build.is_dir() && hub.is_dir());
    }

    #[test]
    fn resolve_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();
        assert!(dir.root().is_dir());
    }
}
