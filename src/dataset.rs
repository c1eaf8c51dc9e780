use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One logical question group with its candidate answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqRecord {
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

/// A validated FAQ dataset: every record has a non-empty answer list.
///
/// # Examples
///
/// ```
/// use faqbert::dataset::FaqDataset;
///
/// let json = r#"[{"questions": ["hi", "hello"], "answers": ["Hi there!"]}]"#;
/// let dataset = FaqDataset::from_json_str("greetings.json", json).unwrap();
/// assert_eq!(dataset.records().len(), 1);
/// assert_eq!(dataset.question_count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaqDataset {
    name: String,
    records: Vec<FaqRecord>,
}

impl FaqDataset {
    /// Read and validate a dataset file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::DatasetNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_json_str(&name, &contents)
    }

    /// Parse and validate dataset JSON. `name` is recorded as the source
    /// in pipeline metadata.
    pub fn from_json_str(name: &str, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| {
            Error::InvalidFormat(format!("JSON format error: {e}"))
        })?;

        let Value::Array(items) = value else {
            return Err(Error::InvalidFormat(
                "data should be an array of objects".into(),
            ));
        };

        let records = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| parse_record(i, item))
            .collect::<Result<Vec<_>>>()?;

        Self::from_records(name, records)
    }

    pub fn from_records(name: &str, records: Vec<FaqRecord>) -> Result<Self> {
        if let Some(i) = records.iter().position(|r| r.answers.is_empty()) {
            return Err(Error::InvalidFormat(format!(
                "record {i}: answer list cannot be empty"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            records,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[FaqRecord] {
        &self.records
    }

    /// Total number of question variants across all records.
    pub fn question_count(&self) -> usize {
        self.records.iter().map(|r| r.questions.len()).sum()
    }
}

fn parse_record(index: usize, item: Value) -> Result<FaqRecord> {
    let has_keys = item
        .as_object()
        .is_some_and(|o| o.contains_key("questions") && o.contains_key("answers"));
    if !has_keys {
        return Err(Error::InvalidFormat(format!(
            "record {index}: each item must contain 'questions' and 'answers'"
        )));
    }
    serde_json::from_value(item).map_err(|e| {
        Error::InvalidFormat(format!(
            "record {index}: 'questions' and 'answers' must be lists of strings ({e})"
        ))
    })
}

/// Resolve a dataset reference to a file path.
///
/// An existing path is used as-is. Otherwise the name is looked up in
/// `datasets_dir`, with `.json` appended when it has no extension.
pub fn resolve_dataset_path(datasets_dir: &Path, reference: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(reference);
    if direct.is_file() {
        return Ok(direct);
    }

    let file_name = if reference.ends_with(".json") {
        reference.to_string()
    } else {
        format!("{reference}.json")
    };
    let candidate = datasets_dir.join(file_name);
    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(Error::DatasetNotFound(candidate))
    }
}

/// A dataset file available for building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// List `*.json` files in `datasets_dir`, sorted by name.
pub fn list_datasets(datasets_dir: &Path) -> Result<Vec<DatasetInfo>> {
    let matcher = globset::Glob::new("*.json")
        .map_err(|e| Error::Config(format!("invalid glob pattern: {e}")))?
        .compile_matcher();

    let mut datasets = Vec::new();
    for entry in std::fs::read_dir(datasets_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() || !matcher.is_match(entry.file_name()) {
            continue;
        }
        datasets.push(DatasetInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
            size: metadata.len(),
        });
    }
    datasets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(datasets)
}
