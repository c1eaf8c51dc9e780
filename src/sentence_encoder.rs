use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use serde::Deserialize;
use tokenizers::{
    PaddingDirection,
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationDirection,
    TruncationParams,
    TruncationStrategy,
};
use tracing::{debug, info};

use crate::{
    embedding::EmbeddingMatrix,
    encoder::Encoder,
    error::{Error, Result},
};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const SBERT_CONFIG_FILE: &str = "sentence_bert_config.json";
pub const MODULES_FILE: &str = "modules.json";
pub const POOLING_CONFIG_FILE: &str = "1_Pooling/config.json";

/// Files a model directory must contain.
pub const REQUIRED_FILES: &[&str] = &[CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE];

/// Files copied along when present.
pub const OPTIONAL_FILES: &[&str] =
    &[SBERT_CONFIG_FILE, MODULES_FILE, POOLING_CONFIG_FILE];

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// How token embeddings are reduced to one sentence vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Average of token embeddings, weighted by the attention mask.
    Mean,
    /// Embedding of the first (`[CLS]`) token.
    Cls,
}

#[derive(Debug, Deserialize)]
struct SbertConfig {
    max_seq_length: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PoolingConfig {
    #[serde(default)]
    pooling_mode_cls_token: bool,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    #[serde(rename = "type")]
    kind: String,
}

/// A BERT sentence-transformers model running on candle.
pub struct SentenceEncoder {
    name: String,
    root: PathBuf,
    model: BertModel,
    tokenizer: Tokenizer,
    pooling: Pooling,
    normalize: bool,
    max_seq_length: usize,
    device: Device,
}

impl SentenceEncoder {
    /// Load a model from a directory holding `config.json`,
    /// `tokenizer.json` and `model.safetensors`, plus the optional
    /// sentence-transformers descriptors.
    pub fn load(dir: &Path) -> Result<Self> {
        for file in REQUIRED_FILES {
            if !dir.join(file).is_file() {
                return Err(Error::Encoder(format!(
                    "model directory {} is missing {file}",
                    dir.display()
                )));
            }
        }

        let config: Config =
            serde_json::from_slice(&std::fs::read(dir.join(CONFIG_FILE))?)?;

        let max_seq_length = read_optional::<SbertConfig>(&dir.join(SBERT_CONFIG_FILE))?
            .and_then(|c| c.max_seq_length)
            .unwrap_or(config.max_position_embeddings)
            .min(config.max_position_embeddings);

        let pooling = match read_optional::<PoolingConfig>(&dir.join(POOLING_CONFIG_FILE))? {
            Some(c) if c.pooling_mode_cls_token => Pooling::Cls,
            _ => Pooling::Mean,
        };

        let normalize = read_optional::<Vec<ModuleEntry>>(&dir.join(MODULES_FILE))?
            .is_some_and(|modules| modules.iter().any(|m| m.kind.ends_with("Normalize")));

        let mut tokenizer = Tokenizer::from_file(dir.join(TOKENIZER_FILE))
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        let pad_id = config.pad_token_id as u32;
        let pad_token = tokenizer
            .id_to_token(pad_id)
            .unwrap_or_else(|| "[PAD]".to_string());
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id,
            pad_type_id: 0,
            pad_token,
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_length,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let device = default_device();
        let weights = std::fs::read(dir.join(WEIGHTS_FILE))?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DTYPE, &device)?;
        let model = BertModel::load(vb, &config)?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());

        info!(
            model = %name,
            hidden_size = config.hidden_size,
            max_seq_length,
            ?pooling,
            normalize,
            "sentence encoder loaded"
        );

        Ok(Self {
            name,
            root: dir.to_path_buf(),
            model,
            tokenizer,
            pooling,
            normalize,
            max_seq_length,
            device,
        })
    }

    /// Override the recorded model name (the directory name by default).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn tokenize(&self, texts: &[String]) -> Result<(Tensor, Tensor, Tensor)> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut type_ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend_from_slice(encoding.get_ids());
            type_ids.extend_from_slice(encoding.get_type_ids());
            mask.extend_from_slice(encoding.get_attention_mask());
        }

        let shape = (batch, seq_len);
        Ok((
            Tensor::from_vec(ids, shape, &self.device)?,
            Tensor::from_vec(type_ids, shape, &self.device)?,
            Tensor::from_vec(mask, shape, &self.device)?,
        ))
    }

    fn pool(&self, hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let pooled = match self.pooling {
            Pooling::Cls => hidden.narrow(1, 0, 1)?.squeeze(1)?,
            Pooling::Mean => {
                let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
                let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
                let counts = mask.sum(1)?;
                summed.broadcast_div(&counts)?
            }
        };
        if self.normalize {
            let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
            Ok(pooled.broadcast_div(&norms)?)
        } else {
            Ok(pooled)
        }
    }
}

impl Encoder for SentenceEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix> {
        if texts.is_empty() {
            return Ok(EmbeddingMatrix::empty(0));
        }

        let (ids, type_ids, mask) = self.tokenize(texts)?;
        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;
        let pooled = self.pool(&hidden, &mask)?.to_dtype(DType::F32)?;

        let (rows, dim) = pooled.dims2()?;
        let data = pooled.flatten_all()?.to_vec1::<f32>()?;
        debug!(rows, dim, "encoded batch");
        EmbeddingMatrix::from_flat(rows, dim, data)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        copy_model_files(&self.root, dir)
    }
}

/// Copy the required and any present optional model files from `src` to
/// `dst`, creating directories as needed.
pub fn copy_model_files(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for file in REQUIRED_FILES {
        std::fs::copy(src.join(file), dst.join(file))?;
    }
    for file in OPTIONAL_FILES {
        let from = src.join(file);
        if !from.is_file() {
            continue;
        }
        let to = dst.join(file);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)?;
    }
    Ok(())
}

/// True when `dir` holds everything [`SentenceEncoder::load`] needs.
pub fn is_model_dir(dir: &Path) -> bool {
    REQUIRED_FILES.iter().all(|f| dir.join(f).is_file())
}

fn read_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&std::fs::read(path)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, contents: &str) {
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn load_reports_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), CONFIG_FILE, "{}");
        let err = SentenceEncoder::load(tmp.path()).err().unwrap();
        assert!(matches!(err, Error::Encoder(ref m) if m.contains(TOKENIZER_FILE)));
    }

    #[test]
    fn model_dir_detection() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_model_dir(tmp.path()));
        for file in REQUIRED_FILES {
            write(tmp.path(), file, "x");
        }
        assert!(is_model_dir(tmp.path()));
    }

    #[test]
    fn copy_includes_optional_files_when_present() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        for file in REQUIRED_FILES {
            write(src.path(), file, file);
        }
        write(src.path(), POOLING_CONFIG_FILE, "{}");

        let target = dst.path().join("model_files");
        copy_model_files(src.path(), &target).unwrap();

        assert!(is_model_dir(&target));
        assert!(target.join(POOLING_CONFIG_FILE).is_file());
        assert!(!target.join(MODULES_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(target.join(WEIGHTS_FILE)).unwrap(),
            WEIGHTS_FILE
        );
    }

    #[test]
    fn optional_config_parsing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_optional::<SbertConfig>(&tmp.path().join("none.json"))
            .unwrap()
            .is_none());

        write(tmp.path(), SBERT_CONFIG_FILE, r#"{"max_seq_length": 128, "do_lower_case": false}"#);
        let sbert = read_optional::<SbertConfig>(&tmp.path().join(SBERT_CONFIG_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(sbert.max_seq_length, Some(128));

        write(
            tmp.path(),
            MODULES_FILE,
            r#"[{"idx": 0, "type": "sentence_transformers.models.Transformer"},
                {"idx": 1, "type": "sentence_transformers.models.Normalize"}]"#,
        );
        let modules = read_optional::<Vec<ModuleEntry>>(&tmp.path().join(MODULES_FILE))
            .unwrap()
            .unwrap();
        assert!(modules.iter().any(|m| m.kind.ends_with("Normalize")));
    }

    const TINY_BERT_CONFIG: &str = r#"{
        "vocab_size": 12,
        "hidden_size": 8,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.0,
        "max_position_embeddings": 32,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": false,
        "classifier_dropout": null,
        "model_type": "bert"
    }"#;

    const TINY_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "[PAD]": 0, "[UNK]": 1, "hello": 2, "how": 3, "are": 4,
                "you": 5, "today": 6, "world": 7, "reset": 8, "my": 9,
                "password": 10, "please": 11
            },
            "unk_token": "[UNK]"
        }
    }"#;

    /// Write a randomly initialised one-layer BERT plus a word-level
    /// tokenizer into `dir`.
    fn write_tiny_model(dir: &Path, pooling: Pooling, normalize: bool) {
        write(dir, CONFIG_FILE, TINY_BERT_CONFIG);
        write(dir, TOKENIZER_FILE, TINY_TOKENIZER);

        let config: Config = serde_json::from_str(TINY_BERT_CONFIG).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        BertModel::load(vb, &config).unwrap();
        varmap.save(dir.join(WEIGHTS_FILE)).unwrap();

        if pooling == Pooling::Cls {
            write(dir, POOLING_CONFIG_FILE, r#"{"pooling_mode_cls_token": true}"#);
        }
        if normalize {
            write(
                dir,
                MODULES_FILE,
                r#"[{"idx": 0, "type": "sentence_transformers.models.Transformer"},
                    {"idx": 1, "type": "sentence_transformers.models.Normalize"}]"#,
            );
        }
    }

    fn norm(row: &[f32]) -> f32 {
        row.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn padded_batch_matches_single_encodings() {
        let texts: Vec<String> = [
            "hello",
            "how are you today",
            "reset my password please",
            "hello world",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        for pooling in [Pooling::Mean, Pooling::Cls] {
            for normalize in [false, true] {
                let tmp = tempfile::tempdir().unwrap();
                write_tiny_model(tmp.path(), pooling, normalize);

                let encoder = SentenceEncoder::load(tmp.path()).unwrap();
                assert_eq!(encoder.pooling, pooling);
                assert_eq!(encoder.normalize, normalize);
                assert_eq!(encoder.max_seq_length(), 32);

                let batch = encoder.encode(&texts).unwrap();
                assert_eq!(batch.rows(), texts.len());
                assert_eq!(batch.dim(), 8);

                for (i, text) in texts.iter().enumerate() {
                    let single = encoder.encode_one(text).unwrap();
                    assert_eq!(single.len(), 8);
                    for (a, b) in batch.row(i).iter().zip(&single) {
                        assert!(
                            (a - b).abs() < 1e-4,
                            "{pooling:?} normalize={normalize} row {i}: {a} vs {b}"
                        );
                    }
                    if normalize {
                        assert!((norm(batch.row(i)) - 1.0).abs() < 1e-4);
                    }
                }

                assert_ne!(batch.row(0), batch.row(1));
            }
        }
    }

    #[test]
    fn saved_model_reloads_with_same_output() {
        let src = tempfile::tempdir().unwrap();
        write_tiny_model(src.path(), Pooling::Cls, true);
        let encoder = SentenceEncoder::load(src.path()).unwrap();

        let dst = tempfile::tempdir().unwrap();
        encoder.save(dst.path()).unwrap();
        let reloaded = SentenceEncoder::load(dst.path()).unwrap();
        assert_eq!(reloaded.pooling, Pooling::Cls);
        assert!(reloaded.normalize);

        let texts = vec!["how are you".to_string()];
        let a = encoder.encode(&texts).unwrap();
        let b = reloaded.encode(&texts).unwrap();
        for (x, y) in a.row(0).iter().zip(b.row(0)) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
