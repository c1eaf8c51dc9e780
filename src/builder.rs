use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
    dataset::FaqDataset,
    embedding::EmbeddingMatrix,
    encoder::Encoder,
    error::{Error, Result},
    pipeline::{self, MODEL_DIR, ModelInfo, PipelineIndex, PipelineMeta, TrainingParams},
    strategy::{AnswerSelector, AnswerStrategy},
};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Knobs for one build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    pub strategy: AnswerStrategy,
    /// Questions encoded per encoder call.
    pub chunk_size: usize,
    /// Seed for the `random` strategy; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            strategy: AnswerStrategy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            seed: None,
        }
    }
}

/// Index-aligned question/answer pairs collected from a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSet {
    pub questions: Vec<String>,
    pub answers: Vec<String>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.questions
            .iter()
            .map(String::as_str)
            .zip(self.answers.iter().map(String::as_str))
    }
}

/// Turns a dataset into a [`PipelineIndex`].
pub struct IndexBuilder<'a> {
    encoder: &'a dyn Encoder,
    selector: AnswerSelector,
    chunk_size: usize,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(encoder: &'a dyn Encoder, options: &BuildOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            return Err(Error::Config("chunk size must be at least 1".into()));
        }
        let selector = match options.seed {
            Some(seed) => AnswerSelector::seeded(options.strategy, seed),
            None => AnswerSelector::new(options.strategy),
        };
        Ok(Self {
            encoder,
            selector,
            chunk_size: options.chunk_size,
        })
    }

    pub fn strategy(&self) -> AnswerStrategy {
        self.selector.strategy()
    }

    /// Pair every question variant with an answer chosen by the strategy.
    pub fn collect_training_set(&mut self, dataset: &FaqDataset) -> Result<TrainingSet> {
        let mut set = TrainingSet::default();
        for record in dataset.records() {
            for (i, question) in record.questions.iter().enumerate() {
                let answer =
                    self.selector.select(self.encoder, question, &record.answers, i)?;
                set.questions.push(question.clone());
                set.answers.push(answer);
            }
        }

        if set.is_empty() {
            return Err(Error::EmptyTrainingSet);
        }
        Ok(set)
    }

    /// Encode `questions` in sequential batches of `chunk_size`, keeping
    /// input order. `progress` receives `(encoded, total)` after each batch.
    pub fn encode_questions<F>(
        &self,
        questions: &[String],
        mut progress: F,
    ) -> Result<EmbeddingMatrix>
    where
        F: FnMut(usize, usize),
    {
        let total = questions.len();
        let mut matrix = EmbeddingMatrix::empty(0);

        for batch in questions.chunks(self.chunk_size) {
            let encoded = self.encoder.encode(batch)?;
            if encoded.rows() != batch.len() {
                return Err(Error::Encoder(format!(
                    "encoder returned {} rows for a batch of {}",
                    encoded.rows(),
                    batch.len()
                )));
            }
            matrix.append(encoded)?;
            debug!(encoded = matrix.rows(), total, "encoded question batch");
            progress(matrix.rows(), total);
        }

        Ok(matrix)
    }

    /// Build an in-memory index from `dataset`. Nothing is written to disk.
    pub fn build<F>(&mut self, dataset: &FaqDataset, progress: F) -> Result<PipelineIndex>
    where
        F: FnMut(usize, usize),
    {
        info!(
            dataset = dataset.name(),
            strategy = %self.strategy(),
            "collecting training pairs"
        );
        let training = self.collect_training_set(dataset)?;

        info!(
            questions = training.len(),
            chunk_size = self.chunk_size,
            "encoding questions"
        );
        let embeddings = self.encode_questions(&training.questions, progress)?;

        let meta = PipelineMeta {
            source_data: dataset.name().to_string(),
            questions_count: training.questions.len(),
            answers_count: training.answers.len(),
            model_info: ModelInfo {
                name: self.encoder.name().to_string(),
                source: "local_hub".to_string(),
                embedding_dim: embeddings.dim(),
                max_seq_length: self.encoder.max_seq_length(),
                model_files_path: MODEL_DIR.to_string(),
            },
            training_params: TrainingParams {
                answer_strategy: self.strategy(),
                created_at: chrono::Local::now()
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
                chunk_size: self.chunk_size,
            },
        };

        Ok(PipelineIndex {
            embeddings,
            answers: training.answers,
            meta,
        })
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub name: String,
    pub path: PathBuf,
    pub questions: usize,
    pub answers: usize,
    pub embedding_shape: (usize, usize),
}

/// Load `dataset_path`, build an index with `encoder` and persist it as
/// `<pipelines_dir>/<name>`. The pipeline directory only appears once
/// everything has been computed and written.
pub fn build_pipeline<F>(
    dataset_path: &Path,
    pipelines_dir: &Path,
    name: &str,
    encoder: &dyn Encoder,
    options: &BuildOptions,
    progress: F,
) -> Result<BuildReport>
where
    F: FnMut(usize, usize),
{
    pipeline::validate_name(name)?;
    let dataset = FaqDataset::load(dataset_path)?;
    let mut builder = IndexBuilder::new(encoder, options)?;
    let index = builder.build(&dataset, progress)?;
    let path = pipeline::persist(pipelines_dir, name, &index, encoder)?;

    Ok(BuildReport {
        name: name.to_string(),
        path,
        questions: index.meta.questions_count,
        answers: index.meta.answers_count,
        embedding_shape: (index.embeddings.rows(), index.embeddings.dim()),
    })
}
