use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use faqbert::{
    AnswerStrategy,
    ConfigDb,
    DataDir,
    Error,
    ModelManager,
    QueryEngine,
    QueryResult,
    QuerySession,
    Result,
    builder::{self, BuildOptions, DEFAULT_CHUNK_SIZE},
    config_db::{
        CHUNK_SIZE_KEY,
        KNOWN_KEYS,
        MODEL_NAME_KEY,
        STRATEGY_KEY,
        THRESHOLD_KEY,
    },
    dataset,
    model_manager::{self, MODEL_ENV_VAR},
    pipeline,
    query::DEFAULT_THRESHOLD,
};
use kdam::{BarExt, tqdm};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    Cli,
    Command,
    ConfigAction,
    DatasetAction,
    ModelAction,
    PipelineAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("FAQBERT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Build(args) => {
            cmd_build(&config_db, &data_dir, cli.model.as_deref(), &args)?;
        }
        Command::Query(args) => {
            let threshold = resolve_threshold(&config_db, args.threshold)?;
            let engine = open_pipeline(&data_dir, &args.pipeline)?;
            let result = engine.query(&args.question, threshold)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", format_answer(&result));
            }
        }
        Command::Chat(args) => {
            let threshold = resolve_threshold(&config_db, args.threshold)?;
            let engine = open_pipeline(&data_dir, &args.pipeline)?;
            cmd_chat(QuerySession::new(engine, threshold))?;
        }
        Command::Pipeline { action } => match action {
            PipelineAction::List { json } => {
                pipeline_list(&data_dir.pipelines_dir()?, json)?;
            }
            PipelineAction::Remove { names } => {
                let dir = data_dir.pipelines_dir()?;
                for name in &names {
                    pipeline::remove_pipeline(&dir, name)?;
                    println!("Removed pipeline '{name}'");
                }
            }
        },
        Command::Dataset { action } => match action {
            DatasetAction::List { json } => {
                dataset_list(&data_dir.datasets_dir()?, json)?;
            }
        },
        Command::Model { action } => {
            cmd_model(&config_db, &data_dir, cli.model.as_deref(), action)?;
        }
        Command::Config { action } => cmd_config(&config_db, action)?,
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, cli.model.as_deref(), args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn resolve_model_name(config_db: &ConfigDb, explicit: Option<&str>) -> Result<String> {
    let env = std::env::var(MODEL_ENV_VAR).ok();
    let stored = config_db.get_setting(MODEL_NAME_KEY)?;
    Ok(model_manager::pick_model_name(
        explicit,
        env.as_deref(),
        stored.as_deref(),
    ))
}

fn resolve_threshold(config_db: &ConfigDb, explicit: Option<f32>) -> Result<f32> {
    match explicit {
        Some(t) => Ok(t),
        None => config_db.get_parsed_or(THRESHOLD_KEY, DEFAULT_THRESHOLD),
    }
}

/// A pipeline reference is either a directory path or a name under the
/// pipelines directory.
fn pipeline_path(data_dir: &DataDir, reference: &str) -> Result<PathBuf> {
    let direct = Path::new(reference);
    if direct.is_dir() {
        return Ok(direct.to_path_buf());
    }
    Ok(data_dir.pipelines_dir()?.join(reference))
}

fn open_pipeline(data_dir: &DataDir, reference: &str) -> Result<QueryEngine> {
    QueryEngine::open(&pipeline_path(data_dir, reference)?)
}

fn format_answer(result: &QueryResult) -> String {
    format!(
        "Answer: {} (similarity: {:.2})",
        result.answer.as_deref().unwrap_or("none"),
        result.score
    )
}

fn cmd_build(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    model: Option<&str>,
    args: &cli::BuildArgs,
) -> Result<()> {
    // Validate everything cheap before loading the model.
    let strategy = match &args.strategy {
        Some(s) => s.parse::<AnswerStrategy>()?,
        None => config_db.get_parsed_or(STRATEGY_KEY, AnswerStrategy::default())?,
    };
    let chunk_size = match args.chunk_size {
        Some(n) => n,
        None => config_db.get_parsed_or(CHUNK_SIZE_KEY, DEFAULT_CHUNK_SIZE)?,
    };
    pipeline::validate_name(&args.name)?;
    let dataset_path =
        dataset::resolve_dataset_path(&data_dir.datasets_dir()?, &args.dataset)?;
    let total = faqbert::FaqDataset::load(&dataset_path)?.question_count();

    let model_name = resolve_model_name(config_db, model)?;
    let models = ModelManager::new(data_dir.hub_dir()?);
    let encoder = models.load_encoder(&model_name)?;

    let options = BuildOptions {
        strategy,
        chunk_size,
        seed: args.seed,
    };

    eprintln!(
        "Building pipeline '{}' from {} ({strategy}, {model_name})",
        args.name,
        dataset_path.display()
    );
    let mut bar = tqdm!(total = total, desc = "Encoding questions", unit = " questions");
    let report = builder::build_pipeline(
        &dataset_path,
        &data_dir.pipelines_dir()?,
        &args.name,
        &encoder,
        &options,
        |done, _| {
            let _ = bar.update_to(done);
        },
    )?;
    eprintln!();

    println!(
        "Built pipeline '{}': {} questions, {} answers, embeddings {}x{}",
        report.name,
        report.questions,
        report.answers,
        report.embedding_shape.0,
        report.embedding_shape.1
    );
    println!("Saved to {}", report.path.display());
    Ok(())
}

fn cmd_chat(mut session: QuerySession) -> Result<()> {
    let meta = session.engine().meta();
    eprintln!(
        "Loaded pipeline with {} questions ({}). Empty line or 0 to exit; \
         'stats', 'reset', 'threshold <value>' for session control.",
        meta.questions_count, meta.model_info.name
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut line = String::new();
    loop {
        print!("Question: ");
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() || input == "0" {
            break;
        }

        match input {
            "stats" => {
                let snapshot = session.stats_mut().snapshot(false);
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            "reset" => {
                let snapshot = session.stats_mut().snapshot(true);
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                println!("Statistics reset.");
            }
            _ => {
                if let Some(value) = input.strip_prefix("threshold ") {
                    match value.trim().parse::<f32>() {
                        Ok(t) => {
                            session.stats_mut().set_threshold(t);
                            println!("Threshold set to {t}");
                        }
                        Err(_) => println!("Invalid threshold: {value}"),
                    }
                    continue;
                }
                let result = session.ask(input, None)?;
                println!("{}", format_answer(&result));
            }
        }
    }

    let snapshot = session.stats_mut().snapshot(false);
    eprintln!(
        "{} queries, {} matched ({:.0}%)",
        snapshot.total_queries,
        snapshot.matches,
        snapshot.match_rate * 100.0
    );
    Ok(())
}

fn pipeline_list(dir: &Path, json: bool) -> Result<()> {
    let pipelines = pipeline::list_pipelines(dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pipelines)?);
    } else if pipelines.is_empty() {
        println!("No pipelines built.");
    } else {
        for p in &pipelines {
            println!(
                "{}\t{} questions\t{}\t{}\t{}",
                p.name, p.questions, p.strategy, p.source, p.created_at
            );
        }
    }
    Ok(())
}

fn dataset_list(dir: &Path, json: bool) -> Result<()> {
    let datasets = dataset::list_datasets(dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&datasets)?);
    } else if datasets.is_empty() {
        println!("No datasets in {}", dir.display());
    } else {
        for d in &datasets {
            println!("{}\t{} bytes", d.name, d.size);
        }
    }
    Ok(())
}

fn cmd_model(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    explicit: Option<&str>,
    action: ModelAction,
) -> Result<()> {
    let models = ModelManager::new(data_dir.hub_dir()?);

    match action {
        ModelAction::Show { json } => {
            let env = std::env::var(MODEL_ENV_VAR).ok();
            let stored = config_db.get_setting(MODEL_NAME_KEY)?;
            let source = if explicit.is_some() {
                "flag"
            } else if env.is_some() {
                "env"
            } else if stored.is_some() {
                "config"
            } else {
                "default"
            };
            let resolved = model_manager::pick_model_name(
                explicit,
                env.as_deref(),
                stored.as_deref(),
            );
            if json {
                let value = serde_json::json!({
                    "model": resolved,
                    "source": source,
                    "cached": models.local_dir(&resolved).is_dir(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Model: {resolved} (from {source})");
            }
        }
        ModelAction::Set { model } => {
            config_db.set_setting(MODEL_NAME_KEY, &model)?;
            println!("Default model set to {model}");
        }
        ModelAction::Clear => {
            config_db.remove_setting(MODEL_NAME_KEY)?;
            println!("Model setting cleared (default: {})", model_manager::DEFAULT_MODEL_ID);
        }
        ModelAction::List { json } => {
            let local = models.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&local)?);
            } else if local.is_empty() {
                println!("No models in {}", models.hub_dir().display());
            } else {
                for m in &local {
                    let source = m.meta.as_ref().map_or("-", |meta| meta.source.as_str());
                    println!("{}\t{source}", m.name);
                }
            }
        }
        ModelAction::Download { model, save_as } => {
            let path = models.download(&model, save_as.as_deref())?;
            println!("Downloaded {model} to {}", path.display());
        }
        ModelAction::Remove { name } => {
            models.remove(&name)?;
            println!("Removed model '{name}'");
        }
        ModelAction::ClearCache => {
            if models.clear_cache()? {
                println!("Download cache cleared");
            } else {
                println!("Download cache already empty");
            }
        }
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = config_db.list_settings()?;
            if settings.is_empty() {
                println!("No settings stored.");
            }
            for (key, value) in &settings {
                println!("{key} = {value}");
            }
        }
        ConfigAction::Set { key, value } => {
            validate_setting(&key, &value)?;
            config_db.set_setting(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if !config_db.remove_setting(&key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            println!("Removed {key}");
        }
    }
    Ok(())
}

fn validate_setting(key: &str, value: &str) -> Result<()> {
    let invalid = || Error::Config(format!("invalid value for {key}: {value}"));
    match key {
        THRESHOLD_KEY => {
            value.parse::<f32>().map_err(|_| invalid())?;
        }
        CHUNK_SIZE_KEY => {
            if value.parse::<usize>().map_err(|_| invalid())? == 0 {
                return Err(invalid());
            }
        }
        STRATEGY_KEY => {
            value.parse::<AnswerStrategy>()?;
        }
        MODEL_NAME_KEY => {}
        _ => {
            return Err(Error::Config(format!(
                "unknown setting '{key}' (expected one of: {})",
                KNOWN_KEYS.join(", ")
            )));
        }
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    explicit_model: Option<&str>,
    json: bool,
) -> Result<()> {
    let model_name = resolve_model_name(config_db, explicit_model)?;
    let threshold = resolve_threshold(config_db, None)?;
    let pipelines = pipeline::list_pipelines(&data_dir.pipelines_dir()?)?;
    let datasets = dataset::list_datasets(&data_dir.datasets_dir()?)?;
    let models = ModelManager::new(data_dir.hub_dir()?).list()?;

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root(),
            "model": model_name,
            "threshold": threshold,
            "pipelines": pipelines.len(),
            "datasets": datasets.len(),
            "models": models.len(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {model_name}");
        println!("Threshold: {threshold}");
        println!("Datasets: {}", datasets.len());
        println!("Pipelines: {}", pipelines.len());
        for p in &pipelines {
            println!("  {}: {} questions", p.name, p.questions);
        }
        println!("Cached models: {}", models.len());
    }
    Ok(())
}
