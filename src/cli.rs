use crate::{
    config::Config,
    engine::ProcessEngine,
    engine_settings::{self, TranslateEngineSettings},
    jobs::{JobId, JobRecord, JobService, SubmitRequest},
    overrides::Overrides,
    settings::JobSettings,
    translator::GenericApiTranslator,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quack-translate")]
#[command(about = "PDF translation job server (background jobs + REST + progress streams)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./quack-translate.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the REST server.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Translate one PDF locally and print a JSON summary.
    Translate {
        #[arg(long)]
        input: PathBuf,
        /// Per-job override, e.g. `translation.lang_out=ja` or `genericapi_detail.generic_api_model=m`.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Translate a single string with the configured GenericAPI engine.
    Text {
        #[arg(long)]
        text: String,
    },
    /// Print the supported translate engines.
    Engines {},
    Doctor {},
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = match &cfg_path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
    if let Some(p) = &cfg_path {
        info!("config: {}", p.display());
    }

    match args.cmd {
        Command::Serve { bind } => serve(cfg, bind).await,
        Command::Translate { input, set } => translate(&cfg, &input, &set).await,
        Command::Text { text: input } => translate_text(&cfg, &input).await,
        Command::Engines {} => {
            println!(
                "{}",
                serde_json::to_string_pretty(&engine_settings::metadata())?
            );
            Ok(())
        }
        Command::Doctor {} => doctor(&cfg).await,
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("quack-translate.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(cfg.jobs_dir().join("quack-translate.log"))
}

fn service(cfg: &Config) -> Result<JobService> {
    let engine = ProcessEngine::new(cfg)?;
    ensure_dir(&cfg.jobs_dir())?;
    Ok(JobService::new(cfg, Arc::new(engine)))
}

async fn serve(mut cfg: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        cfg.server.bind = bind;
    }
    let service = Arc::new(service(&cfg)?);
    crate::http::serve(&cfg, service).await
}

async fn translate(cfg: &Config, input: &Path, set: &[String]) -> Result<()> {
    let overrides = Overrides::from_pairs(set)?;
    let service = service(cfg)?;
    let mut changes = service.subscribe();

    let started = now_rfc3339();
    let id = service.submit(SubmitRequest::new(input).with_overrides(overrides)).await?;
    info!(job_id = %id, "translating {}", input.display());

    let record = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(job_id = %id, "interrupted; cancelling");
                service.cancel(&id).await?;
                break service.status(&id)?;
            }
            change = changes.recv() => match change {
                Ok(record) if record.id == id => {
                    if let Some(p) = record.progress() {
                        info!(
                            job_id = %id,
                            stage = %p.stage,
                            "{:.1}%",
                            p.overall * 100.0
                        );
                    }
                    if record.state().is_terminal() {
                        break record;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress feed lagged");
                    let record = service.status(&id)?;
                    if record.state().is_terminal() {
                        break record;
                    }
                }
                Err(RecvError::Closed) => break service.status(&id)?,
            },
        }
    };

    print_summary(&id, &record, &started)?;
    match record.error() {
        Some(err) => Err(anyhow!("job {id} failed: {err}")),
        None => Ok(()),
    }
}

fn print_summary(id: &JobId, record: &JobRecord, started: &str) -> Result<()> {
    let view = record.view();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "job_id": id,
            "state": view.state,
            "artifacts": view.artifacts,
            "error": view.error,
            "started": started,
            "finished": now_rfc3339(),
        }))?
    );
    Ok(())
}

async fn translate_text(cfg: &Config, text: &str) -> Result<()> {
    let settings = JobSettings::from_config(cfg).validate()?;
    let TranslateEngineSettings::GenericApi(api) = &settings.engine else {
        bail!(
            "text translation needs the GenericAPI engine, config selects {}",
            settings.engine.kind().engine_type()
        );
    };
    let translator = GenericApiTranslator::new(
        api,
        &settings.translation.lang_in,
        &settings.translation.lang_out,
    )?;
    info!(fingerprint = %translator.cache_fingerprint(), "translating text");
    let out = translator.translate(text).await?;
    println!("{out}");
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    let engine = ProcessEngine::new(cfg)?;
    let diag = engine.doctor().await?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if !diag.ok {
        bail!("runner reported a broken environment");
    }
    Ok(())
}
