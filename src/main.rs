use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use transub::config::{Config, ConfigStore};
use transub::jobs::{JobRunner, JobStatus, ProcessingJob, Session};
use transub::pipeline::SubtitlePipeline;
use transub::subtitle::SubtitleVariant;

#[derive(Parser)]
#[command(name = "transub")]
#[command(version, about = "Translated, timed subtitles from ASR word timestamps")]
#[command(long_about = "Split ASR output into sentences, translate them with an OpenAI-compatible LLM, \
and write source, translation and bilingual SRT files aligned to the original audio timing.")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a subtitle job
    Run {
        /// ASR word table or WhisperX-style result (JSON)
        #[arg(short, long)]
        words: PathBuf,

        /// Video to burn the subtitles into
        #[arg(long)]
        video: Option<PathBuf>,

        /// Output directory (defaults to output_dir from the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Config file (defaults to the user config)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Read or write a config value by dotted key
    Config {
        #[command(subcommand)]
        action: ConfigAction,

        /// Config file (defaults to the user config)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a value, e.g. `translation.chunk_size`
    Get { key: String },
    /// Set a value; it is parsed as TOML, falling back to a string
    Set { key: String, value: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    explicit
        .or_else(Config::config_file_path)
        .context("Could not determine the config directory")
}

/// Parse a CLI value as a TOML value, or keep it as a string.
fn parse_value(raw: &str) -> toml::Value {
    format!("v = {raw}")
        .parse::<toml::Table>()
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn print_summary(job: &ProcessingJob, output: &std::path::Path) {
    println!();
    println!("Job {} {:?}", job.id, job.status);
    for stage in &job.stages {
        match &stage.error {
            Some(error) => println!("  {:<14} {:?}: {}", stage.name, stage.status, error),
            None => println!("  {:<14} {:?}", stage.name, stage.status),
        }
    }
    if job.status == JobStatus::Completed {
        for variant in SubtitleVariant::ALL {
            println!("  -> {}", output.join(variant.file_name()).display());
        }
    }
}

async fn run(
    words: PathBuf,
    video: Option<PathBuf>,
    output: Option<PathBuf>,
    config_file: Option<PathBuf>,
) -> Result<()> {
    let mut config = match config_file {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(output) = output {
        config.output_dir = output;
    }
    config.validate().context("Configuration validation failed")?;

    if !words.exists() {
        anyhow::bail!("Input file not found: {}", words.display());
    }

    info!("Words:    {}", words.display());
    info!("Output:   {}", config.output_dir.display());
    info!("Language: {} -> {}", config.language.source, config.language.target);
    info!("Model:    {}", config.api.model);

    let output_dir = config.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut pipeline = SubtitlePipeline::from_config(config, words)?.with_progress(true);
    if let Some(video) = video {
        pipeline = pipeline.with_video(video);
    }

    let session = Arc::new(Session::new(&output_dir));
    let runner = JobRunner::new(session.clone());
    let handle = runner.start(Arc::new(pipeline))?;

    let ctrlc_session = session.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current stage");
        ctrlc_session.request_cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    // Echo WARNING/ERROR entries from the job log while waiting.
    let mut last_id = 0;
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let page = handle.logs_since(last_id, 100);
        last_id = page.next_id;
        for entry in page.logs {
            if entry.level != transub::jobs::LogLevel::Info {
                warn!("[{}] {}", entry.source, entry.message);
            }
        }
    }

    let job = handle.wait().await?;
    print_summary(&job, &output_dir);

    match job.status {
        JobStatus::Completed => Ok(()),
        JobStatus::Cancelled => anyhow::bail!("Job cancelled"),
        _ => anyhow::bail!(
            "Job failed: {}",
            job.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

fn config_command(action: ConfigAction, config_file: Option<PathBuf>) -> Result<()> {
    let path = config_path(config_file)?;
    let store = if path.exists() {
        ConfigStore::open(&path)?
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        ConfigStore::create(&path, &Config::default())?
    };

    match action {
        ConfigAction::Get { key } => {
            let value = store
                .load_key(&key)
                .with_context(|| format!("Failed to read {key}"))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            store
                .update_key(&key, parse_value(&value))
                .with_context(|| format!("Failed to set {key}"))?;
            info!("Updated {} in {}", key, path.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            words,
            video,
            output,
            config,
        } => run(words, video, output, config).await,
        Command::Config { action, config } => config_command(action, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_value("0.85"), toml::Value::Float(0.85));
        assert_eq!(parse_value("gpt-4o"), toml::Value::String("gpt-4o".to_string()));
        assert_eq!(parse_value("\"zh\""), toml::Value::String("zh".to_string()));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "transub", "run", "--words", "asr.json", "--output", "out", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Run { .. }));
    }
}
