//! CLI binary for answerflow.

use std::io::Write;
use std::path::PathBuf;

use answerflow::{Capabilities, EngineConfig, Pipeline, ProgressEvent};
use clap::Parser;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Answerflow: ranked, streamed answers from web search.
#[derive(Parser)]
#[command(name = "answerflow", version, about)]
struct Cli {
    /// The question or search request.
    query: String,

    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print every progress event as one JSON line.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable with --json.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("answerflow=info,answerflow_search=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    config.validate()?;

    let capabilities = Capabilities::from_config(&config)?;
    let pipeline = Pipeline::new(capabilities, config);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, cancelling request");
            cancel_clone.cancel();
        }
    });

    let mut events = pipeline.run_with_cancel(cli.query, cancel);
    let mut stdout = std::io::stdout().lock();
    let mut failed = false;
    while let Some(event) = events.next().await {
        failed |= matches!(event, ProgressEvent::Failed { .. });
        if cli.json {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        } else {
            print_event(&mut stdout, &event)?;
        }
        stdout.flush()?;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = path {
        return Ok(EngineConfig::from_file(path)?);
    }
    let default_path = EngineConfig::default_config_path();
    if default_path.is_file() {
        info!(path = %default_path.display(), "using default config file");
        Ok(EngineConfig::from_file(&default_path)?)
    } else {
        Ok(EngineConfig::default())
    }
}

fn print_event(out: &mut impl Write, event: &ProgressEvent) -> std::io::Result<()> {
    match event {
        ProgressEvent::Timing {
            milestone,
            elapsed_ms,
        } => writeln!(out, "[{milestone}] {elapsed_ms} ms"),
        ProgressEvent::Intent { intent } => writeln!(
            out,
            "Topic: {} ({}, {} results)",
            intent.topic, intent.media_type, intent.desired_count
        ),
        ProgressEvent::Sources { sources } => {
            writeln!(out, "Sources ({}):", sources.len())?;
            for source in sources {
                writeln!(out, "  - {} <{}>", source.title, source.url)?;
            }
            Ok(())
        }
        ProgressEvent::Images { images } => {
            writeln!(out, "Images ({}):", images.len())?;
            for image in images {
                writeln!(out, "  - {}", image.link)?;
            }
            Ok(())
        }
        ProgressEvent::Videos { videos } => {
            writeln!(out, "Videos ({}):", videos.len())?;
            for video in videos {
                writeln!(out, "  - {} <{}>", video.title, video.link)?;
            }
            Ok(())
        }
        // Raw ranking JSON; the parsed form follows in `Ranked`.
        ProgressEvent::Fragment { .. } => Ok(()),
        ProgressEvent::AnswerEnd => Ok(()),
        ProgressEvent::Ranked { results } => {
            writeln!(out, "Ranked results:")?;
            for result in results {
                write!(out, "{:>3}. {} <{}>", result.position, result.title, result.link)?;
                if let Some(score) = result.relevance_score {
                    write!(out, " [{score:.2}]")?;
                }
                writeln!(out)?;
                if !result.snippet.is_empty() {
                    writeln!(out, "     {}", result.snippet)?;
                }
                if let Some(reasoning) = &result.reasoning {
                    writeln!(out, "     why: {reasoning}")?;
                }
            }
            Ok(())
        }
        ProgressEvent::Completed => writeln!(out, "Done."),
        ProgressEvent::Failed { code, message } => writeln!(out, "Failed [{code}]: {message}"),
    }
}
