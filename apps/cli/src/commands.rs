//! CLI command definitions, routing, and tracing setup.

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::info;

use knowstream_core::{AggregateOptions, Pipeline};
use knowstream_shared::{
    AppConfig, Event, SynthesisMode, init_config, load_config, validate_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// KnowStream: stream a merged, source-attributed answer for a query.
#[derive(Parser)]
#[command(
    name = "knowstream",
    version,
    about = "Aggregate search and expert sources into one scored, attributed answer.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one aggregation request and stream its events.
    Query {
        /// The query to aggregate knowledge for.
        query: String,

        /// Minimum validated sources required before synthesis.
        #[arg(long)]
        min_sources: Option<usize>,

        /// Cap on the selected sources.
        #[arg(long)]
        max_results: Option<usize>,

        /// Synthesis mode: research, analysis, coding, or creative.
        #[arg(short, long)]
        mode: Option<String>,

        /// Emit raw events as JSON lines instead of formatted text.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "knowstream=info",
        1 => "knowstream=debug",
        _ => "knowstream=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Query {
            query,
            min_sources,
            max_results,
            mode,
            json,
        } => cmd_query(&query, min_sources, max_results, mode.as_deref(), json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_query(
    query: &str,
    min_sources: Option<usize>,
    max_results: Option<usize>,
    mode: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let mode = mode
        .map(|m| m.parse::<SynthesisMode>().map_err(|e| eyre!(e)))
        .transpose()?;

    info!(query, "starting aggregation");

    let pipeline = Pipeline::new(config)?;
    let mut stream = pipeline.aggregate(
        query,
        AggregateOptions {
            min_sources,
            max_results,
            mode,
            ..AggregateOptions::default()
        },
    );

    // The stream ends with either a final synthesis or a terminal error.
    let mut finished = false;
    while let Some(event) = stream.next().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        if matches!(event, Event::FinalSynthesis { .. }) {
            finished = true;
        }
    }

    if !finished {
        return Err(eyre!("aggregation failed; see events above"));
    }
    Ok(())
}

/// Human-readable rendering of one event.
fn print_event(event: &Event) {
    match event {
        Event::Status { stage, message } => {
            println!("[{stage}] {message}");
        }
        Event::SearchResult { index, result } => {
            println!("  #{index} {} — {}", result.title, result.url);
        }
        Event::InterimAnalysis {
            results_analyzed,
            patterns,
        } => {
            println!("  interim ({results_analyzed} analyzed):");
            for pattern in patterns {
                println!("    - {pattern}");
            }
        }
        Event::SourceSelection { sources } => {
            println!("  selected {} source(s):", sources.len());
            for source in sources {
                println!("    {:.2}  {}", source.relevance, source.url);
            }
        }
        Event::FinalSynthesis {
            content,
            sources,
            confidence,
        } => {
            println!();
            println!("{content}");
            println!();
            println!("confidence: {confidence:.2}");
            println!("sources:");
            for source in sources {
                println!("  - {source}");
            }
        }
        Event::Error {
            kind,
            message,
            partial,
        } => {
            if *partial {
                eprintln!("  warning [{kind}]: {message}");
            } else {
                eprintln!("  error [{kind}]: {message}");
            }
        }
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
