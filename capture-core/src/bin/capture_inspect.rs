//! Capture Inspect - browse a capture database written by a test run
//!
//! Usage:
//!     capture-inspect --db capture.sqlite messages --direction inbound
//!     capture-inspect --db capture.sqlite messages --body EpisodicMetricReport --json
//!     capture-inspect --db capture.sqlite manipulations --method setMetricValue
//!     capture-inspect --db capture.sqlite sequence-ids

use std::io::Write;
use std::path::PathBuf;

use capture_core::{
    CaptureError, Direction, ManipulationFilter, MessageFilter, PersistedManipulation,
    PersistedMessage, QName, QueryLayer, StoreConfig,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "capture-inspect")]
#[command(about = "Inspect captured messages and manipulations")]
#[command(version)]
struct Args {
    /// Capture database to read
    #[arg(long)]
    db: PathBuf,

    /// Store configuration JSON supplying the policy and fetch size
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print one JSON document per line instead of summaries
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List captured messages
    Messages {
        /// inbound or outbound
        #[arg(long)]
        direction: Option<Direction>,

        /// Local name of a body element in the message namespace, or `{ns}local`
        #[arg(long = "body")]
        body: Vec<String>,

        /// Ascend by version instead of insertion order
        #[arg(long)]
        sorted: bool,
    },
    /// List manipulations in the order they were started
    Manipulations {
        #[arg(long = "method")]
        methods: Vec<String>,
    },
    /// List the distinct sequence ids seen in version-bearing elements
    SequenceIds,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capture_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), CaptureError> {
    let config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::default(),
    };
    let queries = QueryLayer::open_existing(
        &args.db,
        config.policy.clone(),
        config.fetch_size,
        config.busy_timeout(),
    )?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &args.command {
        Command::Messages {
            direction,
            body,
            sorted,
        } => {
            let mut filter = MessageFilter::new();
            if let Some(direction) = direction {
                filter = filter.direction(*direction);
            }
            if !body.is_empty() {
                filter = filter.body_elements(body.iter().map(|name| parse_name(name)));
            }
            if *sorted {
                filter = filter.ordered_by_version();
            }
            let mut count = 0usize;
            for message in queries.messages(&filter)? {
                let message = message?;
                if args.json {
                    serde_json::to_writer(&mut out, &message)?;
                    writeln!(out)?;
                } else {
                    writeln!(out, "{}", summarize_message(&message))?;
                }
                count += 1;
            }
            if !args.json {
                writeln!(out, "{} message(s)", count)?;
            }
        }
        Command::Manipulations { methods } => {
            let filter = ManipulationFilter::new().methods(methods.iter().cloned());
            for manipulation in queries.manipulations(&filter)? {
                let manipulation = manipulation?;
                if args.json {
                    serde_json::to_writer(&mut out, &manipulation)?;
                    writeln!(out)?;
                } else {
                    writeln!(out, "{}", summarize_manipulation(&manipulation))?;
                }
            }
        }
        Command::SequenceIds => {
            let ids = queries.unique_sequence_ids()?;
            if args.json {
                serde_json::to_writer(&mut out, &ids)?;
                writeln!(out)?;
            } else {
                for id in ids {
                    writeln!(out, "{}", id)?;
                }
            }
        }
    }
    Ok(())
}

fn parse_name(name: &str) -> QName {
    if name.starts_with('{') {
        QName::parse(name)
    } else {
        QName::message(name)
    }
}

fn summarize_message(message: &PersistedMessage) -> String {
    let elements: Vec<String> = message
        .version_groups
        .iter()
        .map(|group| format!("{}@{}", group.body_element.local, group.mdib_version))
        .collect();
    format!(
        "{} {:<8} {:<8} {:<8} {} bytes [{}] {}",
        message.id,
        message.direction,
        message.message_type,
        message.scheme,
        message.body.len(),
        message.charset,
        elements.join(",")
    )
}

fn summarize_manipulation(manipulation: &PersistedManipulation) -> String {
    let parameters: Vec<String> = manipulation
        .parameters
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!(
        "{} {} {} {} ({})",
        manipulation.start_timestamp,
        manipulation.method_name,
        manipulation.result,
        manipulation.id,
        parameters.join(", ")
    )
}
