//! `yardl-copy`: re-encode a yardl binary stream under the current schema.
//!
//! ```text
//! yardl-copy --config copy.toml --input old.bin --output new.bin --max 100
//! ```
//!
//! Input defaults to stdin and output to stdout.  Logs go to stderr; set
//! `RUST_LOG` to override the configured level.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use yardl_copy::config::CopyConfig;

#[derive(Debug, Parser)]
#[command(name = "yardl-copy", version, about)]
struct Cli {
    /// TOML configuration naming the current and previous schemas.
    #[arg(short, long, env = "YARDL_COPY_CONFIG")]
    config: PathBuf,

    /// Binary input file (stdin when omitted).
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Binary output file (stdout when omitted).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Items dropped from the start of each stream.
    #[arg(long)]
    skip: Option<u64>,

    /// Most items copied per stream.
    #[arg(long)]
    max: Option<u64>,

    /// Items moved per read/write call.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Append a seek index to the output.
    #[arg(long)]
    indexed: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CopyConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.reader.log_level)),
        )
        .init();

    if let Some(skip) = cli.skip {
        config.copy.skip = skip;
    }
    if cli.max.is_some() {
        config.copy.max = cli.max;
    }
    if let Some(batch_size) = cli.batch_size {
        config.copy.batch_size = batch_size;
    }
    if cli.indexed {
        config.writer.indexed = true;
    }

    let definition = config.load_definition().context("loading schemas")?;
    info!(
        protocol = definition.name(),
        previous = definition.previous_schemas().len(),
        "yardl-copy starting"
    );

    let input: Box<dyn Read> = match &cli.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("opening input {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating output {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let (report, mut output) = yardl_copy::transcode(
        &definition,
        config.reader_options(),
        config.writer.clone(),
        &config.copy,
        input,
        output,
    )
    .context("transcoding")?;
    output.flush().context("flushing output")?;

    info!(
        steps = report.steps,
        copied = report.items_copied,
        skipped = report.items_skipped,
        "yardl-copy finished"
    );
    Ok(())
}
