use anyhow::Context;
use clap::builder::RangedU64ValueParser;
use clap::{Arg, ArgAction, Command};
use indicatif::{ProgressBar, ProgressStyle};
use multiget::core::engine::Engine;
use multiget::core::events::EngineEvent;
use multiget::core::model::{DownloadPlan, DownloadState, DEFAULT_CHUNKS, DEFAULT_CHUNK_SIZE};
use multiget::plugins::http::resolver::output_name_for;
use multiget::plugins::registry::{DownloadCliConfig, PluginRegistry};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

fn build_cli(registry: &PluginRegistry) -> Command {
    let cmd = Command::new("multiget")
        .about("Download a file in byte-range chunks, one after another or in parallel")
        .after_help("Please report issues at https://github.com/elainaRenee/multi-get/issues")
        .arg(
            Arg::new("url")
                .help("HTTP or HTTPS URL to download")
                .value_name("URL")
                .required(true)
                .num_args(1),
        )
        .arg(
            Arg::new("chunks")
                .short('c')
                .long("chunks")
                .help("Number of chunks to download")
                .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                .default_value(DEFAULT_CHUNKS.to_string())
                .num_args(1),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .help("Size of each chunk in bytes")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value(DEFAULT_CHUNK_SIZE.to_string())
                .num_args(1),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .help("Name of the file to output (default: last segment of the URL path)")
                .num_args(1),
        )
        .arg(
            Arg::new("parallel")
                .short('p')
                .long("parallel")
                .help("Download the chunks in parallel")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log progress to stderr (-vv for debug output)")
                .action(ArgAction::Count),
        );

    registry.augment_download_command(cmd)
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,multiget={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn spawn_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling download");
            cancel.cancel();
        }
    })
}

fn spawn_progress(mut rx: broadcast::Receiver<EngineEvent>, total: usize, hidden: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = if hidden { ProgressBar::hidden() } else { ProgressBar::new(total as u64) };
        if let Ok(sty) = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} chunks {wide_msg}") {
            pb.set_style(sty);
        }

        let mut bytes = 0u64;
        loop {
            let evt = match rx.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match evt {
                EngineEvent::SegmentDone { bytes: n, completed, .. } => {
                    bytes += n;
                    pb.set_position(completed as u64);
                    pb.set_message(fmt_bytes(bytes));
                }
                EngineEvent::StateChanged { state: DownloadState::Done } => {
                    pb.finish_with_message(format!("{} done", fmt_bytes(bytes)));
                    break;
                }
                EngineEvent::StateChanged { state: DownloadState::Failed } => {
                    pb.abandon_with_message("failed");
                    break;
                }
                EngineEvent::StateChanged { state } => {
                    pb.set_message(format!("{:?}", state).to_lowercase());
                }
                EngineEvent::RangeStarted { .. } | EngineEvent::Error { .. } => {}
            }
        }
    })
}

/// `-f` wins unless it is empty; otherwise the name comes from the URL.
fn output_path(file: Option<&str>, url: &Url) -> PathBuf {
    match file.filter(|s| !s.is_empty()) {
        Some(f) => f.into(),
        None => output_name_for(url).into(),
    }
}

async fn run() -> anyhow::Result<()> {
    let registry = PluginRegistry::with_defaults()?;
    let matches = build_cli(&registry).get_matches();
    let verbosity = matches.get_count("verbose");
    init_tracing(verbosity);

    let raw_url = matches.get_one::<String>("url").context("please enter a value for URL")?;
    let url = Url::parse(raw_url).with_context(|| format!("please enter a valid URL: {raw_url}"))?;
    let chunks = *matches.get_one::<usize>("chunks").context("missing chunk count")?;
    let chunk_size = *matches.get_one::<u64>("size").context("missing chunk size")?;
    let parallel = matches.get_flag("parallel");
    let output = output_path(matches.get_one::<String>("file").map(String::as_str), &url);

    let mut cfg = DownloadCliConfig::default();
    registry.apply_download_matches(&matches, &mut cfg)?;

    let plan = DownloadPlan::new(url, chunks, chunk_size, parallel)?;
    let driver = registry
        .driver_for(plan.url())
        .with_context(|| format!("no driver for {}", plan.url()))?;
    let engine = Engine::new(driver, cfg.driver_ctx);

    let cancel = CancellationToken::new();
    let signal_task = spawn_signal_handler(cancel.clone());
    let ui_task = spawn_progress(engine.subscribe(), plan.total_chunks(), verbosity > 0);

    let result = engine.download_to_file(&plan, &output, cancel).await;
    signal_task.abort();
    drop(engine);
    let _ = ui_task.await;

    let written = result?;
    println!("Saved {} to {}", fmt_bytes(written), output.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}. See multiget --help for more information.", e);
        std::process::exit(1);
    }
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}
