use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use eoka_replay::browser::capture::LiveCapture;
use eoka_replay::browser::EokaPage;
use eoka_replay::config::OnError;
use eoka_replay::continuity::FilePendingStore;
use eoka_replay::playback::{Outcome, PlaybackUi, Progress, Recovery, Speed, StepFailure};
use eoka_replay::session::Coordinator;
use eoka_replay::storage::{
    parse_import, to_csv, ExportFormat, JsonFileStore, RecordingPatch, SettingsPatch, Storage,
};
use eoka_replay::{Config, Page};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "eoka-replay")]
#[command(about = "Record browser interactions and replay them")]
#[command(version)]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a URL and record until Ctrl-C
    Record {
        url: String,
        /// Recording name
        #[arg(short, long)]
        name: Option<String>,
        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,
    },
    /// Replay a saved recording, or the first recording in a bundle file
    Play {
        /// Recording id or bundle path
        target: String,
        /// real-time, fast or instant (default: stored setting)
        #[arg(short, long)]
        speed: Option<Speed>,
        /// What to do when a step fails: ask, skip or abort
        #[arg(long)]
        on_error: Option<OnError>,
        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,
    },
    /// List saved recordings
    List,
    /// Print a recording as JSON
    Show { id: String },
    /// Rename a recording
    Rename { id: String, name: String },
    /// Delete a recording
    Delete { id: String },
    /// Export recordings to a bundle, or to CSV for spreadsheets
    Export {
        /// Recording ids (default: all)
        ids: Vec<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// json (importable) or csv
        #[arg(long, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
    /// Import recordings from a bundle
    Import { file: PathBuf },
    /// Show or change stored settings
    Settings {
        #[arg(long)]
        hotkey: Option<String>,
        #[arg(long)]
        speed: Option<Speed>,
        #[arg(long)]
        auto_export: Option<bool>,
    },
    /// Show storage usage
    Usage,
    /// Validate the config without running anything
    Check,
    /// Run as an MCP server on stdio
    Serve,
}

/// Progress on stderr; failures answered by policy or by the operator.
struct ConsoleUi {
    on_error: OnError,
}

#[async_trait]
impl PlaybackUi for ConsoleUi {
    fn progress(&self, progress: Progress) {
        info!("Step {} ({:.0}%)", progress, progress.percent());
    }

    async fn decide(&self, failure: &StepFailure) -> Recovery {
        let recovery = match self.on_error {
            OnError::Skip => Recovery::Skip,
            OnError::Abort => Recovery::Abort,
            OnError::Ask => {
                let prompt = failure.to_string();
                tokio::task::spawn_blocking(move || ask(&prompt))
                    .await
                    .unwrap_or(Recovery::Abort)
            }
        };
        warn!("{} -> {:?}", failure, recovery);
        recovery
    }
}

fn ask(prompt: &str) -> Recovery {
    let stdin = std::io::stdin();
    loop {
        eprint!("✗ {}\n  [s]kip or [a]bort? ", prompt);
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => return Recovery::Abort,
            Ok(_) => {
                if let Ok(recovery) = line.parse() {
                    return recovery;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    // stdout belongs to the protocol when serving
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut config = match cli.config {
        Some(ref path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Record {
            url,
            name,
            headless,
        } => {
            config.browser.headless |= headless;
            record(config, &url, name).await
        }
        Command::Play {
            target,
            speed,
            on_error,
            headless,
        } => {
            config.browser.headless |= headless;
            if let Some(on_error) = on_error {
                config.playback.on_error = on_error;
            }
            play(config, &target, speed).await
        }
        Command::Serve => eoka_replay::mcp::run_server(config).await,
        Command::Check => {
            println!("Config valid");
            println!("  Store: {}", config.storage.path.display());
            println!("  Pending: {}", config.storage.pending_dir.display());
            println!(
                "  Playback: {} speed, on error {}",
                config.playback.speed, config.playback.on_error
            );
            println!(
                "  Capture: debounce {}ms, scroll {}ms, spacing {}ms",
                config.capture.input_debounce_ms,
                config.capture.scroll_throttle_ms,
                config.capture.min_event_interval_ms
            );
            Ok(())
        }
        command => manage(&config, command).await,
    }
}

async fn launch(config: &Config) -> anyhow::Result<Coordinator<EokaPage>> {
    let storage = JsonFileStore::open(&config.storage.path)?;
    let page = EokaPage::launch(&config.browser).await?;
    Ok(Coordinator::new(
        Arc::new(page),
        Arc::new(storage),
        Arc::new(FilePendingStore::new(&config.storage.pending_dir)),
        config.clone(),
    ))
}

async fn shutdown(coordinator: Coordinator<EokaPage>) -> anyhow::Result<()> {
    let page = coordinator.page().clone();
    drop(coordinator);
    if let Ok(page) = Arc::try_unwrap(page) {
        page.close().await?;
    }
    Ok(())
}

async fn record(config: Config, url: &str, name: Option<String>) -> anyhow::Result<()> {
    let coordinator = launch(&config).await?;
    let page = coordinator.page().clone();
    page.navigate(url).await?;
    page.wait_for_load().await?;

    let capture = LiveCapture::new(page);
    capture.install().await?;
    let id = coordinator.start_recording(name).await?;
    println!("Recording {} (Ctrl-C to stop)", id);

    let interval = Duration::from_millis(config.capture.poll_interval_ms);
    let stop = tokio::signal::ctrl_c();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = capture.pump(&coordinator).await {
                    tracing::debug!("Capture poll failed: {}", e);
                }
            }
        }
    }
    if let Err(e) = capture.pump(&coordinator).await {
        tracing::debug!("Final capture poll failed: {}", e);
    }
    if let Err(e) = capture.dispose().await {
        warn!("Capture listeners left in the page: {}", e);
    }

    let recording = coordinator.stop_recording().await?;
    println!();
    println!("✓ Saved {}", recording.id);
    println!("  Name: {}", recording.name);
    println!("  Events: {}", recording.events.len());
    println!("  Duration: {}ms", recording.duration);

    if coordinator.storage().settings().await?.auto_export {
        let bundle = coordinator
            .storage()
            .export(Some(std::slice::from_ref(&recording.id)))
            .await?;
        let path = PathBuf::from(format!("{}.json", recording.id));
        std::fs::write(&path, serde_json::to_string_pretty(&bundle)?)?;
        println!("  Exported: {}", path.display());
    }

    shutdown(coordinator).await
}

/// Import a bundle file and return the id of its first recording.
async fn import_bundle(store: &dyn Storage, path: &Path) -> anyhow::Result<String> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let first = parse_import(&json)?
        .into_iter()
        .next()
        .with_context(|| format!("{} contains no recordings", path.display()))?;
    let summary = store.import(&json).await?;
    info!(
        "Imported {}, skipped {} from {}",
        summary.imported,
        summary.skipped,
        path.display()
    );
    Ok(first.id)
}

async fn play(config: Config, target: &str, speed: Option<Speed>) -> anyhow::Result<()> {
    let ui = Arc::new(ConsoleUi {
        on_error: config.playback.on_error,
    });
    let coordinator = launch(&config).await?;
    let id = if Path::new(target).is_file() {
        import_bundle(coordinator.storage().as_ref(), Path::new(target)).await?
    } else {
        target.to_string()
    };
    let control = coordinator.play(&id, speed, ui).await?;
    println!("Playing {} (Ctrl-C to stop)", id);

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            control.stop();
        }
    });
    let outcome = coordinator.finish_playback().await;
    interrupt.abort();

    println!();
    let success = match outcome {
        Ok(Outcome::Completed) => {
            println!("✓ Completed");
            true
        }
        Ok(Outcome::Aborted) => {
            println!("✗ Aborted");
            false
        }
        Ok(Outcome::HandedOff { url }) => {
            println!("✗ Stopped after navigating to {}", url);
            false
        }
        Err(e) => {
            println!("✗ Failed");
            println!("  Error: {}", e);
            false
        }
    };

    shutdown(coordinator).await?;
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Store-only commands; no browser.
async fn manage(config: &Config, command: Command) -> anyhow::Result<()> {
    let store = JsonFileStore::open(&config.storage.path)?;
    match command {
        Command::List => {
            let recordings = store.list().await?;
            if recordings.is_empty() {
                println!("No recordings.");
            }
            for r in recordings {
                println!(
                    "{}  {}  ({} events, {}ms)",
                    r.id,
                    r.name,
                    r.events.len(),
                    r.duration
                );
            }
        }
        Command::Show { id } => match store.get(&id).await? {
            Some(recording) => println!("{}", serde_json::to_string_pretty(&recording)?),
            None => bail!("recording not found: {}", id),
        },
        Command::Rename { id, name } => match store.update(&id, RecordingPatch::rename(name)).await? {
            Some(recording) => println!("✓ Renamed {} to '{}'", id, recording.name),
            None => bail!("recording not found: {}", id),
        },
        Command::Delete { id } => {
            if !store.delete(&id).await? {
                bail!("recording not found: {}", id);
            }
            println!("✓ Deleted {}", id);
        }
        Command::Export { ids, output, format } => {
            let filter = if ids.is_empty() { None } else { Some(ids.as_slice()) };
            let bundle = store.export(filter).await?;
            let text = match format {
                ExportFormat::Json => serde_json::to_string_pretty(&bundle)?,
                ExportFormat::Csv => to_csv(&bundle.recordings),
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    println!(
                        "✓ Exported {} recordings to {}",
                        bundle.recordings.len(),
                        path.display()
                    );
                }
                None => println!("{}", text.trim_end()),
            }
        }
        Command::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let summary = store.import(&json).await?;
            println!(
                "✓ Imported {}, skipped {}",
                summary.imported, summary.skipped
            );
        }
        Command::Settings {
            hotkey,
            speed,
            auto_export,
        } => {
            let settings = if hotkey.is_none() && speed.is_none() && auto_export.is_none() {
                store.settings().await?
            } else {
                store
                    .set_settings(SettingsPatch {
                        hotkey,
                        playback_speed: speed,
                        auto_export,
                    })
                    .await?
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::Usage => {
            let usage = store.usage().await?;
            println!(
                "{} in {} recordings ({})",
                usage.formatted,
                usage.recording_count,
                store.path().display()
            );
        }
        Command::Record { .. } | Command::Play { .. } | Command::Check | Command::Serve => {
            bail!("not a storage command")
        }
    }
    Ok(())
}
