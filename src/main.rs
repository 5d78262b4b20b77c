use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slotfs::config::ConfigStore;
use slotfs::events::EventBus;
use slotfs::storage::{
    DeviceRegistry, FileBrowser, FileHandle, HostFileSystem, LogicalSlot, MountManager, SeekMode,
};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// slotfs command line arguments
#[derive(Parser, Debug)]
#[command(name = "slotfs")]
#[command(version, about = "Browse ROM and save files on removable storage", long_about = None)]
struct CliArgs {
    /// Configuration file (default: $SLOTFS_CONFIG or /etc/slotfs/slotfs.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory (default: the SD ROM directory)
    Ls { path: Option<String> },
    /// Write a file to stdout
    Cat {
        path: String,
        /// Start offset; negative counts from the end of the file
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        offset: i64,
        /// Maximum number of bytes
        #[arg(long)]
        length: Option<u64>,
    },
    /// Copy a host file onto the media, replacing the destination
    Put { source: PathBuf, path: String },
    /// Mount every slot and print its state
    Status,
    /// Mount every slot and print storage events until interrupted
    Watch,
    /// Write the effective configuration to the configuration file
    InitConfig,
}

const CHUNK_SIZE: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    let config_path = args.config.unwrap_or_else(get_config_path);
    let config_store = ConfigStore::load(&config_path).await?;
    let config = config_store.get();

    let events = Arc::new(EventBus::new());
    let mounts = Arc::new(MountManager::new(
        DeviceRegistry::from_config(&config.storage),
        Arc::new(HostFileSystem::new()),
        config.monitor.clone(),
    ));
    mounts.set_event_bus(events.clone());
    let browser = FileBrowser::new(mounts.clone());

    match args.command {
        Command::Ls { path } => {
            let path = path.unwrap_or_else(|| config.locations.roms(LogicalSlot::Sd).to_string());
            browser.mount(&path).await?;

            let mut entries = browser.read_directory(&path).await?;
            entries.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then(a.path.cmp(&b.path)));
            for entry in entries {
                let kind = if entry.is_dir() { 'd' } else { '-' };
                println!("{} {:>12} {}", kind, entry.size, entry.path);
            }
        }
        Command::Cat {
            path,
            offset,
            length,
        } => {
            browser.mount(&path).await?;
            let size = file_size(&browser, &path).await?;

            let mut reader = browser.stream(FileHandle::with_size(path, size));
            let mode = if offset < 0 { SeekMode::End } else { SeekMode::Set };
            reader.seek(offset, mode);

            let mut remaining = length.unwrap_or(u64::MAX);
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let mut stdout = std::io::stdout().lock();
            let copied = loop {
                if remaining == 0 {
                    break Ok(());
                }
                let want = remaining.min(CHUNK_SIZE as u64) as usize;
                match reader.read(&mut chunk[..want]).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        stdout.write_all(&chunk[..n])?;
                        remaining -= n as u64;
                    }
                    Err(e) => break Err(e),
                }
            };
            reader.close().await;
            stdout.flush()?;
            copied?;
        }
        Command::Put { source, path } => {
            let data = tokio::fs::read(&source).await?;
            browser.mount(&path).await?;

            let mut file = FileHandle::new(path.clone());
            let written = browser.write(&mut file, &data).await?;
            if written < data.len() {
                anyhow::bail!(
                    "short write to {}: {} of {} bytes",
                    path,
                    written,
                    data.len()
                );
            }
            tracing::info!("Wrote {} bytes to {}", written, path);
        }
        Command::Status => {
            mount_all(&mounts).await;
            let status = mounts.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Watch => {
            let mut rx = events.subscribe();
            mount_all(&mounts).await;

            // Removed media is only released by a mount attempt, so retry
            // unmounted slots at the monitor's pace
            let mut retry =
                tokio::time::interval(Duration::from_millis(config.monitor.poll_interval_ms.max(1)));

            let shutdown_signal = tokio::signal::ctrl_c();
            tokio::pin!(shutdown_signal);

            loop {
                tokio::select! {
                    _ = &mut shutdown_signal => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    _ = retry.tick() => {
                        mount_all(&mounts).await;
                    }
                    event = rx.recv() => match event {
                        Ok(event) => println!("{}", serde_json::to_string(&event)?),
                        Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} storage events", n),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }
        Command::InitConfig => {
            config_store.set((*config).clone()).await?;
            println!("{}", config_store.path().display());
        }
    }

    Ok(())
}

/// Mount every slot, ignoring slots without media
async fn mount_all(mounts: &MountManager) {
    for slot in LogicalSlot::ALL {
        if let Err(e) = mounts.mount(slot).await {
            tracing::debug!("{} slot not mounted: {}", slot, e);
        }
    }
}

/// Size of `path` as reported by its parent directory listing
async fn file_size(browser: &FileBrowser, path: &str) -> anyhow::Result<u64> {
    let Some((parent, _)) = path.rsplit_once('/') else {
        anyhow::bail!("{} is not a path on a volume", path);
    };
    let entry = browser
        .read_directory(parent)
        .await?
        .into_iter()
        .find(|e| e.path == path);
    match entry {
        Some(entry) if !entry.is_dir() => Ok(entry.size),
        Some(_) => anyhow::bail!("{} is a directory", path),
        None => anyhow::bail!("{} not found", path),
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "slotfs=error",
        LogLevel::Warn => "slotfs=warn",
        LogLevel::Info => "slotfs=info",
        LogLevel::Verbose => "slotfs=debug",
        LogLevel::Debug => "slotfs=debug",
        LogLevel::Trace => "slotfs=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // Logs go to stderr so `cat` output stays clean
    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SLOTFS_CONFIG") {
        return PathBuf::from(path);
    }

    PathBuf::from("/etc/slotfs/slotfs.toml")
}
