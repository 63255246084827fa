//! rawkey-monitor: prints every key transition on the X display.
//!
//! ```text
//! main()
//!  └─ load MonitorConfig, apply CLI overrides
//!  └─ CaptureWorker::spawn()   -- session opened on "rawkey-capture"
//!  └─ select loop
//!       ├─ event from worker -> print "press   38 a"
//!       ├─ channel closed    -> capture ended; report why
//!       └─ Ctrl-C            -> stop worker (force-close + join)
//! ```
//!
//! Output goes to stdout, one event per line.  Logs go to stderr and are
//! controlled by `RUST_LOG`, `--log-level` or `[logging] level`.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(target_os = "linux")]
use rawkey_core::{KeyEvent, Transition};
use rawkey_x11::infrastructure::config::{self, ConfigError, MonitorConfig};

/// Print raw key events with their layout-resolved X11 key names.
#[derive(Debug, Parser)]
#[command(name = "rawkey-monitor", version, about)]
struct Cli {
    /// Config file path.  Defaults to $XDG_CONFIG_HOME/rawkey/config.toml.
    #[arg(long, env = "RAWKEY_CONFIG")]
    config: Option<PathBuf>,

    /// X display to connect to, e.g. ":0".  Defaults to $DISPLAY.
    #[arg(long)]
    display: Option<String>,

    /// Log filter directive, e.g. "debug" or "rawkey_core=trace".
    #[arg(long, env = "RAWKEY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Only print key presses.
    #[arg(long)]
    press_only: bool,

    /// Subscribe on master devices only, which avoids duplicate events
    /// from slave keyboards.
    #[arg(long)]
    master_only: bool,
}

fn resolve_config(cli: &Cli) -> Result<MonitorConfig, ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => match config::load_config() {
            Err(ConfigError::NoConfigDir) => MonitorConfig::default(),
            other => other?,
        },
    };

    if let Some(display) = &cli.display {
        cfg.capture.display = Some(display.clone());
    }
    if let Some(level) = &cli.log_level {
        cfg.logging.level = level.clone();
    }
    if cli.press_only {
        cfg.capture.report_releases = false;
    }
    if cli.master_only {
        cfg.capture.master_devices_only = true;
    }
    Ok(cfg)
}

#[cfg(target_os = "linux")]
fn format_event(event: &KeyEvent) -> String {
    format!("{:<7} {:>3} {}", event.transition, event.keycode, event.name)
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use rawkey_x11::application::capture_worker::CaptureWorker;
    use rawkey_x11::infrastructure::xlib::XlibBackend;
    use tokio::sync::mpsc;
    use tracing::warn;

    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    info!(display = ?cfg.capture.display, "rawkey-monitor starting");

    let (tx, mut rx) = mpsc::unbounded_channel::<KeyEvent>();
    let backend = XlibBackend::new(cfg.capture.display.clone());
    let worker = CaptureWorker::spawn(backend, cfg.capture.device_selector(), move |event| {
        tx.send(event).is_ok()
    })?;

    let report_releases = cfg.capture.report_releases;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if report_releases || event.transition == Transition::Press {
                        println!("{}", format_event(&event));
                    }
                }
                None => {
                    warn!("capture ended");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl-C: {e}");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || worker.stop()).await??;
    info!("rawkey-monitor stopped");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = resolve_config(&cli)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .init();
    info!("rawkey-monitor requires an X11 session on Linux");
    anyhow::bail!("unsupported platform")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rawkey-monitor").chain(args.iter().copied())).expect("valid args")
    }

    #[test]
    fn test_cli_flags_override_config_file() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("rawkey_monitor_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[capture]\ndisplay = \":5\"\n[logging]\nlevel = \"warn\"\n").unwrap();
        let path_arg = path.to_string_lossy().into_owned();

        // Act
        let cli = parse(&["--config", &path_arg, "--display", ":1", "--press-only"]);
        let cfg = resolve_config(&cli).expect("config");

        // Assert
        assert_eq!(cfg.capture.display.as_deref(), Some(":1"));
        assert!(!cfg.capture.report_releases);
        assert_eq!(cfg.logging.level, "warn", "file value kept when no flag is given");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_format_event_aligns_columns() {
        use rawkey_core::SymbolName;

        let event = KeyEvent {
            transition: Transition::Press,
            keycode: 38,
            name: SymbolName::new("a"),
        };
        assert_eq!(format_event(&event), "press    38 a");
    }
}
