//! # cutframe
//!
//! Preview player for the cutframe trimmer, built on cutframe-core.

use anyhow::Result;
use cutframe_core::PlayerConfig;
use eframe::egui;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod display;
mod headless;

use app::CutframeApp;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let headless_requested = args
        .get(1)
        .map(|arg| arg == "--headless" || arg == "headless")
        .unwrap_or(false);

    let default_filter = if headless_requested {
        "cutframe=info,cutframe_core=info"
    } else {
        "cutframe=debug,cutframe_core=debug,eframe=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("cutframe v{} (core {})", env!("CARGO_PKG_VERSION"), cutframe_core::VERSION);

    let config = load_config(&args)?;

    if let Some(path) = path_arg(&args, "--write-config")? {
        config.save_to(&path)?;
        tracing::info!("Wrote config to {}", path.display());
        return Ok(());
    }

    if headless_requested {
        let options = headless::parse_headless_args(&args)?;
        headless::run_headless(&options, config)?;
        return Ok(());
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("cutframe")
            .with_inner_size([1280.0, 720.0])
            .with_min_inner_size([640.0, 360.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "cutframe",
        options,
        Box::new(|cc| Ok(Box::new(CutframeApp::new(cc, config)))),
    )
    .map_err(|e| anyhow::anyhow!("eframe error: {}", e))?;

    Ok(())
}

fn load_config(args: &[String]) -> Result<PlayerConfig> {
    match path_arg(args, "--config")? {
        Some(path) => {
            let config = PlayerConfig::load_from(&path)?;
            tracing::info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(PlayerConfig::load().unwrap_or_else(|e| {
            tracing::warn!("Ignoring config file: {}", e);
            PlayerConfig::default()
        })),
    }
}

fn path_arg(args: &[String], flag: &str) -> Result<Option<PathBuf>> {
    match args.iter().position(|arg| arg == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|value| Some(PathBuf::from(value)))
            .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag)),
        None => Ok(None),
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn format_time(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(59_999), "00:59");
        assert_eq!(format_time(61_000), "01:01");
        assert_eq!(format_time(3_723_000), "01:02:03");
        assert_eq!(format_time(-40), "00:00");
    }

    #[test]
    fn test_path_arg() {
        let args: Vec<String> = ["cutframe", "--config", "p.json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(path_arg(&args, "--config").unwrap(), Some(PathBuf::from("p.json")));
        assert_eq!(path_arg(&args[..1], "--config").unwrap(), None);
        assert!(path_arg(&args[..2], "--config").is_err());
        assert_eq!(path_arg(&args, "--write-config").unwrap(), None);
    }

    #[test]
    fn test_written_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        let args: Vec<String> = ["cutframe", "--write-config"]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(path.display().to_string()))
            .collect();

        let target = path_arg(&args, "--write-config").unwrap().unwrap();
        PlayerConfig::default().save_to(&target).unwrap();

        let reload: Vec<String> = ["cutframe", "--config"]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(path.display().to_string()))
            .collect();
        assert_eq!(load_config(&reload).unwrap(), PlayerConfig::default());
    }
}
