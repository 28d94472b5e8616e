// ============================================================================
// Headless playback
// ============================================================================
//
// Drives the same pipeline as the window without one: open, optionally seek,
// play for a while, then report stats and optionally save the frame on screen.

use anyhow::{anyhow, Result};
use cutframe_core::{FrameSink, Player, PlayerConfig, PlayerState, TestPatternDecoder};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::display::DisplaySlot;
use crate::format_time;

const PATTERN_DURATION_MS: i64 = 10_000;
const PATTERN_FPS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessOptions {
    pub input: Option<PathBuf>,
    pub test_pattern: bool,
    pub play_ms: u64,
    pub seek_ms: Option<i64>,
    pub snapshot: Option<PathBuf>,
}

/// Summary of a run, also logged.
#[derive(Debug, Clone)]
pub struct HeadlessReport {
    pub position_ms: i64,
    pub duration_ms: i64,
    pub frames_emitted: u64,
    pub last_frame_ms: Option<i64>,
    pub ended: bool,
}

pub fn parse_headless_args(args: &[String]) -> Result<HeadlessOptions> {
    let mut options = HeadlessOptions {
        input: None,
        test_pattern: false,
        play_ms: 2000,
        seek_ms: None,
        snapshot: None,
    };

    let value = |i: usize, flag: &str| {
        args.get(i + 1)
            .ok_or_else(|| anyhow!("Missing value for {}", flag))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                options.input = Some(PathBuf::from(value(i, "--input")?));
                i += 2;
            }
            "--play-ms" => {
                let raw = value(i, "--play-ms")?;
                options.play_ms = raw
                    .parse()
                    .map_err(|e| anyhow!("Invalid --play-ms {}: {}", raw, e))?;
                i += 2;
            }
            "--seek" => {
                let raw = value(i, "--seek")?;
                options.seek_ms = Some(
                    raw.parse()
                        .map_err(|e| anyhow!("Invalid --seek {}: {}", raw, e))?,
                );
                i += 2;
            }
            "--snapshot" => {
                options.snapshot = Some(PathBuf::from(value(i, "--snapshot")?));
                i += 2;
            }
            "--test-pattern" => {
                options.test_pattern = true;
                i += 1;
            }
            "--config" => {
                // Read by main
                i += 2;
            }
            "--help" | "-h" => {
                print_headless_usage();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    if options.input.is_none() && !options.test_pattern {
        print_headless_usage();
        return Err(anyhow!("Missing --input (or --test-pattern) for headless playback"));
    }
    Ok(options)
}

pub fn print_headless_usage() {
    eprintln!(
        "\nHeadless playback usage:\n  cutframe --headless (--input <file> | --test-pattern) \
         [--play-ms <n>] [--seek <ms>] [--snapshot <out.png>] [--config <file>]\n"
    );
}

pub fn run_headless(options: &HeadlessOptions, config: PlayerConfig) -> Result<HeadlessReport> {
    let mut player = Player::new(config);
    let display = Arc::new(DisplaySlot::new(None));
    let sink: Arc<dyn FrameSink> = display.clone();

    match (&options.input, options.test_pattern) {
        (_, true) => {
            let decoder = TestPatternDecoder::new(PATTERN_DURATION_MS, PATTERN_FPS, 640, 360);
            player.initialize_with(Box::new(decoder), sink)?;
        }
        (Some(input), false) => player.initialize(input, sink)?,
        (None, false) => return Err(anyhow!("No input given")),
    }

    tracing::info!(
        "Headless playback starting: duration={}, play_ms={}",
        format_time(player.duration_ms()),
        options.play_ms
    );

    if let Some(seek_ms) = options.seek_ms {
        player.seek_to(seek_ms)?;
    }
    player.play()?;
    thread::sleep(Duration::from_millis(options.play_ms));
    player.pause()?;

    let stats = player.stats();
    let latest = display.latest();
    tracing::info!(
        "Headless playback complete: position={} ms, emitted={}, skipped={}, idle_ticks={}, decoded={}, decode_errors={}, buffered={} [{:?}..{:?}], eos={}",
        stats.position_ms,
        stats.frames_emitted,
        stats.frames_skipped,
        stats.idle_ticks,
        stats.frames_decoded,
        stats.decode_errors,
        stats.buffer.buffered_frames,
        stats.buffer.start_time_ms,
        stats.buffer.end_time_ms,
        stats.end_of_stream
    );

    if let Some(path) = &options.snapshot {
        let picture = latest
            .as_ref()
            .ok_or_else(|| anyhow!("No frame was displayed, nothing to snapshot"))?;
        picture
            .image
            .save(path)
            .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;
        tracing::info!(
            "Saved frame at {} ms to {}",
            picture.timestamp_ms,
            path.display()
        );
    }

    let report = HeadlessReport {
        position_ms: player.current_position(),
        duration_ms: player.duration_ms(),
        frames_emitted: stats.frames_emitted,
        last_frame_ms: latest.map(|p| p.timestamp_ms),
        ended: player.state() == PlayerState::Paused && stats.end_of_stream,
    };
    player.stop();
    Ok(report)
}
