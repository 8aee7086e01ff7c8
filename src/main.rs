use animplay::cli::Args;
use animplay::coders::{CoderChain, ImageCrateCoder};
use animplay::config::PlayerSettings;
use animplay::core::coordinator::Coordinator;
use animplay::core::player::PlayerContext;
use animplay::core::registry::Registry;
use animplay::paths::{self, PathConfig, SETTINGS_FILE};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Host loop period (60 Hz)
const HOST_TICK: Duration = Duration::from_micros(16_667);

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file("animplay.log", path_config));
        paths::ensure_parent(&log_path)?;
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    init_logging(&args, &path_config)?;

    info!("animplay {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    // Settings: file, then command line on top
    let settings_path = paths::config_file(SETTINGS_FILE, &path_config);
    let mut settings = PlayerSettings::load(&settings_path)
        .with_context(|| format!("Failed to load settings: {}", settings_path.display()))?;
    args.apply_to(&mut settings);
    if args.save_settings {
        paths::ensure_parent(&settings_path)?;
        settings.save(&settings_path)
            .with_context(|| format!("Failed to save settings: {}", settings_path.display()))?;
        info!("Settings saved to {}", settings_path.display());
    }

    // Decode
    let data: Arc<[u8]> = std::fs::read(&args.file_path)
        .with_context(|| format!("Failed to read {}", args.file_path.display()))?
        .into();
    let chain = CoderChain::new();
    chain.add_coder(Arc::new(ImageCrateCoder::from_settings(&settings)));
    let source = chain
        .frame_source(data)
        .with_context(|| format!("Failed to decode {}", args.file_path.display()))?;
    info!(
        "Input: {} ({} frames, loops {})",
        args.file_path.display(),
        source.frame_count(),
        source.loop_count()
    );

    // Consumers share one player through the registry
    let registry = Registry::new(PlayerContext::from_settings(settings));
    let coordinators: Vec<Coordinator> = (0..args.consumers.max(1))
        .map(|_| registry.coordinator(args.group.clone()))
        .collect();
    let players = coordinators
        .iter()
        .map(|c| registry.shared_player(Arc::clone(&source), c))
        .collect::<animplay::Result<Vec<_>>>()
        .context("Failed to create player")?;
    let player = players.first().cloned().context("No consumer")?;
    debug!("{} consumer(s), {} shared player(s)", coordinators.len(), registry.player_count());

    if let Some(loops) = args.loops {
        player.set_total_loop_count(loops);
    }

    let shown = Arc::new(AtomicUsize::new(0));
    let loops = Arc::new(AtomicUsize::new(0));
    {
        let shown = Arc::clone(&shown);
        player.add_frame_handler(move |index, frame| {
            trace!("Frame {} ({}x{})", index, frame.width(), frame.height());
            shown.fetch_add(1, Ordering::Relaxed);
        });
        let loops = Arc::clone(&loops);
        player.add_loop_handler(move |count| {
            info!("Loop {} finished", count);
            loops.store(count, Ordering::Relaxed);
        });
    }

    for coordinator in &coordinators {
        coordinator.start_playing(args.policy);
    }

    let started = Instant::now();
    let deadline = started + Duration::from_secs_f64(args.seconds.max(0.0));
    while Instant::now() < deadline {
        player.update();
        if !player.is_playing() {
            info!("Playback finished");
            break;
        }
        thread::sleep(HOST_TICK);
    }
    let elapsed = started.elapsed();
    let final_index = player.current_frame_index();
    let stats = player.buffer_stats();

    for coordinator in &coordinators {
        coordinator.stop_playing(args.policy);
    }

    println!("File:        {}", args.file_path.display());
    println!("Frames:      {}", player.total_frame_count());
    println!("Elapsed:     {:.2}s", elapsed.as_secs_f64());
    println!("Shown:       {} frames", shown.load(Ordering::Relaxed));
    println!("Loops:       {}", loops.load(Ordering::Relaxed));
    println!("Last frame:  {}", final_index);
    println!("Consumers:   {} (group '{}')", coordinators.len(), args.group);
    println!(
        "Buffer:      {} entries, {} KB, {} hits / {} misses ({:.1}%), {} evictions",
        stats.entries,
        stats.resident_bytes / 1024,
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0,
        stats.evictions
    );
    Ok(())
}
