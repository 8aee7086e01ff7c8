use clap::Parser;
use std::path::PathBuf;

use crate::config::PlayerSettings;
use crate::core::coordinator::SyncPolicy;
use crate::core::playback::PlaybackMode;

// Build version with codec info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Codecs: image 0.25 (png, jpeg), gif 0.14, image-webp 0.2\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Headless animated image player
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Image to play (GIF, WebP, PNG, JPEG)
    #[arg(value_name = "FILE")]
    pub file_path: PathBuf,

    /// Playback rate multiplier (0 holds the current frame)
    #[arg(short = 'r', long = "rate", value_name = "RATE")]
    pub rate: Option<f64>,

    /// Playback mode: normal, reverse, bounce, reversed-bounce
    #[arg(short = 'm', long = "mode", value_name = "MODE")]
    pub mode: Option<PlaybackMode>,

    /// Stop after N loops (0 = loop forever, default: from the file)
    #[arg(long = "loops", value_name = "N")]
    pub loops: Option<usize>,

    /// Frame buffer budget in bytes (0 = auto, 1 = one frame)
    #[arg(long = "max-buffer", value_name = "BYTES")]
    pub max_buffer: Option<usize>,

    /// How long to run the host loop
    #[arg(short = 's', long = "seconds", value_name = "SECS", default_value = "3")]
    pub seconds: f64,

    /// Coordinator group the consumers join
    #[arg(short = 'g', long = "group", value_name = "NAME", default_value = "default")]
    pub group: String,

    /// Number of consumers sharing one player through the registry
    #[arg(long = "consumers", value_name = "N", default_value = "1")]
    pub consumers: usize,

    /// Sync policy for consumer start/stop: none, all, last
    #[arg(long = "policy", value_name = "POLICY", default_value = "last")]
    pub policy: SyncPolicy,

    /// Decode worker threads (0 = auto)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Write the effective settings to the config directory
    #[arg(long = "save-settings")]
    pub save_settings: bool,

    /// Enable debug logging to file (default: animplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// Command-line values override loaded settings
    pub fn apply_to(&self, settings: &mut PlayerSettings) {
        if let Some(rate) = self.rate {
            settings.playback_rate = rate;
        }
        if let Some(mode) = self.mode {
            settings.playback_mode = mode;
        }
        if let Some(bytes) = self.max_buffer {
            settings.max_buffer_size = bytes;
        }
        if let Some(workers) = self.workers {
            settings.worker_threads = workers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["animplay", "cat.gif"]).unwrap();
        assert_eq!(args.file_path, PathBuf::from("cat.gif"));
        assert_eq!(args.consumers, 1);
        assert_eq!(args.policy, SyncPolicy::Last);
        assert_eq!(args.group, "default");
        assert!(args.mode.is_none());
    }

    #[test]
    fn test_overrides_applied() {
        let args = Args::try_parse_from([
            "animplay", "cat.gif", "--rate", "2", "--mode", "bounce", "--max-buffer", "1", "-vv",
        ])
        .unwrap();
        assert_eq!(args.verbosity, 2);

        let mut settings = PlayerSettings::default();
        args.apply_to(&mut settings);
        assert_eq!(settings.playback_rate, 2.0);
        assert_eq!(settings.playback_mode, PlaybackMode::Bounce);
        assert_eq!(settings.max_buffer_size, 1);
        assert_eq!(settings.worker_threads, 0);
    }

    #[test]
    fn test_bad_mode_rejected() {
        assert!(Args::try_parse_from(["animplay", "cat.gif", "--mode", "sideways"]).is_err());
    }
}
