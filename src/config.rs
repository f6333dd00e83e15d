use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// How note timing is measured during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// Ticks since the previous matching note on the same channel.
    #[default]
    Delta,
    /// Cumulative ticks from the start of the file.
    Absolute,
}

/// Fixed coefficients combining the three histogram representations
/// into one fused score. RTB dominates: relative pitch motion is the
/// most discriminative cue.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub atb: f64,
    pub rtb: f64,
    pub ftb: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            atb: 0.15,
            rtb: 0.60,
            ftb: 0.25,
        }
    }
}

/// All pipeline constants in one immutable value, threaded through every
/// stage so tests can vary them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// MIDI channels processed independently and merged at the end.
    pub channels: Vec<u8>,
    /// Notes per segment window.
    pub segment_length: usize,
    /// Notes shared between consecutive windows.
    pub overlap: usize,
    /// Representation fusion weights.
    pub weights: FusionWeights,
    /// Timing mode for extracted note events.
    pub timing: TimingMode,
    /// Whether to normalize the timing values as well as the pitches.
    pub normalize_timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: vec![0, 1, 2, 10],
            segment_length: 20,
            overlap: 6,
            weights: FusionWeights::default(),
            timing: TimingMode::default(),
            normalize_timing: false,
        }
    }
}

impl PipelineConfig {
    /// Window advance between consecutive segments.
    pub fn hop(&self) -> usize {
        self.segment_length.saturating_sub(self.overlap).max(1)
    }
}

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Default corpus folder (used when `query`/`extract` has no CLI arg).
    pub corpus_dir: Option<PathBuf>,
    /// Directory for intermediate JSON artifacts (overrides XDG default).
    pub cache_dir: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Pipeline parameter overrides.
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load config from `~/.config/humdex/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        match toml::from_str::<AppConfig>(&contents) {
                            Ok(config) => {
                                log::info!("Loaded config from {}", path.display());
                                config
                            }
                            Err(e) => {
                                log::warn!(
                                    "Failed to parse {}: {}. Using defaults.",
                                    path.display(),
                                    e
                                );
                                Self::default()
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to read {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                }
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default artifact cache directory using XDG data paths.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir().join("artifacts");
        std::fs::create_dir_all(&data_dir).ok();
        data_dir
    } else {
        // Fallback: current directory
        PathBuf::from("humdex-artifacts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = FusionWeights::default();
        assert!((w.atb + w.rtb + w.ftb - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_hop() {
        let config = PipelineConfig::default();
        assert_eq!(config.hop(), 14);
    }

    #[test]
    fn test_malformed_pipeline_toml_rejected() {
        let err = toml::from_str::<AppConfig>("pipeline = \"not a table\"");
        assert!(err.is_err());
    }

    #[test]
    fn test_pipeline_toml_overrides() {
        let config: AppConfig = toml::from_str(
            "workers = 4\n\
             [pipeline]\n\
             channels = [0, 3]\n\
             segment_length = 10\n\
             overlap = 2\n\
             timing = \"absolute\"\n",
        )
        .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.pipeline.channels, vec![0, 3]);
        assert_eq!(config.pipeline.hop(), 8);
        assert_eq!(config.pipeline.timing, TimingMode::Absolute);
        // Unspecified weights keep their defaults
        assert!((config.pipeline.weights.rtb - 0.60).abs() < 1e-12);
    }
}
