//! Persistent application configuration model and defaults.

use std::path::PathBuf;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Remote playlist reference.
    pub catalog: CatalogConfig,
    #[serde(default)]
    /// Local cache location and integrity thresholds.
    pub cache: CacheConfig,
    #[serde(default)]
    /// Scheduler behavior and title timing.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// External download/transcode tool locations.
    pub tools: ToolsConfig,
    #[serde(default)]
    /// Loudness normalization targets.
    pub normalization: NormalizationConfig,
    #[serde(default)]
    /// Remote metadata classifier. The credential itself lives in the keyring.
    pub classifier: ClassifierConfig,
}

/// Playback selection behavior applied per scene activation.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Keep selecting new items while the scene is visible.
    #[default]
    Continuous,
    /// Play one item per activation, then wait for the next activation.
    Single,
    /// Select once per activation and repeat it until deactivation.
    Loop,
}

impl PlaybackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Single => "single",
            Self::Loop => "loop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continuous" => Some(Self::Continuous),
            "single" => Some(Self::Single),
            "loop" => Some(Self::Loop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CatalogConfig {
    /// Playlist URL or bare playlist id.
    #[serde(default)]
    pub playlist: String,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CacheConfig {
    /// Cache directory. Empty means the platform cache dir.
    #[serde(default)]
    pub directory: String,
    #[serde(default = "default_min_file_bytes")]
    pub min_file_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub mode: PlaybackMode,
    /// Name of the host scene that carries the video and title sources.
    #[serde(default = "default_scene_name")]
    pub scene_name: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_title_show_delay_ms")]
    pub title_show_delay_ms: u64,
    #[serde(default = "default_title_hide_before_end_ms")]
    pub title_hide_before_end_ms: u64,
    #[serde(default = "default_title_fade_ms")]
    pub title_fade_ms: u64,
    #[serde(default = "default_max_start_attempts")]
    pub max_start_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Maximum video height requested from the download tool.
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NormalizationConfig {
    #[serde(default = "default_integrated_lufs")]
    pub integrated_lufs: f64,
    #[serde(default = "default_true_peak_db")]
    pub true_peak_db: f64,
    #[serde(default = "default_loudness_range")]
    pub loudness_range: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ClassifierConfig {
    /// HTTPS endpoint accepting `{"id","title"}` and returning `{"song","artist"}`.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_max_pending_retries")]
    pub max_pending_retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: String::new(),
            min_file_bytes: default_min_file_bytes(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Continuous,
            scene_name: default_scene_name(),
            tick_interval_ms: default_tick_interval_ms(),
            title_show_delay_ms: default_title_show_delay_ms(),
            title_hide_before_end_ms: default_title_hide_before_end_ms(),
            title_fade_ms: default_title_fade_ms(),
            max_start_attempts: default_max_start_attempts(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: default_ytdlp_path(),
            ffmpeg_path: default_ffmpeg_path(),
            max_height: default_max_height(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            integrated_lufs: default_integrated_lufs(),
            true_peak_db: default_true_peak_db(),
            loudness_range: default_loudness_range(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_pending_retries: default_max_pending_retries(),
        }
    }
}

impl Config {
    /// Resolved cache directory, falling back to the platform cache location.
    pub fn cache_dir(&self) -> PathBuf {
        let configured = self.cache.directory.trim();
        if !configured.is_empty() {
            return PathBuf::from(configured);
        }
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("scenecast")
            .join("media")
    }
}

fn default_min_file_bytes() -> u64 {
    64 * 1024
}

fn default_scene_name() -> String {
    "Music".to_string()
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_title_show_delay_ms() -> u64 {
    1_500
}

fn default_title_hide_before_end_ms() -> u64 {
    3_500
}

fn default_title_fade_ms() -> u64 {
    1_000
}

fn default_max_start_attempts() -> u32 {
    3
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_max_height() -> u32 {
    1080
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_integrated_lufs() -> f64 {
    -14.0
}

fn default_true_peak_db() -> f64 {
    -1.0
}

fn default_loudness_range() -> f64 {
    11.0
}

fn default_max_pending_retries() -> u32 {
    3
}

/// Clamps user-edited values into ranges the workers and scheduler can honor.
pub fn sanitize_config(config: Config) -> Config {
    let playback = PlaybackConfig {
        mode: config.playback.mode,
        scene_name: if config.playback.scene_name.trim().is_empty() {
            default_scene_name()
        } else {
            config.playback.scene_name.trim().to_string()
        },
        tick_interval_ms: config.playback.tick_interval_ms.clamp(100, 5_000),
        title_show_delay_ms: config.playback.title_show_delay_ms.min(60_000),
        title_hide_before_end_ms: config.playback.title_hide_before_end_ms.min(60_000),
        title_fade_ms: config.playback.title_fade_ms.clamp(0, 10_000),
        max_start_attempts: config.playback.max_start_attempts.clamp(1, 10),
    };
    let tools = ToolsConfig {
        max_height: config.tools.max_height.clamp(144, 4320),
        probe_interval_secs: config.tools.probe_interval_secs.clamp(1, 3_600),
        ..config.tools
    };
    let normalization = NormalizationConfig {
        integrated_lufs: config.normalization.integrated_lufs.clamp(-70.0, -5.0),
        true_peak_db: config.normalization.true_peak_db.clamp(-9.0, 0.0),
        loudness_range: config.normalization.loudness_range.clamp(1.0, 50.0),
    };
    let classifier = ClassifierConfig {
        endpoint: config.classifier.endpoint.trim().to_string(),
        max_pending_retries: config.classifier.max_pending_retries.min(100),
    };

    Config {
        catalog: CatalogConfig {
            playlist: config.catalog.playlist.trim().to_string(),
        },
        cache: config.cache,
        playback,
        tools,
        normalization,
        classifier,
    }
}

#[cfg(test)]
mod tests {
    use super::{sanitize_config, Config, PlaybackMode};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.playback.mode, PlaybackMode::Continuous);
        assert_eq!(config.playback.title_show_delay_ms, 1_500);
        assert_eq!(config.playback.title_hide_before_end_ms, 3_500);
        assert_eq!(config.playback.title_fade_ms, 1_000);
        assert_eq!(config.normalization.integrated_lufs, -14.0);
        assert_eq!(config.cache.min_file_bytes, 64 * 1024);
        assert!(config.classifier.endpoint.is_empty());
    }

    #[test]
    fn test_partial_config_deserialization_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
[catalog]
playlist = "PL123"

[playback]
mode = "loop"
"#,
        )
        .expect("config should parse");

        assert_eq!(parsed.catalog.playlist, "PL123");
        assert_eq!(parsed.playback.mode, PlaybackMode::Loop);
        assert_eq!(parsed.playback.scene_name, "Music");
        assert_eq!(parsed.tools.ytdlp_path, "yt-dlp");
        assert_eq!(parsed.classifier.max_pending_retries, 3);
    }

    #[test]
    fn test_config_serialization_round_trips_mode() {
        let mut config = Config::default();
        config.playback.mode = PlaybackMode::Single;
        let text = toml::to_string(&config).expect("config should serialize");
        assert!(text.contains("mode = \"single\""));
        let parsed: Config = toml::from_str(&text).expect("config should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_sanitize_config_clamps_out_of_range_values() {
        let mut config = Config::default();
        config.playback.tick_interval_ms = 1;
        config.playback.max_start_attempts = 0;
        config.playback.scene_name = "   ".to_string();
        config.tools.max_height = 10;
        config.normalization.integrated_lufs = 3.0;
        config.catalog.playlist = "  PLabc  ".to_string();

        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.playback.tick_interval_ms, 100);
        assert_eq!(sanitized.playback.max_start_attempts, 1);
        assert_eq!(sanitized.playback.scene_name, "Music");
        assert_eq!(sanitized.tools.max_height, 144);
        assert_eq!(sanitized.normalization.integrated_lufs, -5.0);
        assert_eq!(sanitized.catalog.playlist, "PLabc");
    }

    #[test]
    fn test_playback_mode_parse_accepts_known_names() {
        assert_eq!(PlaybackMode::parse(" Loop "), Some(PlaybackMode::Loop));
        assert_eq!(PlaybackMode::parse("single"), Some(PlaybackMode::Single));
        assert_eq!(PlaybackMode::parse("shuffle"), None);
        assert_eq!(PlaybackMode::Continuous.as_str(), "continuous");
    }

    #[test]
    fn test_cache_dir_prefers_configured_directory() {
        let mut config = Config::default();
        config.cache.directory = "/srv/media".to_string();
        assert_eq!(config.cache_dir(), std::path::PathBuf::from("/srv/media"));
    }
}
