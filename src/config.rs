// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and field is optional; anything missing takes its default.
// A missing or malformed file falls back to defaults entirely.

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH: &str = "config.toml";

/// Upper bound on frames in flight; more only adds latency
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 4;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetsConfig,
}

/// Window settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// `error`, `warn`, `info`, `debug` or `trace`; `RUST_LOG` wins when set
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

/// Asset paths, relative to the working directory
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// Procedural checkerboard when unset
    pub texture: Option<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            texture: None,
        }
    }
}

/// Why a config file could not be used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration from `path`, falling back to defaults on any error.
    ///
    /// Runs before logging is initialised, so the error is handed back for
    /// the caller to report.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<ConfigError>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Configured frames in flight, clamped to `1..=MAX_FRAMES_IN_FLIGHT_LIMIT`
    pub fn frames_in_flight(&self) -> usize {
        let requested = self.graphics.max_frames_in_flight;
        let clamped = requested.clamp(1, MAX_FRAMES_IN_FLIGHT_LIMIT);
        if clamped != requested {
            log::warn!(
                "max_frames_in_flight = {} is out of range, using {}",
                requested,
                clamped
            );
        }
        clamped
    }

    /// Log filter for env_logger; unknown names fall back to `info`
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.frames_in_flight(), 2);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Spinning quad"
            width = 640

            [graphics]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Spinning quad");
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert!(config.window.resizable);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.assets, AssetsConfig::default());
    }

    #[test]
    fn assets_section_sets_paths() {
        let config = Config::parse(
            r#"
            [assets]
            vertex_shader = "build/quad.vert.spv"
            fragment_shader = "build/quad.frag.spv"
            texture = "textures/crate.png"
            "#,
        )
        .unwrap();

        assert_eq!(config.assets.vertex_shader, PathBuf::from("build/quad.vert.spv"));
        assert_eq!(config.assets.fragment_shader, PathBuf::from("build/quad.frag.spv"));
        assert_eq!(config.assets.texture, Some(PathBuf::from("textures/crate.png")));
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut config = Config::default();

        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);

        config.graphics.max_frames_in_flight = 3;
        assert_eq!(config.frames_in_flight(), 3);

        config.graphics.max_frames_in_flight = 64;
        assert_eq!(config.frames_in_flight(), MAX_FRAMES_IN_FLIGHT_LIMIT);
    }

    #[test]
    fn log_level_parses_names() {
        let mut config = Config::default();
        assert_eq!(config.log_level(), log::LevelFilter::Info);

        config.debug.log_level = "TRACE".into();
        assert_eq!(config.log_level(), log::LevelFilter::Trace);

        config.debug.log_level = "loud".into();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_on_disk_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[debug]\nshow_fps = false\nlog_level = \"debug\"").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert!(!config.debug.show_fps);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graphics]\nmax_frames_in_flight = \"many\"").unwrap();

        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn malformed_file_falls_back_and_reports() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[graphics]\nmax_frames_in_flight = \"many\"").unwrap();

        let (config, error) = Config::load_or_default(file.path());
        assert_eq!(config, Config::default());
        assert!(matches!(error, Some(ConfigError::Parse { .. })));
    }

    #[test]
    fn valid_file_reports_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nwidth = 800").unwrap();

        let (config, error) = Config::load_or_default(file.path());
        assert_eq!(config.window.width, 800);
        assert!(error.is_none());
    }
}
