use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::VisualizerError;
use crate::spectrum::DecoderSettings;
use crate::visualizer::VisualizerSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_analyzer_path")]
    pub path: PathBuf,
    /// Largest magnitude the analyzer build reports.
    #[serde(default = "default_normalization_constant")]
    pub normalization_constant: f32,
    #[serde(default = "default_field_separator")]
    pub field_separator: String,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Gpu,
}

#[derive(Debug, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_bar_color")]
    pub bar_color: [u8; 3],
    #[serde(default)]
    pub background: [u8; 3],
    #[serde(default = "default_backend")]
    pub backend: Backend,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub record: Option<PathBuf>,
    #[serde(default)]
    pub preview: bool,
    #[serde(default = "default_codec")]
    pub codec: String,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            path: default_analyzer_path(),
            normalization_constant: default_normalization_constant(),
            field_separator: default_field_separator(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            width: default_width(),
            height: default_height(),
            bar_color: default_bar_color(),
            background: [0, 0, 0],
            backend: default_backend(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            record: None,
            preview: false,
            codec: default_codec(),
        }
    }
}

/// Where presented frames go.
#[derive(Debug, PartialEq, Eq)]
pub enum OutputTarget<'a> {
    Record(&'a Path),
    Preview,
}

impl OutputConfig {
    /// Recording wins over preview. `None` means frames are drawn but never shown.
    pub fn target(&self) -> Option<OutputTarget<'_>> {
        match self.record {
            Some(ref path) => Some(OutputTarget::Record(path)),
            None if self.preview => Some(OutputTarget::Preview),
            None => None,
        }
    }
}

fn default_analyzer_path() -> PathBuf {
    expand_home(Path::new("~/sources/cava_raw/.smake/targets/cava"))
}
fn default_normalization_constant() -> f32 { 40_000.0 }
fn default_field_separator() -> String { ";".into() }
fn default_grace_period_ms() -> u64 { 500 }
fn default_tick_interval_ms() -> u64 { 10 }
fn default_width() -> u32 { 200 }
fn default_height() -> u32 { 200 }
fn default_bar_color() -> [u8; 3] { [255, 0, 0] }
fn default_backend() -> Backend { Backend::Cpu }
fn default_codec() -> String { "libx264".into() }

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    config.analyzer.path = expand_home(&config.analyzer.path);
    Ok(config)
}

/// `./nowbar.toml`, then `~/.config/nowbar/config.toml`, then the platform
/// config directory.
pub fn discover_config() -> Option<PathBuf> {
    let local = PathBuf::from("nowbar.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("nowbar").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("nowbar").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

impl Config {
    pub fn validate(&self) -> Result<(), VisualizerError> {
        let invalid = |msg: String| -> Result<(), VisualizerError> { Err(VisualizerError::Config(msg)) };
        let c = self.analyzer.normalization_constant;
        if !c.is_finite() || c <= 0.0 {
            return invalid(format!("normalization_constant must be positive, got {c}"));
        }
        if self.analyzer.field_separator.is_empty() {
            return invalid("field_separator must not be empty".into());
        }
        if self.render.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be at least 1".into());
        }
        if self.render.width == 0 || self.render.height == 0 {
            return invalid(format!(
                "viewport must be non-zero, got {}x{}",
                self.render.width, self.render.height
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.render.tick_interval_ms)
    }

    /// Presented frames per second at the configured tick rate.
    pub fn fps(&self) -> u32 {
        (1000 / self.render.tick_interval_ms.max(1)).max(1) as u32
    }

    pub fn visualizer_settings(&self) -> VisualizerSettings {
        VisualizerSettings {
            analyzer_path: self.analyzer.path.clone(),
            decoder: DecoderSettings {
                normalization_constant: self.analyzer.normalization_constant,
                field_separator: self.analyzer.field_separator.clone(),
            },
            grace_period: Duration::from_millis(self.analyzer.grace_period_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_analyzer() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.analyzer.normalization_constant, 40_000.0);
        assert_eq!(config.analyzer.field_separator, ";");
        assert_eq!(config.render.tick_interval_ms, 10);
        assert_eq!(config.render.bar_color, [255, 0, 0]);
        assert_eq!(config.render.backend, Backend::Cpu);
        assert_eq!(config.fps(), 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nowbar.toml");
        std::fs::write(
            &path,
            r#"
[analyzer]
path = "/opt/cava/cava"
normalization_constant = 1000.0

[render]
tick_interval_ms = 20
backend = "gpu"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.analyzer.path, PathBuf::from("/opt/cava/cava"));
        assert_eq!(config.analyzer.grace_period_ms, 500);
        assert_eq!(config.render.backend, Backend::Gpu);
        assert_eq!(config.tick_interval(), Duration::from_millis(20));
        assert_eq!(config.fps(), 50);

        let settings = config.visualizer_settings();
        assert_eq!(settings.decoder.normalization_constant, 1000.0);
        assert_eq!(settings.grace_period, Duration::from_millis(500));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = Config::default();
        config.analyzer.normalization_constant = 0.0;
        assert!(matches!(config.validate(), Err(VisualizerError::Config(_))));

        let mut config = Config::default();
        config.analyzer.field_separator.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.render.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn output_target_prefers_recording() {
        let mut output = OutputConfig::default();
        assert_eq!(output.target(), None);

        output.preview = true;
        assert_eq!(output.target(), Some(OutputTarget::Preview));

        output.record = Some(PathBuf::from("bars.mp4"));
        assert_eq!(output.target(), Some(OutputTarget::Record(Path::new("bars.mp4"))));
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/bin/cava")), home.join("bin/cava"));
        }
        assert_eq!(expand_home(Path::new("/usr/bin/cava")), PathBuf::from("/usr/bin/cava"));
    }
}
