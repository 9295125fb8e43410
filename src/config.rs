use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_weights_file")]
    pub weights_file: String,
    #[serde(default = "default_config_file")]
    pub config_file: String,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_weights_file() -> String {
    "detection.pb".to_string()
}

fn default_config_file() -> String {
    "detection.pbtxt".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            weights_file: default_weights_file(),
            config_file: default_config_file(),
        }
    }
}

impl ModelConfig {
    pub fn get_weights_path(&self) -> PathBuf {
        self.model_dir.join(&self.weights_file)
    }

    pub fn get_config_path(&self) -> PathBuf {
        self.model_dir.join(&self.config_file)
    }
}

/// How a frame is turned into the network input blob.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InputConfig {
    #[serde(default = "default_input_side")]
    pub width: u32,
    #[serde(default = "default_input_side")]
    pub height: u32,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_swap_rb")]
    pub swap_rb: bool,
}

fn default_input_side() -> u32 {
    300
}

fn default_scale() -> f64 {
    1.0
}

fn default_swap_rb() -> bool {
    true
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            width: default_input_side(),
            height: default_input_side(),
            scale: default_scale(),
            swap_rb: default_swap_rb(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DetectionConfig {
    #[serde(default)]
    pub target_class_id: i32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_box_margin")]
    pub box_margin: f32,
    #[serde(default = "default_sign_side")]
    pub sign_side: u32,
    #[serde(default)]
    pub selection: Selection,
}

fn default_confidence_threshold() -> f32 {
    0.90
}

fn default_box_margin() -> f32 {
    0.008
}

fn default_sign_side() -> u32 {
    64
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            target_class_id: 0,
            confidence_threshold: default_confidence_threshold(),
            box_margin: default_box_margin(),
            sign_side: default_sign_side(),
            selection: Selection::default(),
        }
    }
}

/// Which qualifying record the extractor keeps.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    #[default]
    First,
    HighestConfidence,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u64,
}

fn default_max_consecutive_failures() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CaptureConfig {
    /// Camera index or path to a video file.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_capture_fps")]
    pub fps: u64,
}

fn default_source() -> String {
    "0".to_string()
}

fn default_capture_fps() -> u64 {
    30
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps.max(1) as f64).round() as u64
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            fps: default_capture_fps(),
        }
    }
}

impl CaptureConfig {
    pub fn get_frame_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.fps)
    }

    pub fn camera_index(&self) -> Option<i32> {
        self.source.trim().parse().ok()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_sign_dir")]
    pub sign_dir: PathBuf,
}

fn default_sign_dir() -> PathBuf {
    PathBuf::from("./signs")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sign_dir: default_sign_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No working directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("SD")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_yaml(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<Config>()
            .unwrap()
    }

    #[test]
    fn test_defaults_match_build_time_constants() {
        let config = from_yaml(
            "log_level: info\nserver:\n  host: 127.0.0.1\n  port: 8080\n",
        );

        assert_eq!(config.detection, DetectionConfig::default());
        assert_eq!(config.detection.confidence_threshold, 0.90);
        assert_eq!(config.detection.box_margin, 0.008);
        assert_eq!(config.detection.target_class_id, 0);
        assert_eq!(config.input.width, 300);
        assert_eq!(config.input.height, 300);
        assert!(config.input.swap_rb);
        assert_eq!(
            config.model.get_weights_path(),
            PathBuf::from("./models/detection.pb")
        );
        assert_eq!(
            config.model.get_config_path(),
            PathBuf::from("./models/detection.pbtxt")
        );
    }

    #[test]
    fn test_overrides() {
        let config = from_yaml(
            "log_level: debug\n\
             server:\n  host: 0.0.0.0\n  port: 9000\n\
             detection:\n  target_class_id: 3\n  sign_side: 128\n  selection: highest_confidence\n\
             capture:\n  source: ./clip.mp4\n  fps: 25\n",
        );

        assert_eq!(config.log_level.as_str(), "debug");
        assert_eq!(config.server.get_address(), "0.0.0.0:9000");
        assert_eq!(config.detection.target_class_id, 3);
        assert_eq!(config.detection.sign_side, 128);
        assert_eq!(config.detection.selection, Selection::HighestConfidence);
        assert_eq!(config.capture.camera_index(), None);
        assert_eq!(config.capture.get_frame_delay_ms(), 40);
    }

    #[test]
    fn test_log_level_rejects_unknown() {
        let level: Result<LogLevel, String> = "trace".to_string().try_into();
        assert!(level.is_err());
    }
}
