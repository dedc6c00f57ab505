use std::path::PathBuf;

use common::helper::error_chain_fmt;
use lapin::ConnectionProperties;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::domain::entities::output_page::NamingScheme;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub object_storage: ObjectStorageSettings,
    pub rabbitmq: RabbitMQSettings,
    #[serde(default)]
    pub normalization: NormalizationSettings,
    #[serde(default)]
    pub callback: CallbackSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ObjectStorageSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub region: String,
    /// Bucket used when a job does not name one
    pub bucket_name: String,
}

impl ObjectStorageSettings {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RabbitMQSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    /// URL-encoded virtual host, `%2f` for the default one
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Durable queue the normalization jobs are consumed from
    pub queue_name: String,
    /// When set, a message describing each normalized batch is published to this queue
    #[serde(default)]
    pub results_queue: Option<String>,
}

fn default_vhost() -> String {
    "%2f".to_string()
}

impl RabbitMQSettings {
    pub fn get_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.username,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.vhost
        )
    }

    pub fn get_connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties::default()
            // Use tokio executor and reactor.
            // At the moment the reactor is only available for unix.
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormalizationSettings {
    /// Parent directory of every scratch workspace, the OS temp dir if unset
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    #[serde(default)]
    pub naming_scheme: NamingScheme,
    #[serde(default)]
    pub ghostscript: GhostscriptSettings,
    #[serde(default)]
    pub imagemagick: ImageMagickSettings,
}

impl NormalizationSettings {
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GhostscriptSettings {
    pub binary: String,
    pub width: u32,
    pub height: u32,
    /// Dots per inch
    pub resolution: u32,
    pub quality: u8,
}

impl Default for GhostscriptSettings {
    fn default() -> Self {
        Self {
            binary: "gs".to_string(),
            width: 848,
            height: 1168,
            resolution: 150,
            quality: 90,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageMagickSettings {
    pub binary: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl Default for ImageMagickSettings {
    fn default() -> Self {
        Self {
            binary: "magick".to_string(),
            width: 848,
            height: 1168,
            quality: 90,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallbackSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_secs: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Settings {
    /// Rejects settings where a required parameter is present but empty
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let storage = &self.object_storage;
        let rabbitmq = &self.rabbitmq;

        let required = [
            ("object_storage.host", storage.host.as_str()),
            ("object_storage.region", storage.region.as_str()),
            ("object_storage.bucket_name", storage.bucket_name.as_str()),
            ("object_storage.username", storage.username.as_str()),
            ("object_storage.password", storage.password.expose_secret().as_str()),
            ("rabbitmq.host", rabbitmq.host.as_str()),
            ("rabbitmq.username", rabbitmq.username.as_str()),
            ("rabbitmq.password", rabbitmq.password.expose_secret().as_str()),
            ("rabbitmq.queue_name", rabbitmq.queue_name.as_str()),
        ];

        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigurationError::MissingParameter(name.to_string()));
        }

        if storage.port == 0 {
            return Err(ConfigurationError::MissingParameter(
                "object_storage.port".to_string(),
            ));
        }
        if rabbitmq.port == 0 {
            return Err(ConfigurationError::MissingParameter("rabbitmq.port".to_string()));
        }

        Ok(())
    }
}

/// Extracts app settings from configuration files and env variables
///
/// `base.yaml` should contain shared settings for all environments.
/// A specific env file can be added for each environment: `develop.yaml`,`local.yaml` and `production.yaml`
/// The environment is set with the env var `APP_ENVIRONMENT`.
/// If `APP_ENVIRONMENT` is not set, `develop.yaml` is the default.
///
/// Settings are also taken from environment variables: with a prefix of APP and '__' as separator
/// For ex: `APP_RABBITMQ__HOST=rabbitmq` would set `Settings.rabbitmq.host`
pub fn get_configuration() -> Result<Settings, ConfigurationError> {
    let base_path = std::env::current_dir().map_err(ConfigurationError::CurrentDirectory)?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "develop".into())
        .try_into()
        .map_err(ConfigurationError::InvalidEnvironment)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename))
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;

    Ok(settings)
}

/// The possible runtime environment for our application.
pub enum Environment {
    Develop,
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Develop => "develop",
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "develop" => Ok(Self::Develop),
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `develop`, `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to determine the current directory")]
    CurrentDirectory(#[source] std::io::Error),
    #[error("{0}")]
    InvalidEnvironment(String),
    #[error("Failed to load the configuration")]
    Load(#[from] config::ConfigError),
    #[error("Missing required configuration parameter `{0}`")]
    MissingParameter(String),
}

impl std::fmt::Debug for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
