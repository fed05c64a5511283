//! Layered loading of stage configuration.
//!
//! A configuration directory holds a `base` file and one override file per [`Environment`],
//! each in YAML or JSON. [`ConfigLoader`] merges base, environment file and `APP_` prefixed
//! environment variables, in that order, deserializes the result and validates it before
//! handing it out.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::ValidationError;

/// Directory searched by [`ConfigLoader::from_current_dir`], relative to the working directory.
pub const CONFIGURATION_DIR: &str = "configuration";

const FILE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Environment variables starting with `APP_` override file values. Nested keys are joined with
/// `__`, so `APP_BATCH__MAX_SIZE` sets `batch.max_size`.
const ENV_PREFIX: &str = "APP";
const ENV_NESTING_SEPARATOR: &str = "__";
const ENV_LIST_SEPARATOR: &str = ",";

/// Configuration that can be produced by a [`ConfigLoader`].
pub trait Config: DeserializeOwned {
    /// Keys whose environment variable values are split on commas into lists.
    const LIST_KEYS: &'static [&'static str] = &[];

    /// Rejects values that deserialized fine but cannot be used.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// One file in the configuration directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn stem(&self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base"),
            Layer::Environment(environment) => write!(f, "{environment} environment"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("could not resolve the configuration directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    #[error("unknown runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("`{0}` is not a configuration directory")]
    NotADirectory(PathBuf),

    #[error("no {layer} configuration file in `{directory}`")]
    MissingLayer { layer: Layer, directory: PathBuf },

    #[error("{layer} file `{path}` is malformed: {source}")]
    MalformedLayer {
        layer: Layer,
        path: PathBuf,
        source: config::ConfigError,
    },

    #[error("configuration could not be assembled: {0}")]
    Assemble(#[source] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads a [`Config`] from a configuration directory for one environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    directory: PathBuf,
    environment: Environment,
    env_overrides: bool,
}

impl ConfigLoader {
    /// Creates a loader reading `directory` for `environment`, with environment variable
    /// overrides enabled.
    pub fn new(directory: impl Into<PathBuf>, environment: Environment) -> Self {
        Self {
            directory: directory.into(),
            environment,
            env_overrides: true,
        }
    }

    /// Creates a loader for `./configuration`, with the environment taken from
    /// `APP_ENVIRONMENT`.
    pub fn from_current_dir() -> Result<Self, LoadConfigError> {
        let directory = std::env::current_dir()
            .map_err(LoadConfigError::WorkingDirectory)?
            .join(CONFIGURATION_DIR);
        let environment = Environment::load().map_err(LoadConfigError::Environment)?;

        Ok(Self::new(directory, environment))
    }

    /// Turns `APP_` environment variable overrides on or off.
    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Reads, merges, deserializes and validates the configuration.
    pub fn load<T: Config>(&self) -> Result<T, LoadConfigError> {
        if !self.directory.is_dir() {
            return Err(LoadConfigError::NotADirectory(self.directory.clone()));
        }

        let mut builder = config::Config::builder();
        for layer in [Layer::Base, Layer::Environment(self.environment)] {
            let path = self.locate(layer)?;
            builder = builder.add_source(parse_layer(layer, &path)?);
        }

        if self.env_overrides {
            builder = builder.add_source(env_source::<T>());
        }

        let config: T = builder
            .build()
            .and_then(|merged| merged.try_deserialize())
            .map_err(LoadConfigError::Assemble)?;
        config.validate()?;

        Ok(config)
    }

    fn locate(&self, layer: Layer) -> Result<PathBuf, LoadConfigError> {
        FILE_EXTENSIONS
            .iter()
            .map(|extension| self.directory.join(format!("{}.{extension}", layer.stem())))
            .find(|path| path.is_file())
            .ok_or_else(|| LoadConfigError::MissingLayer {
                layer,
                directory: self.directory.clone(),
            })
    }
}

/// Loads `T` from `./configuration` for the environment named by `APP_ENVIRONMENT`.
pub fn load_config<T: Config>() -> Result<T, LoadConfigError> {
    ConfigLoader::from_current_dir()?.load()
}

/// Parses a single file on its own so a syntax error names the file it came from.
fn parse_layer(layer: Layer, path: &Path) -> Result<config::Config, LoadConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .map_err(|source| LoadConfigError::MalformedLayer {
            layer,
            path: path.to_path_buf(),
            source,
        })
}

fn env_source<T: Config>() -> config::Environment {
    let mut source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_NESTING_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_KEYS.is_empty() {
        source = source.list_separator(ENV_LIST_SEPARATOR);
        for key in T::LIST_KEYS {
            source = source.with_list_parse_key(key);
        }
    }

    source
}
