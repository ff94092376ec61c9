use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FitError>;

/// Failure reported by a simulator collaborator
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("failed to launch simulator '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("simulator exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("could not parse simulator output '{0}'")]
    Output(String),

    #[error("wavelength {0:.2} nm was not rendered in reference mode")]
    MissingReference(f64),

    #[error("simulator rejected request: {0}")]
    Rejected(String),
}

/// Failure reported by the result store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("subresult already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("invalid file name pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Invalid configuration value
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bounds for '{name}': lower {lower} must be below upper {upper}")]
    Bounds { name: &'static str, lower: f64, upper: f64 },

    #[error("density lower bound for '{0}' must be positive")]
    NonPositiveDensity(&'static str),

    #[error("invalid value for '{name}': {reason}")]
    Value { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum FitError {
    #[error("optimization method '{0}' not recognized")]
    UnknownOptimizer(String),

    #[error("simulator failed at {wavelength:.2} nm: {source}")]
    Simulator {
        wavelength: f64,
        #[source]
        source: SimulatorError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("local polish failed: {0}")]
    Polish(String),

    #[error("no subresults found for set '{0}'")]
    NoSubresults(String),

    #[error("invalid batch request: {0}")]
    Batch(String),

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
