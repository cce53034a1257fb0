use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// EPSG code for WGS 84 lat/lon coordinates
pub const LAT_LON_EPSG_CODE: u32 = 4326;

/// Static description of a transformer, supplied by the algorithm author
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// The version number of the transformer
    pub version: String,
    /// The transformer description
    pub description: String,
    /// Short name of the transformer; also the metadata key for
    /// transformer-specific extension fields
    pub name: String,
    /// The sensor associated with the transformer
    pub sensor: Option<String>,
    /// The transformer type (eg: "rgbmask", "plotclipper")
    pub transformer_type: Option<String>,
    pub author_name: String,
    pub author_email: String,
    pub contributors: Vec<String>,
    /// Repository URI of where the source code lives
    pub repository: Option<String>,
    /// Whether a run without any metadata files is an error
    pub metadata_needed: bool,
}

/// Per-run check parameters derived from metadata and CLI arguments.
/// Constructed once per process invocation and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct CheckMd {
    pub timestamp: String,
    pub season: String,
    pub experiment: String,
    pub working_folder: PathBuf,
    pub list_files: Vec<PathBuf>,
    pub container_name: Option<String>,
    pub target_container_name: Option<String>,
    pub trigger_name: Option<String>,
    pub context_md: Option<Value>,
}

impl CheckMd {
    pub fn list_files(&self) -> &[PathBuf] {
        &self.list_files
    }

    pub fn working_folder(&self) -> &PathBuf {
        &self.working_folder
    }
}

/// Everything an algorithm gets handed for one run
#[derive(Debug, Clone)]
pub struct TransformerParams {
    pub check_md: CheckMd,
    /// Transformer-specific extension entries found in the metadata
    pub transformer_md: Vec<Value>,
    /// The full parsed metadata records
    pub full_md: Vec<Value>,
}

/// Result of an algorithm's pre-flight check. A zero code means processing
/// should continue; a negative code stops the run with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueResult {
    pub code: i32,
    pub message: Option<String>,
}

impl ContinueResult {
    pub fn ready() -> Self {
        ContinueResult { code: 0, message: None }
    }

    pub fn stop(code: i32, message: impl Into<String>) -> Self {
        ContinueResult { code, message: Some(message.into()) }
    }
}

/// Error types for the transformer pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Builds the `{"error": ..., "code": ...}` result body. Implies processing
/// will stop; missing pieces get defaults and a logged warning.
pub fn error_result(code: Option<i32>, message: Option<String>) -> Value {
    let code = match code {
        Some(code) => code,
        None => {
            log::warn!("An error has occurred without a return code specified, setting default return code");
            -1
        }
    };
    let message = match message {
        Some(message) if !message.is_empty() => message,
        _ => {
            log::warn!("An error has occurred without a message, setting default message");
            format!("An error has occurred with error code ({})", code)
        }
    };

    log::error!("{}", message);
    log::error!("Stopping processing");

    serde_json::json!({ "error": message, "code": code })
}
