//! Loading of JSON and YAML metadata files

use serde_json::Value;
use std::path::Path;

use crate::types::{PipelineError, PipelineResult};

/// Loads the metadata from the specified path.
///
/// Files ending in `.yml`/`.yaml` are parsed as YAML, everything else as
/// JSON. A document that parses to null is invalid.
pub fn load_metadata(metadata_path: &Path) -> PipelineResult<Value> {
    let contents = std::fs::read_to_string(metadata_path).map_err(|err| {
        let msg = format!("Unable to load metadata file '{}'", metadata_path.display());
        log::error!("{}", msg);
        log::error!("Exception caught: {}", err);
        PipelineError::Metadata(msg)
    })?;

    let loaded: Value = if is_yaml_path(metadata_path) {
        serde_yaml::from_str(&contents)?
    } else {
        serde_json::from_str(&contents)?
    };

    if loaded.is_null() {
        let msg = format!(
            "Invalid JSON/YAML specified in metadata file \"{}\"",
            metadata_path.display()
        );
        log::error!("{}", msg);
        return Err(PipelineError::Metadata(msg));
    }

    Ok(loaded)
}

fn is_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}
