//! agpipeline: a plugin harness for agricultural image-processing
//! transformers.
//!
//! The harness parses a common command line, loads JSON/YAML metadata,
//! derives per-run check parameters and hands them to a user-supplied
//! [`Algorithm`], then serializes the JSON result. Geospatial support
//! routines wrap GDAL/OGR and shell out to `gdal_translate` and `pdal`.
//!
//! ```no_run
//! use agpipeline::{entrypoint, Algorithm, Configuration, Environment};
//! use agpipeline::types::{PipelineResult, TransformerParams};
//! use serde_json::{json, Value};
//!
//! struct Counter;
//!
//! impl Algorithm for Counter {
//!     fn perform_process(
//!         &self,
//!         _environment: &Environment,
//!         params: &TransformerParams,
//!     ) -> PipelineResult<Value> {
//!         Ok(json!({ "code": 0, "files": params.check_md.list_files().len() }))
//!     }
//! }
//!
//! let configuration = Configuration {
//!     version: "1.0".to_string(),
//!     description: "Counts the files it is given".to_string(),
//!     name: "counter".to_string(),
//!     sensor: None,
//!     transformer_type: None,
//!     author_name: "Jane Doe".to_string(),
//!     author_email: "jane@example.org".to_string(),
//!     contributors: vec![],
//!     repository: None,
//!     metadata_needed: false,
//! };
//! entrypoint(configuration, &Counter);
//! ```

pub mod algorithm;
pub mod core;
pub mod entrypoint;
pub mod environment;
pub mod io;
pub mod types;

pub use algorithm::Algorithm;
pub use entrypoint::{do_work, entrypoint, ParsedArgs};
pub use environment::Environment;
pub use types::{
    CheckMd, Configuration, ContinueResult, PipelineError, PipelineResult, TransformerParams,
    LAT_LON_EPSG_CODE,
};
