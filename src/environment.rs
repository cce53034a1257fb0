//! The runtime environment of a transformer: configuration plus the
//! per-run parameters derived from metadata and the command line

use chrono::Local;
use serde_json::Value;

use crate::entrypoint::ParsedArgs;
use crate::io::exif;
use crate::types::{CheckMd, Configuration, TransformerParams};

/// Environment handed to the algorithm alongside the run parameters
pub struct Environment {
    pub configuration: Configuration,
}

impl Environment {
    pub fn new(configuration: Configuration) -> Self {
        Environment { configuration }
    }

    /// Generates the metadata describing this transformer, suitable for
    /// embedding in result documents
    pub fn generate_transformer_md(&self) -> Value {
        serde_json::json!({
            "version": self.configuration.version,
            "name": self.configuration.name,
            "author": self.configuration.author_name,
            "description": self.configuration.description,
            "repository": { "repUrl": self.configuration.repository },
        })
    }

    /// Appends transformer identification to the command line help text
    pub fn add_parameters(&self, command: clap::Command) -> clap::Command {
        command.after_help(format!(
            "{} version {} author {} {}",
            self.configuration.name,
            self.configuration.version,
            self.configuration.author_name,
            self.configuration.author_email
        ))
    }

    /// Derives the parameters for a processing run from the command line
    /// arguments and the loaded metadata.
    ///
    /// Metadata documents may wrap their payload in a JSON-LD `content` key
    /// or a legacy `pipeline` key; both are unwrapped. Entries keyed by this
    /// transformer's name are collected into the transformer-specific
    /// metadata list. When no metadata names a timestamp, the earliest EXIF
    /// capture time found among the files is used, and failing that the
    /// current time.
    pub fn get_transformer_params(&self, args: &ParsedArgs, metadata: &[Value]) -> TransformerParams {
        let mut timestamp: Option<String> = None;
        let mut season_name = String::from("Season Unknown");
        let mut experiment_name = String::from("Experiment Unknown");
        let mut parsed_metadata = Vec::new();
        let mut transformer_md = Vec::new();

        for one_metadata in metadata {
            let mut parse_md = one_metadata.get("content").unwrap_or(one_metadata);
            if let Some(pipeline) = parse_md.get("pipeline") {
                parse_md = pipeline;
            }
            parsed_metadata.push(parse_md.clone());

            if let Some(stamp) = parse_md.get("observationTimeStamp").and_then(Value::as_str) {
                timestamp = Some(stamp.to_string());
            }
            if let Some(season) = parse_md.get("season").and_then(Value::as_str) {
                season_name = season.to_string();
            }
            if let Some(study) = parse_md.get("studyName").and_then(Value::as_str) {
                experiment_name = study.to_string();
            }

            match parse_md.get(&self.configuration.name) {
                Some(Value::Array(entries)) => transformer_md.extend(entries.iter().cloned()),
                Some(entry) => transformer_md.push(entry.clone()),
                None => {}
            }
        }

        // Anything that looks like a stray option is not a file. While no
        // timestamp is known, probe the files for EXIF capture times.
        let mut file_list = Vec::new();
        let mut working_timestamp = timestamp.clone();
        for one_file in &args.file_list {
            if one_file.to_string_lossy().starts_with('-') {
                continue;
            }
            file_list.push(one_file.clone());
            if timestamp.is_none() {
                working_timestamp =
                    exif::get_first_timestamp(one_file, working_timestamp.as_deref());
            }
        }
        let timestamp = timestamp
            .or(working_timestamp)
            .unwrap_or_else(|| Local::now().to_rfc3339());

        TransformerParams {
            check_md: CheckMd {
                timestamp,
                season: season_name,
                experiment: experiment_name,
                working_folder: args.working_space.clone(),
                list_files: file_list,
                container_name: None,
                target_container_name: None,
                trigger_name: None,
                context_md: None,
            },
            transformer_md,
            full_md: parsed_metadata,
        }
    }
}
