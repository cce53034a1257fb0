//! Base entry point for transformers built on this harness.
//!
//! The harness owns the common command line, logging setup, metadata
//! loading and result reporting; the algorithm only supplies its
//! processing. Failures are embedded in the JSON result body rather than
//! reflected in the exit status.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use serde_json::Value;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::algorithm::Algorithm;
use crate::environment::Environment;
use crate::io::metadata;
use crate::types::{error_result, Configuration};

/// Common command line arguments after parsing. The raw matches are kept so
/// algorithms can read arguments they registered via
/// [`Algorithm::add_parameters`].
pub struct ParsedArgs {
    pub log_level: LevelFilter,
    pub result_types: Option<String>,
    pub metadata: Vec<PathBuf>,
    pub working_space: PathBuf,
    pub file_list: Vec<PathBuf>,
    pub matches: ArgMatches,
}

/// Runs the transformer using the process arguments. The exit status is
/// left untouched; callers inspect the returned result document instead.
pub fn entrypoint(configuration: Configuration, algorithm: &dyn Algorithm) -> Value {
    do_work(configuration, algorithm, std::env::args_os())
}

/// Runs the transformer with an explicit argument vector
pub fn do_work<I, T>(configuration: Configuration, algorithm: &dyn Algorithm, argv: I) -> Value
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let environment = Environment::new(configuration);
    let command = build_command(&environment, algorithm);
    let args = parse_args(command, argv);

    let _ = env_logger::Builder::new()
        .filter_level(args.log_level)
        .try_init();

    if !args.working_space.is_dir() {
        if let Err(err) = std::fs::create_dir_all(&args.working_space) {
            log::warn!("Exception caught: {}", err);
            let result = error_result(
                Some(-10),
                Some(format!(
                    "Error while creating working space path \"{}\"",
                    args.working_space.display()
                )),
            );
            handle_result(&result, args.result_types.as_deref(), None);
            return result;
        }
    }

    let result = match gather_metadata(&environment, &args) {
        Ok(metadata) => perform_processing(&environment, algorithm, &args, &metadata),
        Err(err_result) => err_result,
    };

    let result_path = args.working_space.join("result.json");
    handle_result(&result, args.result_types.as_deref(), Some(&result_path));
    result
}

fn build_command(environment: &Environment, algorithm: &dyn Algorithm) -> Command {
    let configuration = &environment.configuration;
    let command = Command::new(configuration.name.clone())
        .about(configuration.description.clone())
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("enable debug logging (default=WARN)"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("enable info logging (default=WARN)"),
        )
        .arg(
            Arg::new("result")
                .long("result")
                .default_value("all")
                .help("Direct the result of a run to one or more of (all is default): \"all,file,print\""),
        )
        .arg(
            Arg::new("metadata")
                .short('m')
                .long("metadata")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help("The path to the source metadata"),
        )
        .arg(
            Arg::new("working_space")
                .short('w')
                .long("working_space")
                .default_value("output")
                .value_parser(value_parser!(PathBuf))
                .help("the folder to use as a workspace and for storing results"),
        );

    let command = environment.add_parameters(command);
    let command = algorithm.add_parameters(command);

    // Everything left over is treated as files and folders to process
    command.arg(
        Arg::new("file_list")
            .num_args(0..)
            .allow_hyphen_values(true)
            .value_parser(value_parser!(PathBuf))
            .help("additional files, folders, and other information for the transformer"),
    )
}

fn parse_args<I, T>(command: Command, argv: I) -> ParsedArgs
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command.get_matches_from(argv);

    let log_level = if matches.get_flag("debug") {
        LevelFilter::Debug
    } else if matches.get_flag("info") {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    let result_types = matches.get_one::<String>("result").cloned();
    let metadata = matches
        .get_many::<PathBuf>("metadata")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default();
    let working_space = matches
        .get_one::<PathBuf>("working_space")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("output"));
    let file_list = matches
        .get_many::<PathBuf>("file_list")
        .map(|paths| paths.cloned().collect())
        .unwrap_or_default();

    ParsedArgs {
        log_level,
        result_types,
        metadata,
        working_space,
        file_list,
        matches,
    }
}

/// Loads all requested metadata files, mapping failures to their error
/// result documents: -1 when metadata is required but missing, -2 when a
/// file is inaccessible, -3 when one can't be parsed.
fn gather_metadata(environment: &Environment, args: &ParsedArgs) -> Result<Vec<Value>, Value> {
    if args.metadata.is_empty() {
        if environment.configuration.metadata_needed {
            return Err(error_result(
                Some(-1),
                Some("No metadata paths were specified.".to_string()),
            ));
        }
        return Ok(Vec::new());
    }

    let mut metadata = Vec::new();
    for file_path in &args.metadata {
        if !file_path.exists() {
            return Err(error_result(
                Some(-2),
                Some(format!(
                    "Unable to access metadata file '{}'",
                    file_path.display()
                )),
            ));
        }
        log::info!("Loading metadata from file: '{}'", file_path.display());
        match metadata::load_metadata(file_path) {
            Ok(loaded) => metadata.push(loaded),
            Err(err) => return Err(error_result(Some(-3), Some(err.to_string()))),
        }
    }
    Ok(metadata)
}

fn perform_processing(
    environment: &Environment,
    algorithm: &dyn Algorithm,
    args: &ParsedArgs,
    metadata: &[Value],
) -> Value {
    let params = environment.get_transformer_params(args, metadata);

    let check = algorithm.check_continue(environment, &params);
    if check.code < 0 {
        let message = check
            .message
            .unwrap_or_else(|| "Unknown error returned from check_continue call".to_string());
        return error_result(Some(check.code), Some(message));
    }
    if let Some(message) = &check.message {
        log::info!("{}", message);
    }

    match algorithm.perform_process(environment, &params) {
        Ok(result) => result,
        Err(err) => error_result(Some(-102), Some(format!("Error during processing: {}", err))),
    }
}

/// Handles the results of a processing run per the requested result types:
/// `print` writes to stdout, `file` writes to the result file, `all` does
/// both
pub fn handle_result(result: &Value, result_types: Option<&str>, result_file_path: Option<&Path>) {
    let Some(result_types) = result_types else {
        return;
    };
    let type_parts: Vec<&str> = result_types.split(',').map(str::trim).collect();
    let contents = serde_json::to_string_pretty(result).unwrap_or_default();

    if type_parts.contains(&"print") || type_parts.contains(&"all") {
        println!("{}", contents);
    }

    if type_parts.contains(&"file") || type_parts.contains(&"all") {
        let Some(path) = result_file_path else {
            log::warn!("Writing result to a file was requested but a file path wasn't provided.");
            log::warn!("    Skipping writing to result file.");
            return;
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    log::error!("Error while creating result path \"{}\": {}", parent.display(), err);
                    log::warn!("Unable to create folders, skipping writing to result file");
                    return;
                }
            }
        }
        if let Err(err) = std::fs::write(path, &contents) {
            log::error!(
                "Error while writing result file \"{}\": {}",
                path.display(),
                err
            );
        }
    }
}
