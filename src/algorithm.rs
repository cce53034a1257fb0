//! The seam between the harness and user-written processing code

use clap::Command;
use serde_json::Value;

use crate::environment::Environment;
use crate::types::{ContinueResult, PipelineResult, TransformerParams};

/// A transformer algorithm. Implementations plug their processing into the
/// harness via [`crate::entrypoint::entrypoint`].
pub trait Algorithm {
    /// Extends the command line with algorithm-specific arguments. The
    /// default adds nothing.
    fn add_parameters(&self, command: Command) -> Command {
        command
    }

    /// Checks whether processing should continue for this set of
    /// parameters. A negative code stops the run and is reported in the
    /// result; the default is always ready.
    fn check_continue(
        &self,
        _environment: &Environment,
        _params: &TransformerParams,
    ) -> ContinueResult {
        ContinueResult::ready()
    }

    /// Performs the processing of the data and returns the result document
    fn perform_process(
        &self,
        environment: &Environment,
        params: &TransformerParams,
    ) -> PipelineResult<Value>;
}
