// Shared helpers for the command handlers: source loading, option mapping
// and error conversion.

use std::path::Path;

use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::debug;

use dpcheck_engine::{PipelineError, VerifyOptions};

use crate::ExploreArgs;

/// Inputs larger than this are rejected before parsing.
pub(crate) const MAX_INPUT_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub(crate) fn parse(raw: &str) -> miette::Result<Self> {
        match raw {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => miette::bail!("Unknown output format: {other}. Use 'text' or 'json'."),
        }
    }
}

pub(crate) fn read_source(path: &Path) -> miette::Result<String> {
    let metadata = std::fs::metadata(path).into_diagnostic()?;
    if metadata.len() > MAX_INPUT_BYTES {
        miette::bail!(
            "Input file {} is {} bytes, exceeding the limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_INPUT_BYTES
        );
    }
    debug!(path = %path.display(), bytes = metadata.len(), "reading program");
    std::fs::read_to_string(path).into_diagnostic()
}

pub(crate) fn verify_options(args: &ExploreArgs) -> VerifyOptions {
    VerifyOptions {
        function: args.function.clone(),
        size: args.size,
        epsilon: args.epsilon,
        max_unroll: args.max_unroll,
        timeout_secs: args.timeout,
        solver_timeout_secs: args.solver_timeout,
        ..VerifyOptions::default()
    }
}

/// Contract errors keep their labelled source spans; everything else is
/// reported by message.
pub(crate) fn report(err: PipelineError) -> miette::Report {
    match err {
        PipelineError::Contract(e) => miette::Report::new(e),
        other => miette::miette!("{other}"),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}
