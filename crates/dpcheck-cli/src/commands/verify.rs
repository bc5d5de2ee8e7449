// Command handler for: Verify

use std::path::PathBuf;

use serde_json::json;

use super::helpers::{print_json, read_source, report, verify_options, OutputFormat};
use crate::ExploreArgs;

/// Run the verifier and return the process exit code of its verdict.
pub(crate) fn run_verify_command(
    args: ExploreArgs,
    workers: Option<usize>,
    dump_smt: Option<PathBuf>,
) -> miette::Result<i32> {
    let output_format = OutputFormat::parse(&args.format)?;
    let source = read_source(&args.file)?;
    let filename = args.file.display().to_string();
    let options = dpcheck_engine::VerifyOptions {
        workers,
        dump_smt: dump_smt.clone(),
        ..verify_options(&args)
    };

    let result = dpcheck_engine::verify_with_options(&source, &filename, &options).map_err(report)?;
    match output_format {
        OutputFormat::Json => {
            let artifact = json!({
                "schema_version": 1,
                "file": filename,
                "report": result,
            });
            print_json(&artifact)?;
        }
        OutputFormat::Text => {
            println!("{result}");
            if let Some(dir) = dump_smt {
                eprintln!("SMT queries written to {}", dir.display());
            }
        }
    }
    Ok(result.verdict.exit_code())
}
