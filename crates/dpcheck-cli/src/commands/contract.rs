// Command handler for: Contract

use std::path::PathBuf;

use super::helpers::{print_json, read_source, OutputFormat};

pub(crate) fn run_contract_command(
    file: PathBuf,
    function: Option<String>,
    format: OutputFormat,
) -> miette::Result<()> {
    let source = read_source(&file)?;
    let filename = file.display().to_string();
    let program = dpcheck_dsl::parse_target(&source, &filename, function.as_deref())
        .map_err(miette::Report::new)?;
    match format {
        OutputFormat::Json => print_json(&program.contract),
        OutputFormat::Text => {
            println!("{}", program.contract);
            Ok(())
        }
    }
}
