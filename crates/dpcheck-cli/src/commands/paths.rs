// Command handler for: Paths

use serde_json::json;

use dpcheck_engine::VariantPaths;

use super::helpers::{print_json, read_source, report, verify_options, OutputFormat};
use crate::ExploreArgs;

fn render_text(variants: &[VariantPaths]) {
    for v in variants {
        match v.binding.differing {
            Some(i) => println!("== variant {} (index {i} differs)", v.binding.variant),
            None => println!("== variant {}", v.binding.variant),
        }
        println!(
            "{} path(s) in run A, {} in run B",
            v.exploration.a.len(),
            v.exploration.b.len()
        );
        for (i, path) in v.exploration.a.iter().enumerate() {
            println!("-- path {i}");
            print!("{path}");
        }
    }
}

pub(crate) fn run_paths_command(args: ExploreArgs) -> miette::Result<()> {
    let output_format = OutputFormat::parse(&args.format)?;
    let source = read_source(&args.file)?;
    let filename = args.file.display().to_string();
    let variants = dpcheck_engine::explore_program(&source, &filename, &verify_options(&args))
        .map_err(report)?;

    match output_format {
        OutputFormat::Json => {
            let entries: Vec<_> = variants
                .iter()
                .map(|v| {
                    json!({
                        "binding": v.binding,
                        "paths_a": v.exploration.a,
                        "paths_b": v.exploration.b,
                    })
                })
                .collect();
            print_json(&json!({
                "schema_version": 1,
                "file": filename,
                "variants": entries,
            }))
        }
        OutputFormat::Text => {
            render_text(&variants);
            Ok(())
        }
    }
}
