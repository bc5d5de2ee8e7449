#![allow(dead_code)]

use dpcheck_engine::pipeline::VerifyOptions;

pub fn load_demo(name: &str) -> String {
    let path = format!("{}/../../demos/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load {path}: {e}"))
}

pub fn load_demos() -> Vec<(String, String)> {
    let dir = format!("{}/../../demos", env!("CARGO_MANIFEST_DIR"));
    let mut files: Vec<std::path::PathBuf> = std::fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("Failed to read {dir}: {e}"))
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("c"))
        .collect();
    files.sort();
    files
        .into_iter()
        .map(|path| {
            let file = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown.c")
                .to_string();
            let src = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));
            (file, src)
        })
        .collect()
}

pub fn options(size: usize) -> VerifyOptions {
    VerifyOptions {
        size,
        timeout_secs: 120,
        workers: Some(2),
        ..VerifyOptions::default()
    }
}

/// A single-noise program releasing `output` with `Lap(k / epsilon)`.
pub fn laplace_program(relation: &str, k: i64, output: &str, check: &str) -> String {
    format!(
        "int f(float q[], int size, float epsilon) {{\n\
         \"TYPES: q: <*, *>; size: <0, 0>; epsilon: <0, 0>;\";\n\
         \"PRECONDITION: {relation};\";\n\
         \"CHECK: {check}\";\n\
         float eta = Lap({k} / epsilon);\n\
         CHECKDP_OUTPUT({output});\n}}\n"
    )
}
