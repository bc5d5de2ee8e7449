#![no_main]
use dpcheck_ir::{variants, Run, Scope};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(program) = dpcheck_dsl::parse(s, "fuzz.c") {
            let Ok(bindings) = variants(&program.contract, 2, 1) else {
                return;
            };
            for binding in &bindings {
                for run in [Run::A, Run::B] {
                    let scope = Scope::new(binding, run);
                    let _ = scope.lower(&program.contract.check);
                    for assumption in &program.contract.assumptions {
                        let _ = scope.lower_cond(assumption);
                    }
                }
            }
        }
    }
});
