use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dpcheck_ir::{BoolExpr, CmpOp, Run, SymExpr, Symbol};
use dpcheck_smt::encoder::Query;

/// Guards of a sparse-vector path of length `n` in both runs.
fn svt_guards(n: usize) -> Vec<BoolExpr> {
    let mut out = Vec::new();
    for run in [Run::A, Run::B] {
        let threshold = SymExpr::Sym(Symbol::noise(run, 0));
        for i in 0..n {
            let lhs = SymExpr::Sym(Symbol::element(run, i)) + SymExpr::Sym(Symbol::noise(run, i + 1));
            out.push(BoolExpr::cmp(CmpOp::Ge, lhs, threshold.clone()));
        }
    }
    out
}

fn bench_encode_svt(c: &mut Criterion) {
    for n in [5usize, 25] {
        let guards = svt_guards(n);
        c.bench_function(&format!("encode_svt_{n}"), |b| {
            b.iter(|| {
                let mut query = Query::new("bench");
                query.assert_all(black_box(&guards));
                query.to_script()
            })
        });
    }
}

criterion_group!(benches, bench_encode_svt);
criterion_main!(benches);
