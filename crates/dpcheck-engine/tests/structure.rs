//! Pair coverage and relation semantics, below the pipeline entry point.

mod common;

use common::{laplace_program, load_demo, options};
use dpcheck_engine::aggregator::{aggregate, AggregateSettings, Finding};
use dpcheck_engine::context::VerificationContext;
use dpcheck_engine::explorer::{explore_pair, Exploration};
use dpcheck_engine::oracle::symex::BoundedExecutor;
use dpcheck_engine::oracle::ExplorationBounds;
use dpcheck_engine::pipeline::explore_program;
use dpcheck_engine::result::FailureKind;
use dpcheck_ir::{variants, InputBinding, Run};

fn settings() -> AggregateSettings {
    AggregateSettings {
        workers: 2,
        ..AggregateSettings::default()
    }
}

fn threshold() -> (dpcheck_dsl::AnnotatedProgram, InputBinding) {
    let program = dpcheck_dsl::parse(&load_demo("threshold.c"), "threshold.c").unwrap();
    let binding = variants(&program.contract, 1, 1).unwrap().remove(0);
    (program, binding)
}

fn explored(program: &dpcheck_dsl::AnnotatedProgram, binding: &InputBinding) -> Exploration {
    explore_pair(
        &BoundedExecutor::default(),
        program,
        binding,
        &ExplorationBounds::default(),
    )
    .unwrap()
}

#[test]
fn all_four_combinations_are_considered() {
    let (program, binding) = threshold();
    let ctx = VerificationContext::new(&program, &binding, 10, 10).unwrap();
    let exploration = explored(&program, &binding);
    let result = aggregate(&ctx, &exploration, &settings()).unwrap();
    assert_eq!(result.finding, Finding::Proven);
    assert_eq!(result.compatible_pairs, 2);
    assert!(result.couplings_checked >= 2);
}

#[test]
fn run_a_path_without_partner_is_disproven() {
    let (program, binding) = threshold();
    let ctx = VerificationContext::new(&program, &binding, 10, 10).unwrap();
    let mut exploration = explored(&program, &binding);
    exploration.b.truncate(1);
    match aggregate(&ctx, &exploration, &settings()).unwrap().finding {
        Finding::Failed(f) => {
            assert_eq!(f.kind, FailureKind::UnmatchedPath);
            assert_eq!((f.a, f.b), (Some(1), None));
        }
        other => panic!("expected an unmatched path, got {other:?}"),
    }
}

#[test]
fn run_b_path_without_partner_is_disproven() {
    let (program, binding) = threshold();
    let ctx = VerificationContext::new(&program, &binding, 10, 10).unwrap();
    let mut exploration = explored(&program, &binding);
    exploration.a.truncate(1);
    match aggregate(&ctx, &exploration, &settings()).unwrap().finding {
        Finding::Failed(f) => {
            assert_eq!(f.kind, FailureKind::UnmatchedPath);
            assert_eq!((f.a, f.b), (None, Some(1)));
        }
        other => panic!("expected an unmatched path, got {other:?}"),
    }
}

#[test]
fn binding_cardinality_follows_the_relation() {
    for (relation, expected) in [
        ("ONE_DIFFER", 4),
        ("ALL_DIFFER", 1),
        ("INCREASING", 1),
        ("DECREASING", 1),
    ] {
        let src = laplace_program(relation, 2, "q[0] + eta", "epsilon");
        let found = explore_program(&src, "r.c", &options(4)).unwrap();
        assert_eq!(found.len(), expected, "{relation}");
        for v in &found {
            let b = &v.binding;
            assert_eq!(b.relation.as_str(), relation);
            let free: Vec<usize> = (0..4)
                .filter(|&i| b.element(Run::A, i) != b.element(Run::B, i))
                .collect();
            if relation == "ONE_DIFFER" {
                assert_eq!(b.differing, Some(b.variant), "{relation}");
                assert_eq!(free, vec![b.variant], "{relation}");
            } else {
                assert_eq!(b.differing, None, "{relation}");
                assert_eq!(free, vec![0, 1, 2, 3], "{relation}");
            }
        }
    }
}

#[test]
fn sparsevector_paths_follow_the_answer_budget() {
    let found = explore_program(&load_demo("sparsevector.c"), "sv.c", &options(2)).unwrap();
    let traces: Vec<String> = found[0].exploration.a.iter().map(|p| p.trace()).collect();
    assert_eq!(traces, vec!["TTT", "TTF", "TF", "FT", "FF"]);
}

#[test]
fn every_demo_parses_and_explores() {
    for (name, src) in common::load_demos() {
        let found = explore_program(&src, &name, &options(2))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        for v in &found {
            assert!(!v.exploration.a.is_empty(), "{name}");
            assert_eq!(v.exploration.a.len(), v.exploration.b.len(), "{name}");
        }
    }
}
