use crate::analysis::{self, FixedPointOptions, Interval, Numeric};
use crate::ast::{BinaryOp, Command, Expr, Program, Statement};
use crate::cfg_builder;
use crate::executor::{self, FaultKind, InterpreterOptions};
use crate::il;
use crate::optimizer::{self, OptimizerOptions, RegressionInput};
use crate::session::{Request, Session};
use crate::symbolic::{self, EnumerativeSolver, ExploreOptions, Order};
use std::collections::{BTreeMap, BTreeSet};

fn assign(var: &str, expr: Expr) -> Statement {
    Statement::Assign {
        var: var.to_string(),
        expr,
    }
}

fn values(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|(name, value)| (name.to_string(), *value)).collect()
}

// x = input(); if x > 0 [ y = 1 ] else [ y = -1 ]
fn sign() -> il::ControlFlowGraph {
    let program = Program::new(vec![
        assign("x", Expr::Input),
        Statement::If {
            cond: Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::int(0)),
            then: vec![assign("y", Expr::int(1))],
            else_: Some(vec![assign("y", Expr::neg(Expr::int(1)))]),
        },
    ]);
    cfg_builder::build(&program).unwrap()
}

// while true [ x = x + 1 ]
fn spin() -> il::ControlFlowGraph {
    let program = Program::new(vec![Statement::While {
        cond: Expr::Bool(true),
        body: vec![assign("x", Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::int(1)))],
    }]);
    cfg_builder::build(&program).unwrap()
}

// z = 1 / x
fn reciprocal() -> il::ControlFlowGraph {
    let program = Program::new(vec![assign(
        "z",
        Expr::binary(BinaryOp::Div, Expr::int(1), Expr::var("x")),
    )]);
    cfg_builder::build(&program).unwrap()
}

#[test]
fn sign_abstract_values() {
    let cfg = sign();
    let fixed_point = analysis::numeric::<Numeric>(&cfg, &FixedPointOptions::new()).unwrap();
    let exit = cfg.exit().unwrap();
    let y = fixed_point.out_state(exit).unwrap().get("y");
    let expected: BTreeSet<i64> = vec![-1, 1].into_iter().collect();
    assert_eq!(y.kset().values(), Some(&expected));
}

#[test]
fn sign_test_cases() {
    let cfg = sign();
    let options = ExploreOptions::new().set_path_bound(1);
    let result = symbolic::explore(&cfg, &EnumerativeSolver::new(), &options).unwrap();
    assert!(!result.incomplete);
    assert_eq!(result.test_cases.len(), 2);

    let mut positive = 0;
    for test_case in &result.test_cases {
        assert!(test_case.fault.is_none());
        if test_case.inputs["x"] > 0 {
            positive += 1;
        }
        let validation =
            symbolic::validate_test_case(&cfg, test_case, &InterpreterOptions::default()).unwrap();
        assert!(validation.is_valid());
    }
    assert_eq!(positive, 1);
}

#[test]
fn spin_is_bounded() {
    let cfg = spin();
    for order in [Order::BreadthFirst, Order::DepthFirst].iter() {
        let options = ExploreOptions::new().set_path_bound(4).set_order(*order);
        let result = symbolic::explore(&cfg, &EnumerativeSolver::new(), &options).unwrap();
        assert!(result.incomplete);
        assert!(result.stats.bounded > 0);
        // The loop has no exit, so no path ends.
        assert!(result.test_cases.is_empty());
    }
}

#[test]
fn spin_hits_step_limit() {
    let cfg = spin();
    let options = InterpreterOptions::new().set_step_limit(1000);
    let execution = executor::execute(&cfg, &values(&[("x", 0)]), &BTreeMap::new(), &options).unwrap();
    match execution.fault.map(|fault| fault.kind) {
        Some(FaultKind::StepLimit(1000)) => {}
        fault => panic!("expected a step limit, got {:?}", fault),
    }
}

#[test]
fn reciprocal_keeps_zero_divisor() {
    let cfg = reciprocal();
    let result =
        symbolic::explore(&cfg, &EnumerativeSolver::new(), &ExploreOptions::new()).unwrap();
    assert!(!result.incomplete);

    let zero = result
        .test_cases
        .iter()
        .find(|test_case| test_case.fault == Some(FaultKind::DivisionByZero))
        .unwrap();
    assert_eq!(zero.parameters["x"], 0);

    let replay = symbolic::validate_test_case(&cfg, zero, &InterpreterOptions::default()).unwrap();
    assert!(replay.is_valid());
    assert_eq!(
        replay.execution.fault.map(|fault| fault.kind),
        Some(FaultKind::DivisionByZero)
    );

    // The other path continues with a nonzero divisor.
    assert!(result
        .test_cases
        .iter()
        .any(|test_case| test_case.fault.is_none() && test_case.parameters["x"] != 0));
}

// z = 1 / x; w = 1 / y
fn two_reciprocals() -> il::ControlFlowGraph {
    let program = Program::new(vec![
        assign("z", Expr::binary(BinaryOp::Div, Expr::int(1), Expr::var("x"))),
        assign("w", Expr::binary(BinaryOp::Div, Expr::int(1), Expr::var("y"))),
    ]);
    cfg_builder::build(&program).unwrap()
}

fn assert_replays(cfg: &il::ControlFlowGraph, result: &symbolic::ExploreResult) {
    for test_case in &result.test_cases {
        let replay =
            symbolic::validate_test_case(cfg, test_case, &InterpreterOptions::default()).unwrap();
        assert!(replay.is_valid(), "{:?} does not replay", test_case);
    }
}

#[test]
fn divisions_in_one_block_fault_separately() {
    let cfg = two_reciprocals();
    let result =
        symbolic::explore(&cfg, &EnumerativeSolver::new(), &ExploreOptions::new()).unwrap();
    assert!(!result.incomplete);
    assert_eq!(result.stats.duplicates, 0);
    assert_eq!(result.test_cases.len(), 3);

    let faults: Vec<&symbolic::TestCase> = result
        .test_cases
        .iter()
        .filter(|test_case| test_case.fault == Some(FaultKind::DivisionByZero))
        .collect();
    assert_eq!(faults.len(), 2);
    assert!(faults.iter().any(|test_case| test_case.parameters["x"] == 0));
    assert!(faults
        .iter()
        .any(|test_case| test_case.parameters["x"] != 0 && test_case.parameters["y"] == 0));

    let normal = result
        .test_cases
        .iter()
        .find(|test_case| test_case.fault.is_none())
        .unwrap();
    assert_ne!(normal.parameters["x"], 0);
    assert_ne!(normal.parameters["y"], 0);
    assert_replays(&cfg, &result);
}

#[test]
fn divisions_in_one_call_fault_separately() {
    // goto(1 / x, 1 / y)
    let inverse = |var: &str| Expr::binary(BinaryOp::Div, Expr::int(1), Expr::var(var));
    let program = Program::new(vec![Statement::Command(Command::Goto(
        inverse("x"),
        inverse("y"),
    ))]);
    let cfg = cfg_builder::build(&program).unwrap();
    let result =
        symbolic::explore(&cfg, &EnumerativeSolver::new(), &ExploreOptions::new()).unwrap();
    assert_eq!(result.test_cases.len(), 3);
    let faults = result
        .test_cases
        .iter()
        .filter(|test_case| test_case.fault.is_some())
        .count();
    assert_eq!(faults, 2);
    assert_replays(&cfg, &result);
}

#[test]
fn merged_reciprocal_keeps_both_paths() {
    let optimization = optimizer::optimize(&reciprocal(), &OptimizerOptions::new()).unwrap();
    let cfg = optimization.cfg;
    let result =
        symbolic::explore(&cfg, &EnumerativeSolver::new(), &ExploreOptions::new()).unwrap();
    assert!(!result.incomplete);
    assert_eq!(result.test_cases.len(), 2);
    assert!(result
        .test_cases
        .iter()
        .any(|test_case| test_case.fault == Some(FaultKind::DivisionByZero)));
    assert!(result
        .test_cases
        .iter()
        .any(|test_case| test_case.fault.is_none() && test_case.parameters["x"] != 0));
    assert_replays(&cfg, &result);

    // The merged block holds both divisions of two_reciprocals as well.
    let optimization = optimizer::optimize(&two_reciprocals(), &OptimizerOptions::new()).unwrap();
    let result = symbolic::explore(
        &optimization.cfg,
        &EnumerativeSolver::new(),
        &ExploreOptions::new(),
    )
    .unwrap();
    assert_eq!(result.test_cases.len(), 3);
    assert_replays(&optimization.cfg, &result);
}

#[test]
fn exploration_order_finds_same_paths() {
    // if x > 0 [ y = 10 / (x - 3) ] else [ y = 0 ]; if y > 1 [ z = 1 ] else [ z = 2 ]
    let program = Program::new(vec![
        Statement::If {
            cond: Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::int(0)),
            then: vec![assign(
                "y",
                Expr::binary(
                    BinaryOp::Div,
                    Expr::int(10),
                    Expr::binary(BinaryOp::Sub, Expr::var("x"), Expr::int(3)),
                ),
            )],
            else_: Some(vec![assign("y", Expr::int(0))]),
        },
        Statement::If {
            cond: Expr::binary(BinaryOp::Gt, Expr::var("y"), Expr::int(1)),
            then: vec![assign("z", Expr::int(1))],
            else_: Some(vec![assign("z", Expr::int(2))]),
        },
    ]);
    let cfg = cfg_builder::build(&program).unwrap();

    let mut found = Vec::new();
    for order in [Order::BreadthFirst, Order::DepthFirst].iter() {
        let options = ExploreOptions::new().set_order(*order);
        let result = symbolic::explore(&cfg, &EnumerativeSolver::new(), &options).unwrap();
        assert!(!result.incomplete);
        assert_replays(&cfg, &result);
        let paths: BTreeSet<(Vec<usize>, Option<FaultKind>)> = result
            .test_cases
            .iter()
            .map(|test_case| (test_case.path.clone(), test_case.fault.clone()))
            .collect();
        assert_eq!(paths.len(), result.test_cases.len());
        found.push(paths);
    }

    // x = 3 faults; x > 0 takes both sides of the second branch; x <= 0
    // takes only the else side.
    assert_eq!(found[0].len(), 4);
    assert_eq!(found[0], found[1]);
}

#[test]
fn widening_terminates() {
    // x = 0; while x < 100 [ x = x + 1 ]
    let program = Program::new(vec![
        assign("x", Expr::int(0)),
        Statement::While {
            cond: Expr::binary(BinaryOp::Lt, Expr::var("x"), Expr::int(100)),
            body: vec![assign("x", Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::int(1)))],
        },
    ]);
    let cfg = cfg_builder::build(&program).unwrap();
    let fixed_point = analysis::numeric::<Interval>(&cfg, &FixedPointOptions::new()).unwrap();
    assert!(!fixed_point.incomplete);

    let x = fixed_point.out_state(cfg.exit().unwrap()).unwrap().get("x");
    assert!(x.contains(100));
    assert!(!x.contains(-1));
}

#[test]
fn cfg_serialization() {
    let cfg = sign();

    let bytes = cfg.to_bytes().unwrap();
    assert_eq!(il::ControlFlowGraph::from_bytes(&bytes).unwrap(), cfg);

    let json = cfg.to_json().unwrap();
    let loaded = il::ControlFlowGraph::from_json(&json).unwrap();
    assert_eq!(loaded, cfg);

    // A loaded graph runs like the original.
    let inputs = values(&[("x", 7)]);
    let original = executor::execute(&cfg, &BTreeMap::new(), &inputs, &InterpreterOptions::default()).unwrap();
    let reloaded =
        executor::execute(&loaded, &BTreeMap::new(), &inputs, &InterpreterOptions::default()).unwrap();
    assert_eq!(original, reloaded);
}

#[test]
fn optimized_graph_reenters_analysis() {
    // a = 2; b = a * 3; if b > 5 [ c = n ] else [ c = 0 ]; d = c / a
    let program = Program::new(vec![
        assign("a", Expr::int(2)),
        assign("b", Expr::binary(BinaryOp::Mul, Expr::var("a"), Expr::int(3))),
        Statement::If {
            cond: Expr::binary(BinaryOp::Gt, Expr::var("b"), Expr::int(5)),
            then: vec![assign("c", Expr::var("n"))],
            else_: Some(vec![assign("c", Expr::int(0))]),
        },
        assign("d", Expr::binary(BinaryOp::Div, Expr::var("c"), Expr::var("a"))),
    ]);
    let cfg = cfg_builder::build(&program).unwrap();
    let optimization = optimizer::optimize(&cfg, &OptimizerOptions::new()).unwrap();
    assert!(optimization.stats.branches_folded > 0);
    assert!(optimization.cfg.num_blocks() < cfg.num_blocks());
    optimization.cfg.validate().unwrap();

    let inputs: Vec<RegressionInput> = [-7, 0, 9, i64::MIN]
        .iter()
        .map(|n| RegressionInput {
            bindings: values(&[("n", *n)]),
            inputs: BTreeMap::new(),
        })
        .collect();
    let equivalence = optimizer::check_equivalence(
        &cfg,
        &optimization.cfg,
        &inputs,
        &InterpreterOptions::default(),
    )
    .unwrap();
    assert!(equivalence.is_equivalent());
    assert_eq!(equivalence.agreed, 4);

    // The optimized graph is an ordinary graph for every other consumer.
    let result = symbolic::explore(
        &optimization.cfg,
        &EnumerativeSolver::new(),
        &ExploreOptions::new(),
    )
    .unwrap();
    assert_eq!(result.test_cases.len(), 1);
    let constants = analysis::constant_propagation(&optimization.cfg, &FixedPointOptions::new()).unwrap();
    assert!(!constants.incomplete);
}

#[test]
fn session_from_json() {
    let request = Request::from_json(
        r#"{
            "analyses": {"symbolic": true, "interpret": true},
            "bindings": {"x": 4},
            "solver": "Enumerative"
        }"#,
    )
    .unwrap();
    let program = r#"{
        "statements": [
            {"assign": {"var": "z", "expr": {"binary": {"op": "div", "lhs": {"int": 1}, "rhs": {"var": "x"}}}}}
        ]
    }"#;
    let report = Session::new(request).run_json(program);
    assert_eq!(report.exit_code(), 0);

    let execution = report.interpretation.as_ref().unwrap().result().unwrap();
    assert_eq!(execution.bindings["z"], 0);

    let symbolic = report.symbolic.as_ref().unwrap().result().unwrap();
    assert_eq!(symbolic.solver, "enumerative");
    assert_eq!(symbolic.replay_mismatches, 0);
    assert!(symbolic
        .exploration
        .test_cases
        .iter()
        .any(|test_case| test_case.fault == Some(FaultKind::DivisionByZero)));
}
