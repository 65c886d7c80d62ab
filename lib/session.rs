//! One invocation of Chiron over one program.
//!
//! A `Request` selects any combination of analyses. `Session::run` lowers the
//! program once and runs every selected analysis over the shared graph, each
//! with its own state, so one failing leaves the others untouched. The
//! resulting `Report` holds one `Outcome` per selected analysis and the
//! process exit code.

use crate::analysis::{self, fixed_point, DefSet, FixedPoint, Flag, FlatConstant, Numeric};
use crate::ast;
use crate::cfg_builder;
use crate::coverage::{Coverage, CoverageMap, CoverageOracle, Spectrum, SpectrumTest};
use crate::executor::{self, Execution, InterpreterOptions};
use crate::il;
use crate::optimizer::{self, OptimizerOptions, OptimizerStats, RegressionInput};
use crate::symbolic::{
    self, EnumerativeSolver, ExploreOptions, ExploreResult, Order, SmtLibSolver, Solver,
};
use crate::{AnalysisError, Error, RC};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// The analyses a `Request` runs. All are off by default.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Analyses {
    pub interpret: bool,
    pub optimize: bool,
    pub data_flow: bool,
    pub abstract_interpretation: bool,
    pub symbolic: bool,
    pub coverage: bool,
    pub spectrum: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SolverChoice {
    /// `z3`, or the enumerative solver when `z3` cannot be started.
    Auto,
    Z3,
    Enumerative,
}

impl Default for SolverChoice {
    fn default() -> SolverChoice {
        SolverChoice::Auto
    }
}

/// Everything one invocation needs besides the program.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Request {
    pub analyses: Analyses,
    /// Seed values for concrete runs.
    pub bindings: BTreeMap<String, i64>,
    pub inputs: BTreeMap<String, i64>,
    /// Variables bound to constants for symbolic execution.
    pub parameters: BTreeMap<String, i64>,
    /// Wall clock budget for the whole invocation.
    pub timeout_seconds: Option<f64>,
    pub solver: SolverChoice,
    pub path_bound: usize,
    pub depth_first: bool,
    /// Run the other analyses on the optimized graph.
    pub use_optimized: bool,
    /// Extra inputs the optimized graph is checked against.
    pub regression: Vec<RegressionInput>,
    /// Extra runs for the coverage oracle.
    pub coverage_inputs: Vec<RegressionInput>,
    pub spectrum_tests: Vec<SpectrumTest>,
}

impl Default for Request {
    fn default() -> Request {
        Request {
            analyses: Analyses::default(),
            bindings: BTreeMap::new(),
            inputs: BTreeMap::new(),
            parameters: BTreeMap::new(),
            timeout_seconds: None,
            solver: SolverChoice::Auto,
            path_bound: ExploreOptions::default().path_bound(),
            depth_first: false,
            use_optimized: false,
            regression: Vec::new(),
            coverage_inputs: Vec::new(),
            spectrum_tests: Vec::new(),
        }
    }
}

impl Request {
    pub fn from_json(json: &str) -> Result<Request, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The result of one analysis.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Outcome<T> {
    Complete(T),
    /// Cut short by the deadline, a bound or an iteration cap. The result,
    /// when there is one, is partial.
    Incomplete { result: Option<T>, reason: String },
    Failed(String),
}

impl<T> Outcome<T> {
    fn from_result(result: Result<T, Error>, incomplete: impl FnOnce(&T) -> Option<String>) -> Outcome<T> {
        match result {
            Ok(value) => match incomplete(&value) {
                Some(reason) => Outcome::Incomplete {
                    result: Some(value),
                    reason,
                },
                None => Outcome::Complete(value),
            },
            Err(Error::Analysis(e @ AnalysisError::NonConvergence { .. })) => {
                warn!("{}", e);
                Outcome::Incomplete {
                    result: None,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!("analysis failed: {}", e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            Outcome::Complete(result) => Some(result),
            Outcome::Incomplete { result, .. } => result.as_ref(),
            Outcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Outcome::Incomplete { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DataFlowReport {
    pub reaching_definitions: FixedPoint<DefSet>,
    pub liveness: FixedPoint<Flag>,
    pub definite_assignment: FixedPoint<Flag>,
    pub constants: FixedPoint<FlatConstant>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OptimizationReport {
    pub cfg: il::ControlFlowGraph,
    pub stats: OptimizerStats,
    /// Regression inputs on which both graphs agreed.
    pub agreed: usize,
    pub inconclusive: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct CoverageReport {
    /// The seed run, then one run per coverage input.
    pub runs: Vec<Coverage>,
    /// Blocks and path frequencies accumulated over every run.
    pub profile: CoverageMap,
    /// The number of acyclic paths of the graph.
    pub num_paths: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SymbolicReport {
    pub solver: String,
    pub exploration: ExploreResult,
    /// Test cases whose concrete replay left the recorded path.
    pub replay_mismatches: usize,
}

/// Why a whole invocation failed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Failure {
    Parse(String),
    MalformedProgram(String),
    /// The program lowered to a graph which is not well formed.
    Engine(String),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
    pub failure: Option<Failure>,
    pub interpretation: Option<Outcome<Execution>>,
    pub optimization: Option<Outcome<OptimizationReport>>,
    pub data_flow: Option<Outcome<DataFlowReport>>,
    pub abstract_interpretation: Option<Outcome<FixedPoint<Numeric>>>,
    pub symbolic: Option<Outcome<SymbolicReport>>,
    pub coverage: Option<Outcome<CoverageReport>>,
    pub spectrum: Option<Outcome<Spectrum>>,
}

impl Report {
    fn failed(failure: Failure) -> Report {
        Report {
            failure: Some(failure),
            ..Report::default()
        }
    }

    fn any_failed(&self) -> bool {
        fn failed<T>(outcome: &Option<Outcome<T>>) -> bool {
            outcome.as_ref().map(Outcome::is_failed).unwrap_or(false)
        }
        failed(&self.interpretation)
            || failed(&self.optimization)
            || failed(&self.data_flow)
            || failed(&self.abstract_interpretation)
            || failed(&self.symbolic)
            || failed(&self.coverage)
            || failed(&self.spectrum)
    }

    /// Zero when every requested analysis completed, even incompletely.
    pub fn exit_code(&self) -> i32 {
        match self.failure {
            Some(Failure::Parse(_)) => 2,
            Some(Failure::MalformedProgram(_)) => 3,
            Some(Failure::Engine(_)) => 4,
            None if self.any_failed() => 4,
            None => 0,
        }
    }

    /// A one line description of why the invocation failed, if it did.
    pub fn message(&self) -> Option<String> {
        match &self.failure {
            Some(Failure::Parse(message)) => Some(format!("parse error: {}", message)),
            Some(Failure::MalformedProgram(message)) => Some(format!("malformed program: {}", message)),
            Some(Failure::Engine(message)) => Some(format!("engine error: {}", message)),
            None if self.any_failed() => Some("an analysis failed".to_string()),
            None => None,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct Session {
    request: Request,
}

impl Session {
    pub fn new(request: Request) -> Session {
        Session { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Parse a program from its JSON form and run it.
    pub fn run_json(&self, program: &str) -> Report {
        match ast::Program::from_json(program) {
            Ok(program) => self.run(&program),
            Err(e) => Report::failed(Failure::Parse(e.to_string())),
        }
    }

    pub fn run(&self, program: &ast::Program) -> Report {
        let deadline = self
            .request
            .timeout_seconds
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .and_then(|timeout| Instant::now().checked_add(timeout));

        let cfg = match cfg_builder::build(program) {
            Ok(cfg) => RC::new(cfg),
            Err(e @ Error::Parse(_)) => return Report::failed(Failure::Parse(e.to_string())),
            Err(e @ Error::MalformedProgram { .. }) => {
                return Report::failed(Failure::MalformedProgram(e.to_string()))
            }
            Err(e) => return Report::failed(Failure::Engine(e.to_string())),
        };
        info!("lowered program into {} blocks", cfg.num_blocks());

        let analyses = &self.request.analyses;
        let mut report = Report::default();

        let mut subject = cfg.clone();
        if analyses.optimize {
            let outcome = self.optimization(&cfg, deadline);
            if self.request.use_optimized {
                if let Outcome::Complete(optimization) = &outcome {
                    subject = RC::new(optimization.cfg.clone());
                }
            }
            report.optimization = Some(outcome);
        }

        if analyses.interpret {
            report.interpretation = Some(self.interpretation(&subject));
        }
        if analyses.data_flow {
            report.data_flow = Some(self.data_flow(&subject, deadline));
        }
        if analyses.abstract_interpretation {
            report.abstract_interpretation = Some(self.abstract_interpretation(&subject, deadline));
        }
        if analyses.symbolic {
            report.symbolic = Some(self.symbolic(&subject, deadline));
        }
        if analyses.coverage {
            report.coverage = Some(self.coverage(&subject));
        }
        if analyses.spectrum {
            report.spectrum = Some(self.spectrum(&subject));
        }
        report
    }

    fn seed(&self) -> RegressionInput {
        RegressionInput {
            bindings: self.request.bindings.clone(),
            inputs: self.request.inputs.clone(),
        }
    }

    fn interpretation(&self, cfg: &RC<il::ControlFlowGraph>) -> Outcome<Execution> {
        let result = executor::execute(
            cfg,
            &self.request.bindings,
            &self.request.inputs,
            &InterpreterOptions::default(),
        );
        Outcome::from_result(result, |_| None)
    }

    fn optimization(&self, cfg: &RC<il::ControlFlowGraph>, deadline: Option<Instant>) -> Outcome<OptimizationReport> {
        let options = OptimizerOptions::new()
            .set_fixed_point(fixed_point::FixedPointOptions::new().set_deadline(deadline));
        let result = optimizer::optimize(cfg, &options).and_then(|optimization| {
            let mut inputs = vec![self.seed()];
            inputs.extend(self.request.regression.iter().cloned());
            let equivalence = optimizer::check_equivalence(
                cfg,
                &optimization.cfg,
                &inputs,
                &InterpreterOptions::default(),
            )?;
            if !equivalence.is_equivalent() {
                return Err(Error::Custom(format!(
                    "optimized program disagrees on {} of {} inputs",
                    equivalence.mismatches.len(),
                    inputs.len()
                )));
            }
            Ok(OptimizationReport {
                cfg: optimization.cfg,
                stats: optimization.stats,
                agreed: equivalence.agreed,
                inconclusive: equivalence.inconclusive,
            })
        });
        Outcome::from_result(result, |_| None)
    }

    fn data_flow(&self, cfg: &RC<il::ControlFlowGraph>, deadline: Option<Instant>) -> Outcome<DataFlowReport> {
        let options = fixed_point::FixedPointOptions::new().set_deadline(deadline);
        let result = (|| -> Result<DataFlowReport, Error> {
            Ok(DataFlowReport {
                reaching_definitions: analysis::reaching_definitions(cfg, &options)?,
                liveness: analysis::liveness(cfg, &options)?,
                definite_assignment: analysis::definite_assignment(cfg, &options)?,
                constants: analysis::constant_propagation(cfg, &options)?,
            })
        })();
        Outcome::from_result(result, |report| {
            let incomplete = report.reaching_definitions.incomplete
                || report.liveness.incomplete
                || report.definite_assignment.incomplete
                || report.constants.incomplete;
            if incomplete {
                Some("deadline passed before a fixed point".to_string())
            } else {
                None
            }
        })
    }

    fn abstract_interpretation(
        &self,
        cfg: &RC<il::ControlFlowGraph>,
        deadline: Option<Instant>,
    ) -> Outcome<FixedPoint<Numeric>> {
        let options = fixed_point::FixedPointOptions::new().set_deadline(deadline);
        let result = analysis::numeric::<Numeric>(cfg, &options);
        Outcome::from_result(result, |fixed_point| {
            if fixed_point.incomplete {
                Some("deadline passed before a fixed point".to_string())
            } else {
                None
            }
        })
    }

    fn symbolic(&self, cfg: &RC<il::ControlFlowGraph>, deadline: Option<Instant>) -> Outcome<SymbolicReport> {
        let order = if self.request.depth_first {
            Order::DepthFirst
        } else {
            Order::BreadthFirst
        };
        let options = ExploreOptions::new()
            .set_path_bound(self.request.path_bound)
            .set_order(order)
            .set_deadline(deadline)
            .set_bindings(self.request.parameters.clone());

        let z3 = SmtLibSolver::new();
        let enumerative = EnumerativeSolver::new();
        let result = match self.request.solver {
            SolverChoice::Z3 => symbolic::explore(cfg, &z3, &options).map(|r| (z3.name().to_string(), r)),
            SolverChoice::Enumerative => symbolic::explore(cfg, &enumerative, &options)
                .map(|r| (enumerative.name().to_string(), r)),
            SolverChoice::Auto => match symbolic::explore(cfg, &z3, &options) {
                Err(Error::SolverUnavailable(reason)) => {
                    warn!("{}, falling back to the enumerative solver", reason);
                    symbolic::explore(cfg, &enumerative, &options)
                        .map(|r| (enumerative.name().to_string(), r))
                }
                result => result.map(|r| (z3.name().to_string(), r)),
            },
        };

        let result = result.and_then(|(solver, exploration)| {
            let mut replay_mismatches = 0;
            for test_case in &exploration.test_cases {
                let validation =
                    symbolic::validate_test_case(cfg, test_case, &InterpreterOptions::default())?;
                if !validation.is_valid() {
                    warn!("test case for path {:?} does not replay", test_case.path);
                    replay_mismatches += 1;
                }
            }
            Ok(SymbolicReport {
                solver,
                exploration,
                replay_mismatches,
            })
        });
        Outcome::from_result(result, |report| {
            if report.exploration.incomplete {
                Some("exploration was bounded, timed out, or left forks undecided".to_string())
            } else {
                None
            }
        })
    }

    fn coverage(&self, cfg: &RC<il::ControlFlowGraph>) -> Outcome<CoverageReport> {
        let result = CoverageOracle::new(cfg, InterpreterOptions::default()).and_then(|oracle| {
            let runs = std::iter::once(self.seed())
                .chain(self.request.coverage_inputs.iter().cloned())
                .map(|input| oracle.run(&input.bindings, &input.inputs))
                .collect::<Result<Vec<Coverage>, Error>>()?;
            let mut profile = CoverageMap::new();
            for run in &runs {
                profile.add(run);
            }
            Ok(CoverageReport {
                runs,
                profile,
                num_paths: oracle.profile().num_paths(),
            })
        });
        Outcome::from_result(result, |_| None)
    }

    fn spectrum(&self, cfg: &RC<il::ControlFlowGraph>) -> Outcome<Spectrum> {
        let result = CoverageOracle::new(cfg, InterpreterOptions::default())
            .and_then(|oracle| Spectrum::collect(cfg, &oracle, &self.request.spectrum_tests));
        Outcome::from_result(result, |_| None)
    }
}
