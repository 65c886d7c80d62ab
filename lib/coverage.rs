//! Coverage data for the fuzzer and the fault localizer.
//!
//! A `CoverageOracle` runs a program on concrete values and reports which
//! blocks and which acyclic paths the run covered, and whether it faulted.
//! The fuzzer uses this as its fitness signal, accumulating it in a
//! `CoverageMap`, which also counts how often each path ran.
//!
//! A `Spectrum` records, for every test, a pass or fail verdict and the
//! blocks the test covered. The localizer ranks blocks from the per-block
//! `SpectrumCounts`.

use crate::analysis::PathProfile;
use crate::executor::{self, InterpreterOptions, RuntimeFault};
use crate::il;
use crate::Error;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What one concrete run covered.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Coverage {
    pub trace: Vec<usize>,
    pub blocks: BTreeSet<usize>,
    /// Ids of the complete acyclic paths the run took.
    pub paths: Vec<u64>,
    pub bindings: BTreeMap<String, i64>,
    pub fault: Option<RuntimeFault>,
}

pub struct CoverageOracle<'c> {
    cfg: &'c il::ControlFlowGraph,
    profile: PathProfile,
    options: InterpreterOptions,
}

impl<'c> CoverageOracle<'c> {
    pub fn new(cfg: &'c il::ControlFlowGraph, options: InterpreterOptions) -> Result<CoverageOracle<'c>, Error> {
        Ok(CoverageOracle {
            cfg,
            profile: PathProfile::new(cfg)?,
            options,
        })
    }

    pub fn profile(&self) -> &PathProfile {
        &self.profile
    }

    /// Run the program on `bindings` and `inputs`.
    pub fn run(
        &self,
        bindings: &BTreeMap<String, i64>,
        inputs: &BTreeMap<String, i64>,
    ) -> Result<Coverage, Error> {
        let execution = executor::execute(self.cfg, bindings, inputs, &self.options)?;
        let paths = self.profile.decode(&execution.trace)?;
        Ok(Coverage {
            blocks: execution.trace.iter().cloned().collect(),
            trace: execution.trace,
            paths,
            bindings: execution.bindings,
            fault: execution.fault,
        })
    }
}

/// Blocks and paths covered so far by a series of runs.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CoverageMap {
    blocks: BTreeSet<usize>,
    // Path id to the number of times runs took it.
    path_counts: BTreeMap<u64, u64>,
    faults: usize,
}

impl CoverageMap {
    pub fn new() -> CoverageMap {
        CoverageMap::default()
    }

    /// Add a run, returning the number of blocks and paths it covered for
    /// the first time.
    pub fn add(&mut self, coverage: &Coverage) -> usize {
        let mut new = 0;
        for block in &coverage.blocks {
            if self.blocks.insert(*block) {
                new += 1;
            }
        }
        for path in &coverage.paths {
            let count = self.path_counts.entry(*path).or_insert(0);
            if *count == 0 {
                new += 1;
            }
            *count += 1;
        }
        if coverage.fault.is_some() {
            self.faults += 1;
        }
        new
    }

    pub fn blocks(&self) -> &BTreeSet<usize> {
        &self.blocks
    }

    /// The path frequency profile: how often each path id was taken.
    pub fn path_counts(&self) -> &BTreeMap<u64, u64> {
        &self.path_counts
    }

    /// The number of runs added which faulted.
    pub fn faults(&self) -> usize {
        self.faults
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Verdict {
    Pass,
    Fail,
}

/// One test for spectrum-based fault localization.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpectrumTest {
    pub bindings: BTreeMap<String, i64>,
    pub inputs: BTreeMap<String, i64>,
    /// Final values the test expects. A test fails if its run faults or
    /// ends with any of these variables bound differently.
    pub expected: BTreeMap<String, i64>,
}

impl SpectrumTest {
    pub fn verdict(&self, coverage: &Coverage) -> Verdict {
        let matches = self
            .expected
            .iter()
            .all(|(variable, value)| coverage.bindings.get(variable) == Some(value));
        if coverage.fault.is_none() && matches {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpectrumRow {
    pub verdict: Verdict,
    /// One entry per block of the spectrum, true where the test ran it.
    pub covered: Vec<bool>,
}

/// How often a block was run by failing and passing tests.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SpectrumCounts {
    pub failed_covered: usize,
    pub passed_covered: usize,
    pub failed_uncovered: usize,
    pub passed_uncovered: usize,
}

/// The test by block coverage matrix.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Spectrum {
    blocks: Vec<usize>,
    rows: Vec<SpectrumRow>,
}

impl Spectrum {
    /// An empty spectrum over the blocks of `cfg`.
    pub fn new(cfg: &il::ControlFlowGraph) -> Spectrum {
        let mut blocks: Vec<usize> = cfg.blocks().iter().map(|block| block.index()).collect();
        blocks.sort_unstable();
        Spectrum {
            blocks,
            rows: Vec::new(),
        }
    }

    /// Run every test through `oracle` and record it.
    pub fn collect(
        cfg: &il::ControlFlowGraph,
        oracle: &CoverageOracle,
        tests: &[SpectrumTest],
    ) -> Result<Spectrum, Error> {
        let mut spectrum = Spectrum::new(cfg);
        for test in tests {
            let coverage = oracle.run(&test.bindings, &test.inputs)?;
            spectrum.record(test.verdict(&coverage), &coverage);
        }
        debug!(
            "spectrum of {} tests, {} failing",
            spectrum.rows.len(),
            spectrum.rows.iter().filter(|row| row.verdict == Verdict::Fail).count()
        );
        Ok(spectrum)
    }

    pub fn record(&mut self, verdict: Verdict, coverage: &Coverage) {
        let covered = self
            .blocks
            .iter()
            .map(|block| coverage.blocks.contains(block))
            .collect();
        self.rows.push(SpectrumRow { verdict, covered });
    }

    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    pub fn rows(&self) -> &[SpectrumRow] {
        &self.rows
    }

    pub fn counts(&self, block: usize) -> Option<SpectrumCounts> {
        let column = self.blocks.binary_search(&block).ok()?;
        let mut counts = SpectrumCounts::default();
        for row in &self.rows {
            match (row.verdict, row.covered[column]) {
                (Verdict::Fail, true) => counts.failed_covered += 1,
                (Verdict::Pass, true) => counts.passed_covered += 1,
                (Verdict::Fail, false) => counts.failed_uncovered += 1,
                (Verdict::Pass, false) => counts.passed_uncovered += 1,
            }
        }
        Some(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, Program, Statement};
    use crate::cfg_builder;

    // if n > 0 [ y = 10 / n ] else [ y = 10 / (n + 1) ]
    fn program() -> il::ControlFlowGraph {
        let program = Program::new(vec![Statement::If {
            cond: Expr::binary(BinaryOp::Gt, Expr::var("n"), Expr::int(0)),
            then: vec![Statement::Assign {
                var: "y".to_string(),
                expr: Expr::binary(BinaryOp::Div, Expr::int(10), Expr::var("n")),
            }],
            else_: Some(vec![Statement::Assign {
                var: "y".to_string(),
                expr: Expr::binary(
                    BinaryOp::Div,
                    Expr::int(10),
                    Expr::binary(BinaryOp::Add, Expr::var("n"), Expr::int(1)),
                ),
            }]),
        }]);
        cfg_builder::build(&program).unwrap()
    }

    fn test(n: i64, expected: i64) -> SpectrumTest {
        SpectrumTest {
            bindings: vec![("n".to_string(), n)].into_iter().collect(),
            inputs: BTreeMap::new(),
            expected: vec![("y".to_string(), expected)].into_iter().collect(),
        }
    }

    #[test]
    fn coverage_map_counts_new_coverage() {
        let cfg = program();
        let oracle = CoverageOracle::new(&cfg, InterpreterOptions::default()).unwrap();
        let mut map = CoverageMap::new();

        let first = oracle.run(&test(5, 2).bindings, &BTreeMap::new()).unwrap();
        assert!(map.add(&first) > 0);
        assert_eq!(first.paths.len(), 1);

        let again = oracle.run(&test(3, 3).bindings, &BTreeMap::new()).unwrap();
        assert_eq!(map.add(&again), 0);

        let other = oracle.run(&test(-4, -4).bindings, &BTreeMap::new()).unwrap();
        assert!(map.add(&other) > 0);
        assert_eq!(map.path_counts().len(), 2);
        let mut sorted: Vec<u64> = map.path_counts().values().cloned().collect();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2]);
        assert_eq!(map.path_counts()[&first.paths[0]], 2);

        let fault = oracle.run(&test(-1, 0).bindings, &BTreeMap::new()).unwrap();
        assert!(fault.fault.is_some());
        map.add(&fault);
        assert_eq!(map.faults(), 1);
    }

    #[test]
    fn spectrum_separates_failing_block() {
        let cfg = program();
        let oracle = CoverageOracle::new(&cfg, InterpreterOptions::default()).unwrap();
        // n = -1 divides by zero in the else branch.
        let tests = vec![test(5, 2), test(2, 5), test(-3, -5), test(-1, 0)];
        let spectrum = Spectrum::collect(&cfg, &oracle, &tests).unwrap();

        assert_eq!(spectrum.rows().len(), 4);
        let verdicts: Vec<Verdict> = spectrum.rows().iter().map(|row| row.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Pass, Verdict::Pass, Verdict::Pass, Verdict::Fail]);

        let entry = cfg.entry().unwrap();
        let counts = spectrum.counts(entry).unwrap();
        assert_eq!(counts.failed_covered, 1);
        assert_eq!(counts.passed_covered, 3);

        // Exactly one block is run by the failing test and one passing test.
        let suspicious: Vec<usize> = spectrum
            .blocks()
            .iter()
            .cloned()
            .filter(|block| {
                let counts = spectrum.counts(*block).unwrap();
                counts.failed_covered == 1 && counts.passed_covered == 1
            })
            .collect();
        assert_eq!(suspicious.len(), 1);
        assert!(spectrum.counts(usize::MAX).is_none());
    }
}
