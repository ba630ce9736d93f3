//! Test orchestration: discover cases, build both binaries, run them, compare.

pub mod report;
pub mod setup;
pub mod toolchain;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use thiserror::Error;

use crate::compare::{check_expectation, compare, ComparisonVerdict, Deviation};
use crate::config::Config;
use crate::driver::ExecutionResult;
use crate::errors::{DriverError, ExternalToolError, ParseError, SetupError};
use crate::state::{self, observation_set, MachineState, ObservationSet, PartialStateSpec};

/// Which of the two binaries a run executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Run {
    Original,
    Optimized,
}

impl Run {
    /// Lowercase name used in file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Run::Original => "original",
            Run::Optimized => "optimized",
        }
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Run::Original => write!(f, "Original"),
            Run::Optimized => write!(f, "Optimized"),
        }
    }
}

/// Why a case failed. Every variant is confined to its own case.
#[derive(Debug, Error)]
pub enum CaseFailure {
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },
    #[error("Failed to assemble original")]
    AssembleOriginal(#[source] ExternalToolError),
    #[error("Optimization failed")]
    Optimize(#[source] ExternalToolError),
    #[error("Failed to assemble optimized")]
    AssembleOptimized(#[source] ExternalToolError),
    #[error("Invalid state file {}: {source}", path.display())]
    State { path: PathBuf, source: ParseError },
    #[error("{run} code did not complete (exceeded {budget} steps without RTS)")]
    NonTermination { run: Run, budget: usize },
    #[error("{run} code could not run: {source}")]
    Emulation { run: Run, source: DriverError },
    #[error("State mismatch")]
    Mismatch(ComparisonVerdict),
    #[error("{run} code does not meet expectation")]
    Expectation { run: Run, deviations: Vec<Deviation> },
}

impl CaseFailure {
    /// Indented lines printed under the failure line.
    pub fn details(&self) -> Vec<String> {
        match self {
            CaseFailure::AssembleOriginal(e)
            | CaseFailure::Optimize(e)
            | CaseFailure::AssembleOptimized(e) => {
                e.diagnostics().lines().map(String::from).collect()
            }
            CaseFailure::Mismatch(verdict) => {
                verdict.mismatches.iter().map(ToString::to_string).collect()
            }
            CaseFailure::Expectation { deviations, .. } => {
                deviations.iter().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub steps: usize,
    pub cycles: u64,
}

impl From<&ExecutionResult> for RunStats {
    fn from(result: &ExecutionResult) -> Self {
        RunStats {
            steps: result.steps,
            cycles: result.cycles,
        }
    }
}

#[derive(Debug)]
pub struct CaseReport {
    pub name: String,
    pub original: Option<RunStats>,
    pub optimized: Option<RunStats>,
    /// Written by either run but named by neither state file.
    pub unobserved_writes: Vec<u16>,
    pub failure: Option<CaseFailure>,
}

impl CaseReport {
    fn new(name: &str) -> CaseReport {
        CaseReport {
            name: name.to_string(),
            original: None,
            optimized: None,
            unobserved_writes: Vec::new(),
            failure: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// File locations of one case inside the suite directory.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub source: PathBuf,
    pub init_path: PathBuf,
    pub expect_path: PathBuf,
    pub original_bin: PathBuf,
    pub optimized_asm: PathBuf,
    pub optimized_bin: PathBuf,
}

impl TestCase {
    pub fn new(config: &Config, name: &str) -> TestCase {
        let state_dir = config.state_dir();
        let output_dir = config.output_dir();
        TestCase {
            name: name.to_string(),
            source: config.input_dir().join(format!("{name}.asm")),
            init_path: state_dir.join(format!("{name}_init.txt")),
            expect_path: state_dir.join(format!("{name}_expect.txt")),
            original_bin: output_dir.join(format!("{name}_original.bin")),
            optimized_asm: output_dir.join(format!("{name}_optimized.asm")),
            optimized_bin: output_dir.join(format!("{name}_optimized.bin")),
        }
    }
}

/// Init and expectation specs plus the memory cells they make observable.
#[derive(Debug, Clone, Default)]
pub struct CaseSpecs {
    pub init: Option<PartialStateSpec>,
    pub expect: Option<PartialStateSpec>,
    pub observation: ObservationSet,
}

impl CaseSpecs {
    pub fn load(case: &TestCase) -> Result<CaseSpecs, CaseFailure> {
        let load = |path: &PathBuf| {
            state::load(path).map_err(|source| CaseFailure::State {
                path: path.clone(),
                source,
            })
        };
        let init = load(&case.init_path)?;
        let expect = load(&case.expect_path)?;
        let observation = observation_set(init.as_ref(), expect.as_ref());
        Ok(CaseSpecs {
            init,
            expect,
            observation,
        })
    }
}

/// The requested case, or every `input/*.asm` sorted by name.
pub fn discover(config: &Config) -> Result<Vec<String>, SetupError> {
    if let Some(name) = &config.test_name {
        return Ok(vec![name.clone()]);
    }

    let input_dir = config.input_dir();
    let entries = fs::read_dir(&input_dir).map_err(|source| SetupError::ReadInputDir {
        path: input_dir.clone(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "asm"))
        .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

fn execute(
    config: &Config,
    case: &TestCase,
    run: Run,
    binary: &[u8],
    init: Option<&PartialStateSpec>,
) -> Result<ExecutionResult, CaseFailure> {
    let driver = config.driver();
    match driver.run(binary, init) {
        Ok(result) if result.completed => Ok(result),
        Ok(result) => {
            report::dump_trace(config, case, run, result.trace(), Some(result.memory()));
            Err(CaseFailure::NonTermination {
                run,
                budget: driver.step_budget,
            })
        }
        Err(source) => {
            if let DriverError::Fault { trace, .. } = &source {
                report::dump_trace(config, case, run, trace, None);
            }
            Err(CaseFailure::Emulation { run, source })
        }
    }
}

fn final_state(
    result: &ExecutionResult,
    observation: &ObservationSet,
    run: Run,
    budget: usize,
) -> Result<MachineState, CaseFailure> {
    result
        .state(observation)
        .ok_or(CaseFailure::NonTermination { run, budget })
}

fn execute_case(config: &Config, report: &mut CaseReport) -> Result<(), CaseFailure> {
    let case = TestCase::new(config, &report.name);
    if !case.source.is_file() {
        return Err(CaseFailure::InputNotFound { path: case.source });
    }

    let timeout = config.tool_timeout;
    let original_bin = toolchain::assemble(
        &config.assemblers,
        &case.source,
        &case.original_bin,
        config.variant,
        timeout,
    )
    .map_err(CaseFailure::AssembleOriginal)?;

    toolchain::optimize(
        &config.optimizer,
        config.variant,
        &case.source,
        &case.optimized_asm,
        &config.suite_dir,
        timeout,
    )
    .map_err(CaseFailure::Optimize)?;

    let optimized_bin = toolchain::assemble(
        &config.assemblers,
        &case.optimized_asm,
        &case.optimized_bin,
        config.variant,
        timeout,
    )
    .map_err(CaseFailure::AssembleOptimized)?;

    let mut specs = CaseSpecs::load(&case)?;

    let original = execute(config, &case, Run::Original, &original_bin, specs.init.as_ref())?;
    report.original = Some(RunStats::from(&original));
    let optimized = execute(config, &case, Run::Optimized, &optimized_bin, specs.init.as_ref())?;
    report.optimized = Some(RunStats::from(&optimized));

    let unobserved: BTreeSet<u16> = original
        .written()
        .union(optimized.written())
        .filter(|addr| !specs.observation.contains(addr))
        .copied()
        .collect();
    if !unobserved.is_empty() {
        tracing::warn!(
            case = %case.name,
            addresses = ?unobserved.iter().map(|a| format!("{a:#06x}")).collect::<Vec<_>>(),
            strict = config.strict_memory,
            "memory written outside the observation set"
        );
        if config.strict_memory {
            specs.observation.extend(unobserved.iter().copied());
        }
    }
    report.unobserved_writes = unobserved.into_iter().collect();

    let budget = config.step_budget;
    let original_state = final_state(&original, &specs.observation, Run::Original, budget)?;
    let optimized_state = final_state(&optimized, &specs.observation, Run::Optimized, budget)?;

    let verdict = compare(&original_state, &optimized_state, &specs.observation);
    if !verdict.passed() {
        return Err(CaseFailure::Mismatch(verdict));
    }

    if let (true, Some(expect)) = (config.check_expect, specs.expect.as_ref()) {
        for (run, state) in [(Run::Original, &original_state), (Run::Optimized, &optimized_state)] {
            let deviations = check_expectation(state, expect);
            if !deviations.is_empty() {
                return Err(CaseFailure::Expectation { run, deviations });
            }
        }
    }

    Ok(())
}

/// Runs one case through the whole pipeline. Never fails: every problem ends
/// up in the report.
pub fn run_case(config: &Config, name: &str) -> CaseReport {
    let mut report = CaseReport::new(name);
    if let Err(failure) = execute_case(config, &mut report) {
        report.failure = Some(failure);
    }
    tracing::info!(case = name, passed = report.passed(), "case finished");
    report
}

/// Runs `names`, calling `on_done` as each case finishes. Results come back in
/// the order of `names` whatever the completion order.
pub fn run_cases<F>(config: &Config, names: &[String], on_done: F) -> Vec<CaseReport>
where
    F: Fn(&CaseReport) + Sync,
{
    let workers = config.jobs.min(names.len());
    if workers <= 1 {
        return names
            .iter()
            .map(|name| {
                let report = run_case(config, name);
                on_done(&report);
                report
            })
            .collect();
    }

    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<CaseReport>>> = Mutex::new((0..names.len()).map(|_| None).collect());
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                let Some(name) = names.get(index) else {
                    break;
                };
                let report = run_case(config, name);
                on_done(&report);
                slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(report);
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .flatten()
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn of(cases: &[CaseReport]) -> Summary {
        let passed = cases.iter().filter(|case| case.passed()).count();
        Summary {
            passed,
            failed: cases.len() - passed,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub cases: Vec<CaseReport>,
    pub summary: Summary,
}

/// Checks preconditions, runs every selected case and prints the report as it
/// goes.
pub fn run_suite(config: &Config) -> Result<SuiteReport, Vec<SetupError>> {
    let discovered = discover(config);
    let needs_assembler = discovered.as_ref().map_or(true, |names| !names.is_empty());
    let errors = setup::preflight(config, needs_assembler);
    if !errors.is_empty() {
        return Err(errors);
    }

    let names = discovered.map_err(|e| vec![e])?;
    if names.is_empty() {
        println!("No test cases found in input/");
        return Ok(SuiteReport::default());
    }
    tracing::debug!(count = names.len(), jobs = config.jobs, "running cases");

    report::print_header();
    let cases = run_cases(config, &names, report::print_case);
    let summary = Summary::of(&cases);
    report::print_summary(&summary);

    Ok(SuiteReport { cases, summary })
}
