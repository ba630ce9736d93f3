//! Console output, the JSON report and execution trace dumps.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use super::{CaseFailure, CaseReport, Run, RunStats, SuiteReport, Summary, TestCase};
use crate::compare::Mismatch;
use crate::config::Config;
use crate::emulator::CpuVariant;

const RULE_WIDTH: usize = 70;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

pub fn print_header() {
    println!("{}", rule());
    println!("Semantic Equivalence Tests");
    println!("{}", rule());
    println!();
}

pub fn print_summary(summary: &Summary) {
    println!("{}", rule());
    println!("Results: {} passed, {} failed", summary.passed, summary.failed);
    println!("{}", rule());
}

/// Prints a case in one write so parallel workers do not interleave.
pub fn print_case(report: &CaseReport) {
    let text = render_case(report);
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{text}");
    let _ = stdout.flush();
}

/// The pass/fail line, its details, and a trailing blank line.
pub fn render_case(report: &CaseReport) -> String {
    let mut out = String::new();
    match &report.failure {
        None => {
            let _ = writeln!(out, "✓ {} PASSED", report.name);
            if let (Some(original), Some(optimized)) = (report.original, report.optimized) {
                let steps = performance(original.steps as u64, optimized.steps as u64, "steps");
                let cycles = performance(original.cycles, optimized.cycles, "cycles");
                let _ = writeln!(out, "  {steps}");
                let _ = writeln!(out, "  {cycles}");
            }
        }
        Some(failure) => {
            let details = failure.details();
            let colon = if details.is_empty() { "" } else { ":" };
            let _ = writeln!(out, "✗ {} FAILED - {failure}{colon}", report.name);
            for line in details {
                let _ = writeln!(out, "  {line}");
            }
        }
    }
    out
}

/// Relative cost of the optimized run, in `unit`.
pub fn performance(original: u64, optimized: u64, unit: &str) -> String {
    match original.cmp(&optimized) {
        Ordering::Greater => {
            let saved = original - optimized;
            let percent = saved as f64 / original as f64 * 100.0;
            format!(
                "Performance: {original} → {optimized} {unit} ({saved} {unit} saved, {percent:.1}% improvement)"
            )
        }
        Ordering::Less => format!(
            "Performance: {original} → {optimized} {unit} ({} {unit} added)",
            optimized - original
        ),
        Ordering::Equal => format!("Performance: {original} {unit} (no change)"),
    }
}

#[derive(Serialize)]
struct JsonCase<'a> {
    name: &'a str,
    passed: bool,
    failure: Option<String>,
    details: Vec<String>,
    original: Option<RunStats>,
    optimized: Option<RunStats>,
    mismatches: &'a [Mismatch],
    unobserved_writes: &'a [u16],
}

impl<'a> From<&'a CaseReport> for JsonCase<'a> {
    fn from(report: &'a CaseReport) -> Self {
        let mismatches: &[Mismatch] = match &report.failure {
            Some(CaseFailure::Mismatch(verdict)) => &verdict.mismatches,
            _ => &[],
        };
        JsonCase {
            name: &report.name,
            passed: report.passed(),
            failure: report.failure.as_ref().map(ToString::to_string),
            details: report
                .failure
                .as_ref()
                .map(CaseFailure::details)
                .unwrap_or_default(),
            original: report.original,
            optimized: report.optimized,
            mismatches,
            unobserved_writes: &report.unobserved_writes,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    suite_dir: &'a Path,
    optimizer: &'a Path,
    cpu: CpuVariant,
    load_address: u16,
    step_budget: usize,
    strict_memory: bool,
    summary: Summary,
    cases: Vec<JsonCase<'a>>,
}

pub fn json_report(config: &Config, suite: &SuiteReport) -> serde_json::Value {
    let report = JsonReport {
        generated_at: Local::now().to_rfc3339(),
        suite_dir: &config.suite_dir,
        optimizer: &config.optimizer,
        cpu: config.variant,
        load_address: config.load_address,
        step_budget: config.step_budget,
        strict_memory: config.strict_memory,
        summary: suite.summary,
        cases: suite.cases.iter().map(JsonCase::from).collect(),
    };
    serde_json::to_value(report).unwrap_or(serde_json::Value::Null)
}

pub fn write_json_report(path: &Path, config: &Config, suite: &SuiteReport) -> io::Result<()> {
    let text = serde_json::to_string_pretty(&json_report(config, suite))?;
    fs::write(path, text + "\n")
}

fn render_trace(trace: &[String], memory: Option<&[u8]>) -> String {
    let mut log = String::from("CALL LOG\n------------------------------------\n");
    for instruction in trace {
        log.push_str(instruction);
        log.push('\n');
    }

    if let Some(memory) = memory {
        log.push_str("\nMEMORY DUMP\n------------------------------------");
        log.push_str("\nZero page and stack $0000 - $01FF");
        for (i, byte) in memory.iter().take(0x200).enumerate() {
            if i % 16 == 0 {
                let _ = write!(log, "\n|{i:#06x}| ");
            } else if i % 8 == 0 {
                log.push(' ');
            }
            let _ = write!(log, "{byte:02x} ");
        }
        log.push('\n');
    }
    log
}

/// Writes `<trace-dir>/<case>_<run>_<timestamp>.log`.
pub fn write_trace(
    dir: &Path,
    case: &str,
    run: Run,
    trace: &[String],
    memory: Option<&[u8]>,
) -> io::Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
    let path = dir.join(format!("{case}_{}_{stamp}.log", run.tag()));
    fs::write(&path, render_trace(trace, memory))?;
    Ok(path)
}

/// Dumps the trace when a trace directory is configured. Failures are logged
/// and otherwise ignored.
pub fn dump_trace(
    config: &Config,
    case: &TestCase,
    run: Run,
    trace: &[String],
    memory: Option<&[u8]>,
) {
    let Some(dir) = &config.trace_dir else {
        return;
    };
    match write_trace(dir, &case.name, run, trace, memory) {
        Ok(path) => tracing::info!(case = %case.name, path = %path.display(), "wrote trace log"),
        Err(e) => tracing::warn!(case = %case.name, error = %e, "unable to write trace log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{ComparisonVerdict, Location};
    use crate::state::Register;

    fn report(name: &str) -> CaseReport {
        CaseReport {
            name: name.to_string(),
            original: None,
            optimized: None,
            unobserved_writes: Vec::new(),
            failure: None,
        }
    }

    #[test]
    fn performance_lines() {
        assert_eq!(
            performance(12, 9, "cycles"),
            "Performance: 12 → 9 cycles (3 cycles saved, 25.0% improvement)"
        );
        assert_eq!(
            performance(4, 5, "steps"),
            "Performance: 4 → 5 steps (1 steps added)"
        );
        assert_eq!(performance(7, 7, "steps"), "Performance: 7 steps (no change)");
    }

    #[test]
    fn renders_pass_with_performance() {
        let mut case = report("add_zero");
        case.original = Some(RunStats { steps: 4, cycles: 14 });
        case.optimized = Some(RunStats { steps: 3, cycles: 12 });
        assert_eq!(
            render_case(&case),
            "✓ add_zero PASSED\n\
             \x20 Performance: 4 → 3 steps (1 steps saved, 25.0% improvement)\n\
             \x20 Performance: 14 → 12 cycles (2 cycles saved, 14.3% improvement)\n"
        );
    }

    #[test]
    fn renders_mismatch_list() {
        let mut case = report("bad_x");
        case.failure = Some(CaseFailure::Mismatch(ComparisonVerdict {
            mismatches: vec![Mismatch {
                location: Location::Register(Register::X),
                original: 0x02,
                optimized: 0x01,
            }],
        }));
        assert_eq!(
            render_case(&case),
            "✗ bad_x FAILED - State mismatch:\n  X: original=0x02, optimized=0x01\n"
        );

        let json = serde_json::to_value(JsonCase::from(&case)).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["mismatches"][0]["location"]["register"], "X");
        assert_eq!(json["details"][0], "X: original=0x02, optimized=0x01");
    }

    #[test]
    fn renders_non_termination_without_details() {
        let mut case = report("spin");
        case.failure = Some(CaseFailure::NonTermination {
            run: Run::Optimized,
            budget: 10_000,
        });
        assert_eq!(
            render_case(&case),
            "✗ spin FAILED - Optimized code did not complete (exceeded 10000 steps without RTS)\n"
        );
    }

    #[test]
    fn json_report_carries_summary_and_config() {
        let config = Config::new("/suite");
        let suite = SuiteReport {
            cases: vec![report("a")],
            summary: Summary { passed: 1, failed: 0 },
        };
        let json = json_report(&config, &suite);
        assert_eq!(json["cpu"], "6502");
        assert_eq!(json["load_address"], 0x1000);
        assert_eq!(json["summary"]["passed"], 1);
        assert_eq!(json["cases"][0]["name"], "a");
        assert!(json["generated_at"].is_string());
    }

    #[test]
    fn trace_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let trace = vec!["pc:0x1000 -> 'JMP $1000' (0x4c)".to_string()];
        let memory = vec![0xAB; 0x10000];
        let path = write_trace(dir.path(), "spin", Run::Original, &trace, Some(&memory)).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("spin_original_"));
        assert!(name.ends_with(".log"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("CALL LOG\n"));
        assert!(text.contains("'JMP $1000'"));
        assert!(text.contains("|0x01f0| ab"));
    }
}
