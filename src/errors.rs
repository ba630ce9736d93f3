use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::emulator::CpuError;
use crate::utils::literal::LiteralError;

/// A state specification file that could not be read or understood.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unable to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("line {line}: unterminated section header '{text}'")]
    UnterminatedSection { line: usize, text: String },
    #[error("line {line}: entry '{text}' appears before any section header")]
    MissingSection { line: usize, text: String },
    #[error("line {line}: expected 'key = value', found '{text}'")]
    MalformedEntry { line: usize, text: String },
    #[error("line {line}: section [{name}] appears more than once")]
    DuplicateSection { line: usize, name: String },
    #[error("line {line}: key '{key}' appears more than once in [{section}]")]
    DuplicateKey {
        line: usize,
        section: String,
        key: String,
    },
    #[error("line {line}: unknown register '{name}' (expected A, X or Y)")]
    UnknownRegister { line: usize, name: String },
    #[error("line {line}: unknown flag '{name}' (expected C, N, Z or V)")]
    UnknownFlag { line: usize, name: String },
    #[error("line {line}: {source}")]
    Literal { line: usize, source: LiteralError },
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("binary image is empty")]
    EmptyImage,
    #[error("emulator fault at pc {pc:#06x} after {steps} steps: {source}")]
    Fault {
        pc: u16,
        steps: usize,
        source: CpuError,
        /// Recent instructions leading up to the fault, if tracing was on.
        trace: Vec<String>,
    },
}

impl DriverError {
    pub fn with_trace(self, log: Vec<String>) -> DriverError {
        match self {
            DriverError::Fault {
                pc, steps, source, ..
            } => DriverError::Fault {
                pc,
                steps,
                source,
                trace: log,
            },
            other => other,
        }
    }
}

/// Failure of an external program the harness depends on.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("unable to start '{program}': {source}")]
    Spawn { program: String, source: io::Error },
    #[error("lost track of '{program}': {source}")]
    Wait { program: String, source: io::Error },
    #[error("'{program}' exited with {status}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("'{program}' did not finish within {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("'{program}' produced no readable output at {}: {source}", path.display())]
    NoOutput {
        program: String,
        path: PathBuf,
        source: io::Error,
    },
    #[error("all assemblers failed for {}", input.display())]
    Exhausted {
        input: PathBuf,
        attempts: Vec<ExternalToolError>,
    },
}

impl ExternalToolError {
    /// Diagnostic text to forward to the report.
    pub fn diagnostics(&self) -> String {
        match self {
            ExternalToolError::Failed { stderr, .. } => stderr.trim_end().to_string(),
            ExternalToolError::Exhausted { attempts, .. } => attempts
                .iter()
                .map(|attempt| match attempt.diagnostics() {
                    text if text.is_empty() => attempt.to_string(),
                    text => format!("{attempt}:\n{text}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }
}

/// A precondition for the whole run that does not hold.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("optimizer not found at {}", path.display())]
    MissingOptimizer { path: PathBuf },
    #[error("input directory not found: {}", path.display())]
    MissingInputDir { path: PathBuf },
    #[error("unable to list {}: {source}", path.display())]
    ReadInputDir { path: PathBuf, source: io::Error },
    #[error("no assembler available (tried {tried})")]
    NoAssembler { tried: String },
    #[error("unable to create {}: {source}", path.display())]
    OutputDir { path: PathBuf, source: io::Error },
}
