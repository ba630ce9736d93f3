//! Command-line options and the resolved run configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing_subscriber::filter::LevelFilter;

use crate::driver::{Driver, DEFAULT_LOAD_ADDRESS, DEFAULT_STEP_BUDGET};
use crate::emulator::CpuVariant;
use crate::harness::toolchain::{default_assemblers, AssemblerStrategy};
use crate::utils::parse_int_literal;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Optimizer location relative to the suite directory.
pub const DEFAULT_OPTIMIZER: &str = "../../opt6502";
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

const LONG_ABOUT: &str = "Semantic equivalence tests for a 6502 optimizer.

Each case input/<name>.asm is assembled, passed through the optimizer, assembled
again, and both binaries are run on an emulator from the same initial state
(state/<name>_init.txt). Registers A, X, Y, flags C, N, Z, V and every memory
address named in the init or expect files must end up identical.";

#[derive(Parser, Debug)]
#[command(
    name = "equiv6502",
    version = VERSION,
    about = "Checks that optimized 6502 code behaves like the original",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(value_name = "TEST_NAME", long_help = "Run only this case. Runs every input/*.asm when omitted.")]
    pub test_name: Option<String>,
    #[arg(
        short = 'd',
        long = "suite-dir",
        value_name = "DIR",
        default_value = ".",
        long_help = "Suite root holding input/, state/ and output/."
    )]
    pub suite_dir: PathBuf,
    #[arg(
        long = "optimizer",
        value_name = "PATH",
        long_help = "Optimizer to test. Defaults to ../../opt6502 relative to the suite directory."
    )]
    pub optimizer: Option<PathBuf>,
    #[arg(
        long = "cpu",
        value_name = "ID",
        default_value = "6502",
        value_parser = clap::value_parser!(CpuVariant),
        long_help = "CPU variant for the emulator and the optimizer: 6502 or 65c02."
    )]
    pub cpu: CpuVariant,
    #[arg(
        long = "load-address",
        value_name = "ADDR",
        default_value = "0x1000",
        value_parser = parse_address,
        long_help = "Address the binaries are loaded at and run from. Accepts 0x/0o/0b prefixes."
    )]
    pub load_address: u16,
    #[arg(
        long = "step-budget",
        value_name = "N",
        default_value_t = DEFAULT_STEP_BUDGET as u64,
        value_parser = clap::value_parser!(u64).range(1..),
        long_help = "Maximum instructions per run before it counts as not terminating."
    )]
    pub step_budget: u64,
    #[arg(
        long = "tool-timeout",
        value_name = "SECS",
        default_value_t = DEFAULT_TOOL_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
        long_help = "Wall-clock limit for each assembler or optimizer invocation."
    )]
    pub tool_timeout: u64,
    #[arg(
        short = 'j',
        long = "jobs",
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..),
        long_help = "Number of cases to run concurrently."
    )]
    pub jobs: u32,
    #[arg(
        long = "strict-memory",
        action = ArgAction::SetTrue,
        long_help = "Also compare memory cells written by either run that neither state file names."
    )]
    pub strict_memory: bool,
    #[arg(
        long = "check-expect",
        action = ArgAction::SetTrue,
        long_help = "Also fail a case when either run disagrees with state/<name>_expect.txt."
    )]
    pub check_expect: bool,
    #[arg(
        long = "json",
        value_name = "FILE",
        long_help = "Write a machine-readable report to FILE."
    )]
    pub json: Option<PathBuf>,
    #[arg(
        long = "trace-dir",
        value_name = "DIR",
        long_help = "Record recent instructions and dump them here when a run faults or does not terminate."
    )]
    pub trace_dir: Option<PathBuf>,
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        conflicts_with = "quiet",
        long_help = "Increase log verbosity (repeatable)."
    )]
    pub verbose: u8,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Only log errors."
    )]
    pub quiet: bool,
}

fn parse_address(text: &str) -> Result<u16, String> {
    let value = parse_int_literal(text).map_err(|e| e.to_string())?;
    u16::try_from(value).map_err(|_| format!("{text} is outside the 16-bit address space"))
}

impl Cli {
    pub fn log_filter(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub suite_dir: PathBuf,
    pub test_name: Option<String>,
    pub optimizer: PathBuf,
    pub variant: CpuVariant,
    pub load_address: u16,
    pub step_budget: usize,
    pub tool_timeout: Duration,
    pub jobs: usize,
    pub strict_memory: bool,
    pub check_expect: bool,
    pub json_report: Option<PathBuf>,
    pub trace_dir: Option<PathBuf>,
    /// Tried in order until one produces a binary.
    pub assemblers: Vec<AssemblerStrategy>,
}

impl Config {
    /// Defaults for a suite rooted at `suite_dir`.
    pub fn new(suite_dir: impl AsRef<Path>) -> Config {
        let suite_dir = absolute(suite_dir.as_ref());
        Config {
            optimizer: suite_dir.join(DEFAULT_OPTIMIZER),
            suite_dir,
            test_name: None,
            variant: CpuVariant::default(),
            load_address: DEFAULT_LOAD_ADDRESS,
            step_budget: DEFAULT_STEP_BUDGET,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            jobs: 1,
            strict_memory: false,
            check_expect: false,
            json_report: None,
            trace_dir: None,
            assemblers: default_assemblers(),
        }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.suite_dir.join("input")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.suite_dir.join("state")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.suite_dir.join("output")
    }

    pub fn driver(&self) -> Driver {
        Driver {
            load_address: self.load_address,
            step_budget: self.step_budget,
            variant: self.variant,
            trace: self.trace_dir.is_some(),
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Config {
        let mut config = Config::new(&cli.suite_dir);
        if let Some(optimizer) = cli.optimizer {
            config.optimizer = absolute(&optimizer);
        }
        config.test_name = cli.test_name;
        config.variant = cli.cpu;
        config.load_address = cli.load_address;
        config.step_budget = cli.step_budget as usize;
        config.tool_timeout = Duration::from_secs(cli.tool_timeout);
        config.jobs = cli.jobs as usize;
        config.strict_memory = cli.strict_memory;
        config.check_expect = cli.check_expect;
        config.json_report = cli.json;
        config.trace_dir = cli.trace_dir.map(|dir| absolute(&dir));
        config
    }
}

/// External tools run with the suite directory as their working directory,
/// so every path handed to them is made absolute first.
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("equiv6502").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = Config::from(parse(&[]).unwrap());
        assert!(config.suite_dir.is_absolute());
        assert_eq!(config.optimizer, config.suite_dir.join("../../opt6502"));
        assert_eq!(config.variant, CpuVariant::Nmos6502);
        assert_eq!(config.load_address, 0x1000);
        assert_eq!(config.step_budget, 10_000);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.jobs, 1);
        assert!(config.test_name.is_none());
        assert!(!config.driver().trace);
    }

    #[test]
    fn explicit_options() {
        let cli = parse(&[
            "add_zero",
            "-d",
            "/tmp/suite",
            "--cpu",
            "65C02",
            "--load-address",
            "0b1000_0000_0000_0000",
            "--step-budget",
            "50",
            "-j",
            "4",
            "--strict-memory",
            "--trace-dir",
            "/tmp/traces",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.log_filter(), LevelFilter::DEBUG);

        let config = Config::from(cli);
        assert_eq!(config.test_name.as_deref(), Some("add_zero"));
        assert_eq!(config.input_dir(), PathBuf::from("/tmp/suite/input"));
        assert_eq!(config.variant, CpuVariant::Cmos65C02);
        assert_eq!(config.load_address, 0x8000);
        assert_eq!(config.step_budget, 50);
        assert_eq!(config.jobs, 4);
        assert!(config.strict_memory);
        assert!(config.driver().trace);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--cpu", "65816"]).is_err());
        assert!(parse(&["--load-address", "0x10000"]).is_err());
        assert!(parse(&["--load-address", "010"]).is_err());
        assert!(parse(&["--jobs", "0"]).is_err());
        assert!(parse(&["-v", "-q"]).is_err());
    }
}
