#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use equiv6502::compare::Location;
use equiv6502::config::Config;
use equiv6502::emulator::CpuVariant;
use equiv6502::errors::{ExternalToolError, SetupError};
use equiv6502::harness::toolchain::{Arg, AssemblerStrategy, Stage};
use equiv6502::harness::{self, run_case, CaseFailure, Run};
use equiv6502::state::Register;
use tempfile::TempDir;

/// Copies `<input>.bin` to the output, standing in for a real assembler.
fn copy_assembler() -> AssemblerStrategy {
    AssemblerStrategy {
        name: "copy".to_string(),
        stages: vec![Stage::new(
            "sh",
            vec![
                Arg::Literal("-c".to_string()),
                Arg::Literal("cp \"$1.bin\" \"$2\"".to_string()),
                Arg::Literal("sh".to_string()),
                Arg::Input,
                Arg::Output,
            ],
        )],
    }
}

/// Copies the source through unchanged. The binary for the optimized source
/// is `<input>.opt.bin` when present, otherwise the original's.
const FAKE_OPTIMIZER: &str = r#"#!/bin/sh
echo "$@" > "$PWD/optimizer.args"
while [ "$1" = "-speed" ] || [ "$1" = "-cpu" ]; do
    if [ "$1" = "-cpu" ]; then shift; fi
    shift
done
cp "$1" "$2"
if [ -f "$1.opt.bin" ]; then
    cp "$1.opt.bin" "$2.bin"
else
    cp "$1.bin" "$2.bin"
fi
"#;

const FAILING_OPTIMIZER: &str = "#!/bin/sh\necho \"opt exploded\" >&2\nexit 2\n";

struct Suite {
    dir: TempDir,
    config: Config,
}

impl Suite {
    fn new() -> Suite {
        Suite::with_optimizer(FAKE_OPTIMIZER)
    }

    fn with_optimizer(script: &str) -> Suite {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["input", "state"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
        }
        let optimizer = dir.path().join("opt6502");
        fs::write(&optimizer, script).unwrap();
        fs::set_permissions(&optimizer, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::new(dir.path());
        config.optimizer = optimizer;
        config.assemblers = vec![copy_assembler()];
        config.step_budget = 1_000;
        Suite { dir, config }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn case(&self, name: &str, original: &[u8], optimized: Option<&[u8]>) {
        let source = self.path().join("input").join(format!("{name}.asm"));
        fs::write(&source, format!("; {name}\n")).unwrap();
        fs::write(source.with_extension("asm.bin"), original).unwrap();
        if let Some(bytes) = optimized {
            fs::write(source.with_extension("asm.opt.bin"), bytes).unwrap();
        }
    }

    fn init(&self, name: &str, text: &str) {
        fs::write(self.path().join("state").join(format!("{name}_init.txt")), text).unwrap();
    }

    fn expect(&self, name: &str, text: &str) {
        fs::write(self.path().join("state").join(format!("{name}_expect.txt")), text).unwrap();
    }

    fn prepare(&self) {
        assert!(harness::setup::preflight(&self.config, true).is_empty());
    }
}

#[test]
fn identical_binaries_pass_with_equal_steps() {
    let suite = Suite::new();
    // ASL A; RTS
    suite.case("double", &[0x0a, 0x60], None);
    suite.init("double", "[registers]\nA = 0x05\n");
    suite.prepare();

    let report = run_case(&suite.config, "double");
    assert!(report.passed(), "{:?}", report.failure);
    let (original, optimized) = (report.original.unwrap(), report.optimized.unwrap());
    assert_eq!(original.steps, 2);
    assert_eq!(original, optimized);
    assert!(suite.path().join("output/double_original.bin").is_file());
    assert!(suite.path().join("output/double_optimized.asm").is_file());
}

#[test]
fn register_difference_is_a_single_mismatch() {
    let suite = Suite::new();
    // LDX #$02; RTS  vs  LDX #$01; RTS
    suite.case("ldx", &[0xa2, 0x02, 0x60], Some(&[0xa2, 0x01, 0x60]));
    suite.prepare();

    let report = run_case(&suite.config, "ldx");
    match report.failure {
        Some(CaseFailure::Mismatch(verdict)) => {
            assert_eq!(verdict.mismatches.len(), 1);
            assert_eq!(verdict.mismatches[0].location, Location::Register(Register::X));
            assert_eq!(
                verdict.mismatches[0].to_string(),
                "X: original=0x02, optimized=0x01"
            );
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[test]
fn optimized_code_that_never_returns() {
    let mut suite = Suite::new();
    suite.config.trace_dir = Some(suite.path().join("traces"));
    // NOP; RTS  vs  JMP $1000
    suite.case("spin", &[0xea, 0x60], Some(&[0x4c, 0x00, 0x10]));
    suite.prepare();

    let report = run_case(&suite.config, "spin");
    assert!(matches!(
        report.failure,
        Some(CaseFailure::NonTermination {
            run: Run::Optimized,
            budget: 1_000
        })
    ));
    assert!(report.original.is_some());
    assert!(report.optimized.is_none());

    let logs: Vec<PathBuf> = fs::read_dir(suite.path().join("traces"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("spin_optimized_"), "{name}");
    assert!(fs::read_to_string(&logs[0]).unwrap().contains("JMP $1000"));
}

#[test]
fn untouched_init_memory_passes() {
    let suite = Suite::new();
    // LDA #$01; RTS
    suite.case("mem", &[0xa9, 0x01, 0x60], None);
    suite.init("mem", "[memory]\n0x0200 = 0xFF\n");
    suite.prepare();

    let report = run_case(&suite.config, "mem");
    assert!(report.passed(), "{:?}", report.failure);
    assert!(report.unobserved_writes.is_empty());
}

#[test]
fn observed_memory_difference() {
    let suite = Suite::new();
    // LDA #$01; STA $0200; RTS  vs  LDA #$01; RTS
    suite.case(
        "store",
        &[0xa9, 0x01, 0x8d, 0x00, 0x02, 0x60],
        Some(&[0xa9, 0x01, 0x60]),
    );
    suite.expect("store", "[memory]\n0x0200 = 0x01\n");
    suite.prepare();

    let report = run_case(&suite.config, "store");
    match report.failure {
        Some(CaseFailure::Mismatch(verdict)) => {
            let rendered: Vec<_> = verdict.mismatches.iter().map(|m| m.to_string()).collect();
            assert_eq!(rendered, vec!["Memory[0x0200]: original=0x01, optimized=0x00"]);
        }
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[test]
fn unobserved_writes_only_fail_in_strict_mode() {
    let mut suite = Suite::new();
    // LDA #$01; STA $0300; RTS  vs  LDA #$01; STA $0301; RTS
    suite.case(
        "scatter",
        &[0xa9, 0x01, 0x8d, 0x00, 0x03, 0x60],
        Some(&[0xa9, 0x01, 0x8d, 0x01, 0x03, 0x60]),
    );
    suite.prepare();

    let lenient = run_case(&suite.config, "scatter");
    assert!(lenient.passed());
    assert_eq!(lenient.unobserved_writes, vec![0x0300, 0x0301]);

    suite.config.strict_memory = true;
    let strict = run_case(&suite.config, "scatter");
    match strict.failure {
        Some(CaseFailure::Mismatch(verdict)) => assert_eq!(verdict.mismatches.len(), 2),
        other => panic!("expected a mismatch, got {other:?}"),
    }
}

#[test]
fn expectation_is_checked_on_request() {
    let mut suite = Suite::new();
    // INX; RTS
    suite.case("inx", &[0xe8, 0x60], None);
    suite.expect("inx", "[registers]\nX = 0x02\n");
    suite.prepare();

    assert!(run_case(&suite.config, "inx").passed());

    suite.config.check_expect = true;
    let report = run_case(&suite.config, "inx");
    match report.failure {
        Some(CaseFailure::Expectation { run, deviations }) => {
            assert_eq!(run, Run::Original);
            assert_eq!(deviations[0].to_string(), "X: expected=0x02, actual=0x01");
        }
        other => panic!("expected an expectation failure, got {other:?}"),
    }
}

#[test]
fn optimizer_failure_keeps_stderr() {
    let suite = Suite::with_optimizer(FAILING_OPTIMIZER);
    suite.case("boom", &[0x60], None);
    suite.prepare();

    let report = run_case(&suite.config, "boom");
    let failure = report.failure.expect("optimizer failure");
    assert!(matches!(failure, CaseFailure::Optimize(_)));
    assert_eq!(failure.details(), vec!["opt exploded"]);
}

#[test]
fn leftover_optimizer_output_is_not_reused() {
    let suite = Suite::with_optimizer("#!/bin/sh\nexit 0\n");
    suite.case("c", &[0xa2, 0x02, 0x60], None);
    // Output of an earlier run that would assemble and compare as equal.
    let output = suite.path().join("output");
    fs::create_dir(&output).unwrap();
    fs::write(output.join("c_optimized.asm"), "; c\n").unwrap();
    fs::write(output.join("c_optimized.asm.bin"), [0xa2, 0x02, 0x60]).unwrap();
    suite.prepare();

    let report = run_case(&suite.config, "c");
    assert!(!report.passed());
    match report.failure {
        Some(CaseFailure::Optimize(ExternalToolError::NoOutput { path, .. })) => {
            assert_eq!(path, output.join("c_optimized.asm"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(report.optimized.is_none());
}

#[test]
fn missing_binary_exhausts_assemblers() {
    let suite = Suite::new();
    fs::write(suite.path().join("input/nobin.asm"), "").unwrap();
    suite.prepare();

    let report = run_case(&suite.config, "nobin");
    assert!(matches!(report.failure, Some(CaseFailure::AssembleOriginal(_))));
}

#[test]
fn invalid_state_file_fails_the_case() {
    let suite = Suite::new();
    suite.case("parse", &[0x60], None);
    suite.init("parse", "[registers]\nA = banana\n");
    suite.prepare();

    let report = run_case(&suite.config, "parse");
    assert!(matches!(report.failure, Some(CaseFailure::State { .. })));
}

#[test]
fn cmos_variant_reaches_optimizer_and_emulator() {
    let mut suite = Suite::new();
    // PHX; PLA; RTS
    suite.case("phx", &[0xda, 0x68, 0x60], None);
    suite.init("phx", "[registers]\nX = 7\n");
    suite.prepare();

    let nmos = run_case(&suite.config, "phx");
    assert!(matches!(
        nmos.failure,
        Some(CaseFailure::Emulation {
            run: Run::Original,
            ..
        })
    ));

    suite.config.variant = CpuVariant::Cmos65C02;
    let cmos = run_case(&suite.config, "phx");
    assert!(cmos.passed(), "{:?}", cmos.failure);
    let args = fs::read_to_string(suite.path().join("optimizer.args")).unwrap();
    assert!(args.starts_with("-speed -cpu 65c02 "), "{args}");
}

#[test]
fn parallel_run_reports_in_discovery_order() {
    let mut suite = Suite::new();
    suite.config.jobs = 3;
    for (name, x) in [("d", 4u8), ("a", 1), ("c", 3), ("b", 2)] {
        suite.case(name, &[0xa2, x, 0x60], None);
    }
    suite.case("e", &[0xa2, 0x05, 0x60], Some(&[0xa2, 0x06, 0x60]));

    let result = harness::run_suite(&suite.config).unwrap();
    let names: Vec<_> = result.cases.iter().map(|case| case.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(result.summary.passed, 4);
    assert_eq!(result.summary.failed, 1);
    assert!(!result.cases[4].passed());
}

#[test]
fn empty_suite_succeeds() {
    let suite = Suite::new();
    let result = harness::run_suite(&suite.config).unwrap();
    assert!(result.cases.is_empty());
    assert!(result.summary.success());
}

#[test]
fn empty_suite_needs_no_assembler() {
    let mut suite = Suite::new();
    suite.config.assemblers = vec![AssemblerStrategy {
        name: "absent".to_string(),
        stages: vec![Stage::new("equiv6502-missing-assembler", Vec::new())],
    }];
    let result = harness::run_suite(&suite.config).unwrap();
    assert!(result.cases.is_empty());
    assert!(result.summary.success());

    suite.case("a", &[0x60], None);
    let errors = harness::run_suite(&suite.config).unwrap_err();
    assert!(matches!(errors[..], [SetupError::NoAssembler { .. }]), "{errors:?}");
}

#[test]
fn setup_errors_are_collected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::new(dir.path());
    config.optimizer = dir.path().join("missing-opt6502");
    config.assemblers = vec![copy_assembler()];

    let errors = harness::run_suite(&config).unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], SetupError::MissingOptimizer { .. }));
    assert!(matches!(errors[1], SetupError::MissingInputDir { .. }));
}

#[test]
fn binary_exits_nonzero_without_optimizer() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_equiv6502"))
        .arg("--suite-dir")
        .arg(dir.path())
        .arg("--optimizer")
        .arg(dir.path().join("missing-opt6502"))
        .arg("-q")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Error: optimizer not found at"), "{stdout}");
}
