//! External programs: the assemblers and the optimizer under test.

use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::emulator::CpuVariant;
use crate::errors::ExternalToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One argument of a toolchain stage. Placeholders are filled in per
/// invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Literal(String),
    /// The assembly source.
    Input,
    /// The final binary.
    Output,
    /// Intermediate object file next to the output.
    Object,
    /// `<flag> 65C02` when assembling for the 65C02; nothing otherwise.
    CpuFlag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub program: String,
    pub args: Vec<Arg>,
}

impl Stage {
    pub fn new(program: &str, args: Vec<Arg>) -> Stage {
        Stage {
            program: program.to_string(),
            args,
        }
    }

    fn expand(&self, input: &Path, output: &Path, variant: CpuVariant) -> Vec<OsString> {
        let mut expanded = Vec::new();
        for arg in &self.args {
            match arg {
                Arg::Literal(text) => expanded.push(text.into()),
                Arg::Input => expanded.push(input.into()),
                Arg::Output => expanded.push(output.into()),
                Arg::Object => expanded.push(object_path(output).into()),
                Arg::CpuFlag(flag) => {
                    if variant == CpuVariant::Cmos65C02 {
                        expanded.push(flag.into());
                        expanded.push("65C02".into());
                    }
                }
            }
        }
        expanded
    }
}

/// A way of turning a source file into a flat binary: one or more stages run
/// in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerStrategy {
    pub name: String,
    pub stages: Vec<Stage>,
}

impl AssemblerStrategy {
    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.program.as_str())
    }
}

fn lit(text: &str) -> Arg {
    Arg::Literal(text.to_string())
}

/// `xa`, then `ca65` + `ld65`.
pub fn default_assemblers() -> Vec<AssemblerStrategy> {
    vec![
        AssemblerStrategy {
            name: "xa".to_string(),
            stages: vec![Stage::new("xa", vec![lit("-o"), Arg::Output, Arg::Input])],
        },
        AssemblerStrategy {
            name: "ca65".to_string(),
            stages: vec![
                Stage::new(
                    "ca65",
                    vec![
                        lit("-t"),
                        lit("none"),
                        Arg::CpuFlag("--cpu".to_string()),
                        lit("-o"),
                        Arg::Object,
                        Arg::Input,
                    ],
                ),
                Stage::new(
                    "ld65",
                    vec![lit("-t"), lit("none"), lit("-o"), Arg::Output, Arg::Object],
                ),
            ],
        },
    ]
}

fn object_path(output: &Path) -> PathBuf {
    output.with_extension("o")
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn wait_with_timeout(
    child: &mut Child,
    program: &str,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>, ExternalToolError> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                return Err(ExternalToolError::Wait {
                    program: program.to_string(),
                    source,
                })
            }
        }
    }
}

/// Runs `program` to completion, killing it once `timeout` has passed. Its
/// stderr is kept for the error when it exits non-zero.
pub fn run_tool(
    program: &str,
    args: &[OsString],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<(), ExternalToolError> {
    tracing::debug!(program, ?args, "running tool");
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| ExternalToolError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    // Readers are left detached on timeout: a grandchild may still hold the
    // pipes open.
    let Some(status) = wait_with_timeout(&mut child, program, timeout)? else {
        return Err(ExternalToolError::TimedOut {
            program: program.to_string(),
            timeout,
        });
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    if !stdout.trim().is_empty() {
        tracing::trace!(program, stdout = %stdout.trim_end(), "tool output");
    }
    if !status.success() {
        return Err(ExternalToolError::Failed {
            program: program.to_string(),
            status: status.to_string(),
            stderr,
        });
    }
    Ok(())
}

fn run_strategy(
    strategy: &AssemblerStrategy,
    input: &Path,
    output: &Path,
    variant: CpuVariant,
    timeout: Duration,
) -> Result<Vec<u8>, ExternalToolError> {
    for stage in &strategy.stages {
        let args = stage.expand(input, output, variant);
        run_tool(&stage.program, &args, None, timeout)?;
    }
    fs::read(output).map_err(|source| ExternalToolError::NoOutput {
        program: strategy.name.clone(),
        path: output.to_path_buf(),
        source,
    })
}

/// Tries each strategy in turn and returns the binary of the first that
/// succeeds.
pub fn assemble(
    strategies: &[AssemblerStrategy],
    input: &Path,
    output: &Path,
    variant: CpuVariant,
    timeout: Duration,
) -> Result<Vec<u8>, ExternalToolError> {
    let mut attempts = Vec::new();
    for strategy in strategies {
        // A stale binary from an earlier run must not count as output.
        let _ = fs::remove_file(output);
        match run_strategy(strategy, input, output, variant, timeout) {
            Ok(binary) => {
                tracing::debug!(
                    assembler = %strategy.name,
                    input = %input.display(),
                    bytes = binary.len(),
                    "assembled"
                );
                return Ok(binary);
            }
            Err(e) => {
                tracing::debug!(assembler = %strategy.name, error = %e, "assembler failed");
                attempts.push(e);
            }
        }
    }
    Err(ExternalToolError::Exhausted {
        input: input.to_path_buf(),
        attempts,
    })
}

/// Runs `<optimizer> -speed [-cpu <variant>] <input> <output>` from the suite
/// directory. The optimizer must write `output` itself; a file left over from
/// an earlier run does not count.
pub fn optimize(
    optimizer: &Path,
    variant: CpuVariant,
    input: &Path,
    output: &Path,
    suite_dir: &Path,
    timeout: Duration,
) -> Result<(), ExternalToolError> {
    let mut args: Vec<OsString> = vec!["-speed".into()];
    if !variant.is_default() {
        args.push("-cpu".into());
        args.push(variant.name().into());
    }
    args.push(input.into());
    args.push(output.into());

    let _ = fs::remove_file(output);
    let program = optimizer.to_string_lossy();
    run_tool(&program, &args, Some(suite_dir), timeout)?;
    fs::metadata(output)
        .map(|_| ())
        .map_err(|source| ExternalToolError::NoOutput {
            program: program.into_owned(),
            path: output.to_path_buf(),
            source,
        })
}
