use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::errors::SetupError;
use crate::harness::toolchain::AssemblerStrategy;

/// Checks everything the whole run depends on. Every unmet precondition is
/// reported, not just the first. An assembler is only required when there is
/// something to assemble.
pub fn preflight(config: &Config, needs_assembler: bool) -> Vec<SetupError> {
    let mut errors = Vec::new();

    if !config.optimizer.is_file() {
        errors.push(SetupError::MissingOptimizer {
            path: config.optimizer.clone(),
        });
    }

    let input_dir = config.input_dir();
    if !input_dir.is_dir() {
        errors.push(SetupError::MissingInputDir { path: input_dir });
    }

    if needs_assembler && !config.assemblers.iter().any(is_available) {
        let tried = config
            .assemblers
            .iter()
            .map(|strategy| strategy.programs().collect::<Vec<_>>().join("+"))
            .collect::<Vec<_>>()
            .join(", ");
        errors.push(SetupError::NoAssembler { tried });
    }

    let mut dirs = vec![config.output_dir()];
    dirs.extend(config.trace_dir.clone());
    for dir in dirs {
        if let Err(source) = fs::create_dir_all(&dir) {
            errors.push(SetupError::OutputDir { path: dir, source });
        }
    }

    errors
}

fn is_available(strategy: &AssemblerStrategy) -> bool {
    strategy.programs().all(|program| find_program(program).is_some())
}

/// Resolves a program name the way the shell would: names containing a path
/// separator are taken as paths, anything else is looked up on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}
