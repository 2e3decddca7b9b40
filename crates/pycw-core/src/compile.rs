use std::path::{Path, PathBuf};

use anyhow::Result;
use pycw_python::run_command;

use crate::options::OptimizeLevel;

/// One recursive compilation of an extracted wheel.
#[derive(Clone, Debug)]
pub struct CompileRequest<'a> {
    pub root: &'a Path,
    /// Directory name recorded in bytecode in place of `root`.
    pub origin: String,
    pub exclude: Option<&'a str>,
    pub optimize: OptimizeLevel,
    pub force: bool,
    /// Write `mod.pyc` next to `mod.py` instead of into `__pycache__`.
    pub legacy: bool,
    pub quiet: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CompileReport {
    pub success: bool,
    pub output: String,
}

/// Compiles python sources to bytecode in place.
pub trait SourceCompiler {
    /// # Errors
    /// Returns an error only when the compiler cannot be run at all; failures
    /// to compile individual files are reported through [`CompileReport`].
    fn compile_tree(&self, request: &CompileRequest<'_>) -> Result<CompileReport>;
}

/// Runs `python -m compileall` with the interpreter the wheel is built for.
#[derive(Clone, Debug)]
pub struct CompileAll {
    python: PathBuf,
}

impl CompileAll {
    #[must_use]
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    #[must_use]
    pub fn python(&self) -> &Path {
        &self.python
    }

    fn args(request: &CompileRequest<'_>) -> Vec<String> {
        let mut args = Vec::new();
        // Interpreter flags keep legacy .pyc names on every Python 3 release,
        // unlike compileall's own -o.
        match request.optimize {
            OptimizeLevel::O0 => {}
            OptimizeLevel::O1 => args.push("-O".to_string()),
            OptimizeLevel::O2 => args.push("-OO".to_string()),
        }
        args.extend(["-m".to_string(), "compileall".to_string()]);
        if request.force {
            args.push("-f".to_string());
        }
        if request.legacy {
            args.push("-b".to_string());
        }
        args.extend(["-d".to_string(), request.origin.clone()]);
        if let Some(pattern) = request.exclude {
            args.extend(["-x".to_string(), pattern.to_string()]);
        }
        if request.quiet {
            args.push("-q".to_string());
        }
        args.push(request.root.to_string_lossy().into_owned());
        args
    }
}

impl SourceCompiler for CompileAll {
    fn compile_tree(&self, request: &CompileRequest<'_>) -> Result<CompileReport> {
        let python = self.python.to_string_lossy();
        let output = run_command(&python, &Self::args(request), None)?;
        if !request.quiet && !output.stdout.is_empty() {
            print!("{}", output.stdout);
        }
        Ok(CompileReport {
            success: output.success(),
            output: output.combined(),
        })
    }
}
