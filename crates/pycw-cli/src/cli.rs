use clap::{value_parser, Parser, ValueEnum};
use pycw_core::{ConvertOptions, ExclusionFilter, OptimizeLevel, RenameMode};
use pycw_python::PYTHON_ENV;

#[derive(Parser, Debug)]
#[command(
    name = "pyc-wheel",
    author,
    version,
    about = "Compile all py files in a wheel to pyc files."
)]
#[allow(clippy::struct_excessive_bools)]
pub struct PycWheelCli {
    #[arg(
        value_name = "WHEEL",
        help = "Path (can contain wildcards) to whl(s) to convert"
    )]
    pub wheel: String,
    #[arg(
        long,
        value_name = "REGEX",
        help = "Skip files matching the regular expression; it is searched for in the full path of each file considered for compilation"
    )]
    pub exclude: Option<String>,
    #[arg(
        long = "with-backup",
        alias = "with_backup",
        help = "Keep the original wheel as <WHEEL>.bak"
    )]
    pub with_backup: bool,
    #[arg(long, help = "Rename the wheel to the interpreter's python tag")]
    pub rename: bool,
    #[cfg(any(unix, windows))]
    #[arg(
        long,
        conflicts_with = "rename",
        help = "Rename the wheel to the interpreter's python tag and symlink the old name to the new one"
    )]
    pub symlink: bool,
    #[arg(
        long,
        default_value_t = 0,
        value_parser = value_parser!(u8).range(0..=2),
        help = "Compiler optimization level: 0 (none; __debug__ is true), 1 (asserts removed) or 2 (docstrings removed too)"
    )]
    pub optimize: u8,
    #[arg(long, help = "Do not print deleted files and other conversion notices")]
    pub quiet: bool,
    #[arg(long, value_enum, default_value_t = LogLevel::Warning, help = "Logging level")]
    pub log: LogLevel,
    #[arg(
        long,
        env = PYTHON_ENV,
        value_name = "PATH",
        help = "Interpreter that compiles the wheel (defaults to python3 on PATH)"
    )]
    pub python: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing`, which has no separate critical level.
    #[must_use]
    pub fn directive(self) -> &'static str {
        match self {
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl PycWheelCli {
    fn rename_mode(&self) -> RenameMode {
        #[cfg(any(unix, windows))]
        if self.symlink {
            return RenameMode::Symlink;
        }
        if self.rename {
            RenameMode::Rename
        } else {
            RenameMode::Off
        }
    }

    /// Options shared by every wheel matched in this run.
    ///
    /// # Errors
    /// Returns an error when the exclude pattern does not compile.
    pub fn convert_options(&self) -> pycw_core::Result<ConvertOptions> {
        let exclude = match self.exclude.as_deref() {
            Some(pattern) if !pattern.is_empty() => Some(ExclusionFilter::new(pattern)?),
            _ => None,
        };
        Ok(ConvertOptions {
            exclude,
            with_backup: self.with_backup,
            rename: self.rename_mode(),
            quiet: self.quiet,
            optimize: OptimizeLevel::try_from(self.optimize)?,
        })
    }
}
