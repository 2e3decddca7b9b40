use std::fmt;

use regex::Regex;

use crate::error::{ConvertError, Result};

/// Regex searched for in full file paths; matching files keep their sources.
#[derive(Clone, Debug)]
pub struct ExclusionFilter {
    pattern: String,
    regex: Regex,
}

impl ExclusionFilter {
    /// Compiles `pattern` into a filter.
    ///
    /// # Errors
    /// Returns [`ConvertError::InvalidExclude`] when the pattern is not a valid regex.
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

pub(crate) fn is_excluded(filter: Option<&ExclusionFilter>, path: &str) -> bool {
    filter.is_some_and(|filter| filter.matches(path))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenameMode {
    #[default]
    Off,
    /// Move the converted wheel to a filename carrying the interpreter tag.
    Rename,
    /// As `Rename`, leaving a symlink at the original filename.
    Symlink,
}

impl RenameMode {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Bytecode optimization level handed to the compiler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptimizeLevel {
    #[default]
    O0,
    /// Asserts removed, `__debug__` is false.
    O1,
    /// As `O1`, docstrings removed too.
    O2,
}

impl OptimizeLevel {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::O0 => 0,
            Self::O1 => 1,
            Self::O2 => 2,
        }
    }
}

impl TryFrom<u8> for OptimizeLevel {
    type Error = ConvertError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::O0),
            1 => Ok(Self::O1),
            2 => Ok(Self::O2),
            other => Err(ConvertError::InvalidOptimizeLevel(other)),
        }
    }
}

impl fmt::Display for OptimizeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConvertOptions {
    pub exclude: Option<ExclusionFilter>,
    pub with_backup: bool,
    pub rename: RenameMode,
    pub quiet: bool,
    pub optimize: OptimizeLevel,
}
