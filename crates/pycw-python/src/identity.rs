use std::fmt;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::run_command;

const IDENTITY_SCRIPT: &str = r#"import json, sys
print(json.dumps({
    "implementation": getattr(sys.implementation, "name", "cpython"),
    "major": sys.version_info[0],
    "minor": sys.version_info[1],
}))
"#;

/// Implementation family of a Python interpreter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Implementation {
    CPython,
    PyPy,
    Other(String),
}

impl Implementation {
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "cpython" => Self::CPython,
            "pypy" => Self::PyPy,
            _ => Self::Other(name.to_string()),
        }
    }

    /// Two-letter abbreviation used in python tags, when the family has one.
    #[must_use]
    pub fn abbreviation(&self) -> Option<&'static str> {
        match self {
            Self::CPython => Some("cp"),
            Self::PyPy => Some("pp"),
            Self::Other(_) => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::CPython => "cpython",
            Self::PyPy => "pypy",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Facts about the interpreter that produces the bytecode.
///
/// The pyc magic number changes between minor releases, so the minor version
/// is part of every tag derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterpreterIdentity {
    pub implementation: Implementation,
    pub major: u32,
    pub minor: u32,
}

impl InterpreterIdentity {
    #[must_use]
    pub fn new(implementation: Implementation, major: u32, minor: u32) -> Self {
        Self {
            implementation,
            major,
            minor,
        }
    }

    /// The version-generic python tag, e.g. `py3`.
    #[must_use]
    pub fn generic_tag(&self) -> String {
        format!("py{}", self.major)
    }

    /// The interpreter's own python tag (`cp311`, `pp310`), if its family is known.
    #[must_use]
    pub fn specific_tag(&self) -> Option<String> {
        self.implementation
            .abbreviation()
            .map(|abbrev| format!("{abbrev}{}{}", self.major, self.minor))
    }
}

impl fmt::Display for InterpreterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.implementation, self.major, self.minor)
    }
}

#[derive(Deserialize)]
struct IdentityPayload {
    implementation: String,
    major: u32,
    minor: u32,
}

/// Probes the implementation and version of the given interpreter.
///
/// # Errors
///
/// Returns an error when the interpreter cannot be invoked or the payload is
/// malformed.
pub fn probe_identity(python: &str) -> Result<InterpreterIdentity> {
    let args = vec!["-c".to_string(), IDENTITY_SCRIPT.to_string()];
    let output = run_command(python, &args, None)
        .with_context(|| format!("failed to probe interpreter identity via {python}"))?;
    if !output.success() {
        bail!("python identity probe failed: {}", output.stderr.trim());
    }
    parse_identity(&output.stdout)
}

fn parse_identity(stdout: &str) -> Result<InterpreterIdentity> {
    let payload: IdentityPayload =
        serde_json::from_str(stdout.trim()).context("invalid interpreter identity payload")?;
    Ok(InterpreterIdentity::new(
        Implementation::parse(&payload.implementation),
        payload.major,
        payload.minor,
    ))
}
