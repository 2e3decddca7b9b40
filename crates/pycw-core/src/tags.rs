use std::path::{Path, PathBuf};

use pycw_python::InterpreterIdentity;

use crate::error::{ConvertError, Result};

pub const WHEEL_EXTENSION: &str = "whl";

/// Derives python tags and wheel filenames for one interpreter.
#[derive(Clone, Debug)]
pub struct TagResolver {
    identity: InterpreterIdentity,
}

impl TagResolver {
    #[must_use]
    pub fn new(identity: InterpreterIdentity) -> Self {
        Self { identity }
    }

    #[must_use]
    pub fn identity(&self) -> &InterpreterIdentity {
        &self.identity
    }

    /// The implementation- and version-specific python tag, e.g. `cp311`.
    ///
    /// # Errors
    /// Returns [`ConvertError::UnsupportedInterpreter`] for families other than
    /// CPython and PyPy.
    pub fn compatibility_tag(&self) -> Result<String> {
        self.identity
            .specific_tag()
            .ok_or_else(|| ConvertError::UnsupportedInterpreter {
                implementation: self.identity.implementation.to_string(),
            })
    }

    /// Replaces the python tag in `wheel`'s filename with [`Self::compatibility_tag`].
    ///
    /// # Errors
    /// Returns an error when the filename lacks the version and tag fields, or
    /// when the interpreter is unsupported.
    pub fn renamed_path(&self, wheel: &Path) -> Result<PathBuf> {
        let name = file_name(wheel)?;
        let tag = self.compatibility_tag()?;
        // {name}-{version}(-{build})?-{python}-{abi}-{platform}.whl
        let mut fields: Vec<&str> = name.split('-').collect();
        if fields.len() < 5 {
            return Err(ConvertError::invalid_input(
                wheel,
                "wheel filename must look like {name}-{version}-{python tag}-{abi tag}-{platform tag}.whl",
            ));
        }
        let index = fields.len() - 3;
        fields[index] = &tag;
        let renamed = PathBuf::from(fields.join("-")).with_extension(WHEEL_EXTENSION);
        Ok(wheel.with_file_name(renamed))
    }
}

/// Rejects paths that cannot name a wheel, before anything touches the disk.
pub(crate) fn validate_wheel_path(wheel: &Path) -> Result<()> {
    let has_extension = wheel
        .extension()
        .is_some_and(|ext| ext == WHEEL_EXTENSION);
    if !has_extension {
        return Err(ConvertError::invalid_input(
            wheel,
            "file to convert must be a *.whl",
        ));
    }
    dist_info_name(wheel).map(|_| ())
}

/// `{name}-{version}` part of a wheel filename, which names its `.dist-info` directory.
///
/// # Errors
/// Returns [`ConvertError::InvalidInput`] when the stem has fewer than five
/// hyphen-delimited fields.
pub fn dist_info_name(wheel: &Path) -> Result<String> {
    let stem = wheel
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| ConvertError::invalid_input(wheel, "wheel filename is not valid UTF-8"))?;
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() < 5 {
        return Err(ConvertError::invalid_input(
            wheel,
            "wheel filename must look like {name}-{version}-{python tag}-{abi tag}-{platform tag}.whl",
        ));
    }
    Ok(parts[..parts.len() - 3].join("-"))
}

fn file_name(wheel: &Path) -> Result<&str> {
    wheel
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ConvertError::invalid_input(wheel, "wheel filename is not valid UTF-8"))
}
