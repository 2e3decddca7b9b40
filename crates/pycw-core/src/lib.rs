//! Rewrites Python wheels so they ship compiled bytecode instead of sources.
//!
//! A conversion extracts the wheel, compiles every module with the target
//! interpreter, drops the sources, points `RECORD` and `WHEEL` at the
//! compiled files and repacks the archive.

use std::path::{Path, PathBuf};

pub mod archive;
pub mod compile;
pub mod convert;
pub mod dist_info;
pub mod error;
mod fs;
pub mod options;
pub mod record;
pub mod tags;

pub use archive::{Advisory, AdvisoryKind, ArchiveEntry};
pub use compile::{CompileAll, CompileReport, CompileRequest, SourceCompiler};
pub use convert::{backup_path, Conversion, WheelConverter, SYMLINKS_SUPPORTED};
pub use dist_info::ManifestRewriter;
pub use error::{ConvertError, Result};
pub use options::{ConvertOptions, ExclusionFilter, OptimizeLevel, RenameMode};
pub use pycw_python::{Implementation, InterpreterIdentity};
pub use tags::{dist_info_name, TagResolver};

/// Builds a converter for the interpreter at `python`, probing its identity.
///
/// # Errors
/// Returns [`ConvertError::Interpreter`] when the interpreter cannot be probed.
pub fn converter_for(python: &str) -> Result<WheelConverter<CompileAll>> {
    let identity = pycw_python::probe_identity(python).map_err(ConvertError::Interpreter)?;
    tracing::debug!(%python, %identity, "probed interpreter");
    Ok(WheelConverter::new(CompileAll::new(python), identity))
}

/// Converts one wheel with the default interpreter and returns its final path.
///
/// # Errors
/// See [`WheelConverter::convert`]; also fails when no interpreter is found.
pub fn convert_wheel(wheel: &Path, options: &ConvertOptions) -> Result<PathBuf> {
    tags::validate_wheel_path(wheel)?;
    let python = pycw_python::detect_interpreter().map_err(ConvertError::Interpreter)?;
    let converter = converter_for(&python)?;
    converter.convert(wheel, options).map(|done| done.wheel)
}
