use std::io;
use std::path::{Path, PathBuf};

/// Failures raised while converting a wheel.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{reason}: {}", path.display())]
    InvalidInput { path: PathBuf, reason: String },
    #[error("{0}")]
    UnsupportedOperation(String),
    #[error("python implementation '{implementation}' is not supported")]
    UnsupportedInterpreter { implementation: String },
    #[error("error compiling Python sources in wheel {wheel}")]
    CompilationFailed { wheel: String, output: String },
    #[error("compiled artifact {} is missing; was its source skipped by the compiler?", path.display())]
    MissingArtifact { path: PathBuf },
    #[error("no tags present in {location}; cannot determine target wheel filename")]
    NoTagsFound { location: String },
    #[error("cannot convert wheel with tags [{}] using {interpreter}", tags.join(", "))]
    NoCompatibleTag {
        tags: Vec<String>,
        interpreter: String,
    },
    #[error("malformed RECORD row at {}:{line}: expected 3 fields, found {found}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        found: usize,
    },
    #[error("optimization level must be 0, 1 or 2 (got {0})")]
    InvalidOptimizeLevel(u8),
    #[error("invalid exclude pattern")]
    InvalidExclude(#[from] regex::Error),
    #[error("failed to run the source compiler")]
    Compiler(#[source] anyhow::Error),
    #[error("failed to locate or probe the python interpreter")]
    Interpreter(#[source] anyhow::Error),
    #[error("archive error in {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    pub(crate) fn invalid_input(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn archive(path: &Path, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Annotates I/O failures with the action and path involved.
pub(crate) trait IoContext<T> {
    fn io_context(self, action: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, action: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| ConvertError::Io {
            action,
            path: path.to_path_buf(),
            source,
        })
    }
}
