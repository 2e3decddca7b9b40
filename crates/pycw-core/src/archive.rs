//! Wheel archive extraction, packing and metadata restoration.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::debug;
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{ConvertError, IoContext, Result};

pub(crate) const SOURCE_SUFFIX: &str = ".py";

/// Archive member whose stored metadata is reapplied after compilation.
#[derive(Clone, Debug)]
pub struct ArchiveEntry {
    /// Path relative to the extraction root.
    pub path: PathBuf,
    pub is_dir: bool,
    pub modified: DateTime,
    pub unix_mode: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvisoryKind {
    Timestamp,
    Permissions,
}

/// A metadata restoration that failed without failing the conversion.
#[derive(Clone, Debug)]
pub struct Advisory {
    pub path: PathBuf,
    pub kind: AdvisoryKind,
    pub message: String,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            AdvisoryKind::Timestamp => "timestamp",
            AdvisoryKind::Permissions => "permissions",
        };
        write!(
            f,
            "could not restore {what} of {}: {}",
            self.path.display(),
            self.message
        )
    }
}

/// Extracts every member of `wheel` below `dest`.
///
/// Returns directories and non-source files, whose timestamps and modes must
/// be restored once compilation is done. Modes are not applied here, so the
/// compiler can write next to every source.
///
/// # Errors
/// Returns an error when the archive cannot be read or a member cannot be written.
pub fn extract(wheel: &Path, dest: &Path) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(wheel).io_context("failed to open", wheel)?;
    let mut archive = ZipArchive::new(file).map_err(|err| ConvertError::archive(wheel, err))?;
    let mut retained = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| ConvertError::archive(wheel, err))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            debug!(name = entry.name(), "skipping member outside the archive root");
            continue;
        };
        let target = dest.join(&relative);
        let is_dir = entry.name().ends_with('/') || entry.is_dir();
        if is_dir {
            fs::create_dir_all(&target).io_context("failed to create", &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).io_context("failed to create", parent)?;
            }
            let mut outfile = File::create(&target).io_context("failed to create", &target)?;
            io::copy(&mut entry, &mut outfile).io_context("failed to extract", &target)?;
        }
        if is_dir || !entry.name().ends_with(SOURCE_SUFFIX) {
            retained.push(ArchiveEntry {
                path: relative,
                is_dir,
                modified: entry.last_modified(),
                unix_mode: entry.unix_mode(),
            });
        }
    }
    debug!(
        members = archive.len(),
        retained = retained.len(),
        "extracted wheel"
    );
    Ok(retained)
}

/// Reapplies stored timestamps and permission bits below `root`.
///
/// Failures are collected rather than raised; some platforms reject some
/// permission patterns.
pub fn restore_metadata(root: &Path, entries: &[ArchiveEntry]) -> Vec<Advisory> {
    let mut advisories = Vec::new();
    for entry in entries {
        let path = root.join(&entry.path);
        let advise = |kind, message: String| Advisory {
            path: path.clone(),
            kind,
            message,
        };

        match zip_time_to_unix(entry.modified) {
            Some(secs) => {
                let stamp = FileTime::from_unix_time(secs, 0);
                if let Err(err) = filetime::set_file_times(&path, stamp, stamp) {
                    advisories.push(advise(AdvisoryKind::Timestamp, err.to_string()));
                }
            }
            None => advisories.push(advise(
                AdvisoryKind::Timestamp,
                "stored timestamp is not a valid date".to_string(),
            )),
        }

        if let Some(mode) = entry.unix_mode.map(|mode| mode & 0o777) {
            if mode != 0 {
                if let Err(err) = set_mode(&path, mode) {
                    advisories.push(advise(AdvisoryKind::Permissions, err.to_string()));
                }
            }
        }
    }
    advisories
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}

/// Writes the tree below `root` into a deflated zip, members in path order.
///
/// `archive` only labels errors.
///
/// # Errors
/// Returns an error when the tree cannot be walked or the archive cannot be written.
pub fn pack<W: Write + Seek>(root: &Path, writer: W, archive: &Path) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let base = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            ConvertError::Io {
                action: "failed to walk",
                path,
                source: err.into(),
            }
        })?;
        let path = entry.path();
        let name = archive_name(root, path);
        let meta = fs::metadata(path).io_context("failed to stat", path)?;
        let options = member_options(base, &meta);

        if meta.is_dir() {
            zip.add_directory(format!("{name}/"), options)
                .map_err(|err| ConvertError::archive(archive, err))?;
        } else {
            zip.start_file(name, options)
                .map_err(|err| ConvertError::archive(archive, err))?;
            let mut file = File::open(path).io_context("failed to open", path)?;
            io::copy(&mut file, &mut zip).io_context("failed to pack", path)?;
        }
    }

    zip.finish().map_err(|err| ConvertError::archive(archive, err))
}

fn member_options(base: FileOptions, meta: &fs::Metadata) -> FileOptions {
    let mut options = base;
    if let Ok(modified) = meta.modified() {
        options = options.last_modified_time(system_time_to_zip(modified));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(meta.permissions().mode());
    }
    options
}

fn archive_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// Zip timestamps carry no zone; they are read and written as UTC.
fn zip_time_to_unix(stamp: DateTime) -> Option<i64> {
    let month = Month::try_from(stamp.month()).ok()?;
    let date = Date::from_calendar_date(i32::from(stamp.year()), month, stamp.day()).ok()?;
    let time = Time::from_hms(stamp.hour(), stamp.minute(), stamp.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

fn system_time_to_zip(stamp: SystemTime) -> DateTime {
    let stamp = OffsetDateTime::from(stamp);
    u16::try_from(stamp.year())
        .ok()
        .and_then(|year| {
            DateTime::from_date_and_time(
                year,
                u8::from(stamp.month()),
                stamp.day(),
                stamp.hour(),
                stamp.minute(),
                stamp.second(),
            )
            .ok()
        })
        .unwrap_or_default()
}
