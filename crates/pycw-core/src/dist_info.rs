//! Rewrites `RECORD` and `WHEEL` of an extracted wheel after compilation.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConvertError, IoContext, Result};
use crate::fs::ensure_owner_writable;
use crate::options::{is_excluded, ExclusionFilter};
use crate::record::{format_record, parse_record, RecordRow};
use crate::tags::TagResolver;

pub const RECORD_FILE: &str = "RECORD";
pub const WHEEL_FILE: &str = "WHEEL";
const TAG_PREFIX: &str = "Tag: ";

/// Points the manifest and tag metadata of a wheel at its compiled modules.
#[derive(Clone, Debug)]
pub struct ManifestRewriter {
    tags: TagResolver,
}

impl ManifestRewriter {
    #[must_use]
    pub fn new(tags: TagResolver) -> Self {
        Self { tags }
    }

    /// Rewrites `RECORD` and then `WHEEL` inside `dist_info`, returning the resolved tag.
    ///
    /// Files are looked up relative to the parent of `dist_info`, which is the
    /// root of the extracted wheel.
    ///
    /// # Errors
    /// Fails when a compiled artifact listed in place of a source is missing,
    /// when `WHEEL` carries no usable tag, or on I/O failures.
    pub fn rewrite(&self, dist_info: &Path, exclude: Option<&ExclusionFilter>) -> Result<String> {
        let root = wheel_root(dist_info)?;
        self.rewrite_record(&root, &dist_info.join(RECORD_FILE), exclude)?;
        self.rewrite_wheel_tags(dist_info)
    }

    fn rewrite_record(
        &self,
        root: &Path,
        record_path: &Path,
        exclude: Option<&ExclusionFilter>,
    ) -> Result<()> {
        ensure_owner_writable(record_path).io_context("failed to unlock", record_path)?;
        let text = fs::read_to_string(record_path).io_context("failed to read", record_path)?;

        let mut rows = BTreeSet::new();
        for row in parse_record(&text, record_path)? {
            let row = if row.path.ends_with(".py") && !is_excluded(exclude, &row.path) {
                compiled_row(root, &row.path)?
            } else {
                row
            };
            rows.insert(row);
        }

        debug!(rows = rows.len(), path = %record_path.display(), "writing RECORD");
        fs::write(record_path, format_record(&rows)).io_context("failed to write", record_path)
    }

    fn rewrite_wheel_tags(&self, dist_info: &Path) -> Result<String> {
        let wheel_path = dist_info.join(WHEEL_FILE);
        ensure_owner_writable(&wheel_path).io_context("failed to unlock", &wheel_path)?;
        let text = fs::read_to_string(&wheel_path).io_context("failed to read", &wheel_path)?;

        let tags = collect_tags(&text);
        if tags.is_empty() {
            return Err(ConvertError::NoTagsFound {
                location: metadata_location(dist_info),
            });
        }
        let resolved = self.resolve_tag(&tags)?;
        debug!(tag = %resolved, "resolved wheel tag");

        fs::write(&wheel_path, replace_tag_lines(&text, &resolved))
            .io_context("failed to write", &wheel_path)?;
        Ok(resolved)
    }

    /// First tag whose python tag is `py{major}` or the interpreter's own tag,
    /// with its python tag swapped for the compatibility tag.
    fn resolve_tag(&self, tags: &[String]) -> Result<String> {
        let identity = self.tags.identity();
        let generic = identity.generic_tag();
        let own = identity.specific_tag();

        for tag in tags {
            let (python_tag, rest) = match tag.split_once('-') {
                Some((python_tag, rest)) => (python_tag, Some(rest)),
                None => (tag.as_str(), None),
            };
            if python_tag == generic || own.as_deref() == Some(python_tag) {
                let compat = self.tags.compatibility_tag()?;
                return Ok(match rest {
                    Some(rest) => format!("{compat}-{rest}"),
                    None => compat,
                });
            }
        }

        Err(ConvertError::NoCompatibleTag {
            tags: tags.to_vec(),
            interpreter: identity.to_string(),
        })
    }
}

fn wheel_root(dist_info: &Path) -> Result<PathBuf> {
    let resolved = dist_info
        .canonicalize()
        .io_context("failed to resolve", dist_info)?;
    resolved
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| ConvertError::invalid_input(dist_info, "dist-info directory has no parent"))
}

fn compiled_row(root: &Path, source: &str) -> Result<RecordRow> {
    let compiled = format!("{source}c");
    let artifact = root.join(&compiled);
    let data = match fs::read(&artifact) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::MissingArtifact { path: artifact });
        }
        Err(err) => return Err(err).io_context("failed to read", &artifact),
    };
    Ok(RecordRow::for_bytes(compiled, &data))
}

fn collect_tags(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.starts_with(TAG_PREFIX))
        .filter_map(|line| line.split(' ').nth(1))
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn replace_tag_lines(text: &str, tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.starts_with(TAG_PREFIX) {
            out.push_str(TAG_PREFIX);
            out.push_str(tag);
            let body = line.trim_end_matches(['\r', '\n']);
            out.push_str(&line[body.len()..]);
        } else {
            out.push_str(line);
        }
    }
    out
}

fn metadata_location(dist_info: &Path) -> String {
    let name = dist_info
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{name}/{WHEEL_FILE}")
}
