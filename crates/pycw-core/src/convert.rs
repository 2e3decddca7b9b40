use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pycw_python::InterpreterIdentity;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{self, Advisory, SOURCE_SUFFIX};
use crate::compile::{CompileRequest, SourceCompiler};
use crate::dist_info::ManifestRewriter;
use crate::error::{ConvertError, IoContext, Result};
use crate::fs::{ensure_owner_writable, ExtractionDir};
use crate::options::{is_excluded, ConvertOptions, ExclusionFilter, RenameMode};
use crate::tags::{dist_info_name, validate_wheel_path, TagResolver};

pub const SYMLINKS_SUPPORTED: bool = cfg!(any(unix, windows));

/// Result of a successful conversion.
#[derive(Clone, Debug)]
pub struct Conversion {
    /// Where the converted wheel now lives.
    pub wheel: PathBuf,
    pub backup: Option<PathBuf>,
    pub advisories: Vec<Advisory>,
}

/// Replaces the python sources of wheels with bytecode.
#[derive(Debug)]
pub struct WheelConverter<C> {
    compiler: C,
    tags: TagResolver,
    scratch: Option<PathBuf>,
    symlinks: bool,
}

impl<C: SourceCompiler> WheelConverter<C> {
    #[must_use]
    pub fn new(compiler: C, identity: InterpreterIdentity) -> Self {
        Self {
            compiler,
            tags: TagResolver::new(identity),
            scratch: None,
            symlinks: SYMLINKS_SUPPORTED,
        }
    }

    /// Extract wheels below `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = Some(dir.into());
        self
    }

    #[must_use]
    pub fn tags(&self) -> &TagResolver {
        &self.tags
    }

    /// Converts `wheel` in place, or under its renamed filename.
    ///
    /// The original file is only replaced after the new archive has been
    /// fully written; the extraction directory is removed on every path.
    ///
    /// # Errors
    /// See [`ConvertError`]; input validation failures happen before any I/O.
    pub fn convert(&self, wheel: &Path, options: &ConvertOptions) -> Result<Conversion> {
        validate_wheel_path(wheel)?;
        if options.rename == RenameMode::Symlink && !self.symlinks {
            return Err(ConvertError::UnsupportedOperation(
                "symlinks are not supported on this platform".to_string(),
            ));
        }
        let dist_info = dist_info_name(wheel)?;
        let exclude = options.exclude.as_ref();

        let workdir = ExtractionDir::new(self.scratch.as_deref()).io_context(
            "failed to create extraction dir in",
            &self.scratch.clone().unwrap_or_else(std::env::temp_dir),
        )?;
        let root = workdir.path();
        debug!(wheel = %wheel.display(), root = %root.display(), "extracting wheel");
        let retained = archive::extract(wheel, root)?;

        self.compile(wheel, root, &dist_info, options)?;
        purge_sources(root, exclude, options.quiet)?;

        let advisories = archive::restore_metadata(root, &retained);
        for advisory in &advisories {
            warn!("{advisory}");
        }

        let dist_info_dir = root.join(format!("{dist_info}.dist-info"));
        let tag = ManifestRewriter::new(self.tags.clone()).rewrite(&dist_info_dir, exclude)?;
        debug!(%tag, "rewrote dist-info");

        let (converted, backup) = self.commit(wheel, root, options)?;
        info!(wheel = %converted.display(), "converted wheel");
        Ok(Conversion {
            wheel: converted,
            backup,
            advisories,
        })
    }

    fn compile(
        &self,
        wheel: &Path,
        root: &Path,
        dist_info: &str,
        options: &ConvertOptions,
    ) -> Result<()> {
        let request = CompileRequest {
            root,
            origin: format!("<{dist_info}>"),
            exclude: options.exclude.as_ref().map(ExclusionFilter::pattern),
            optimize: options.optimize,
            force: true,
            legacy: true,
            quiet: options.quiet,
        };
        let report = self
            .compiler
            .compile_tree(&request)
            .map_err(ConvertError::Compiler)?;
        if report.success {
            return Ok(());
        }
        debug!(output = %report.output, "compiler output");
        Err(ConvertError::CompilationFailed {
            wheel: wheel
                .file_name()
                .map_or_else(|| wheel.display().to_string(), |n| n.to_string_lossy().into_owned()),
            output: report.output,
        })
    }

    /// Packs `root` next to `wheel`, then moves it into place.
    fn commit(
        &self,
        wheel: &Path,
        root: &Path,
        options: &ConvertOptions,
    ) -> Result<(PathBuf, Option<PathBuf>)> {
        let destination = if options.rename.is_enabled() {
            self.tags.renamed_path(wheel)?
        } else {
            wheel.to_path_buf()
        };
        let parent = match wheel.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut staged = NamedTempFile::new_in(parent).io_context("failed to stage in", parent)?;
        archive::pack(root, staged.as_file_mut(), wheel)?;
        staged
            .as_file_mut()
            .flush()
            .io_context("failed to write", staged.path())?;
        let perms = fs::metadata(wheel)
            .io_context("failed to stat", wheel)?
            .permissions();
        fs::set_permissions(staged.path(), perms).io_context("failed to chmod", staged.path())?;

        let backup = if options.with_backup {
            let backup = backup_path(wheel);
            fs::rename(wheel, &backup).io_context("failed to back up", wheel)?;
            debug!(backup = %backup.display(), "kept original wheel");
            Some(backup)
        } else {
            None
        };

        if let Err(err) = staged.persist(&destination) {
            if let Some(backup) = &backup {
                if let Err(restore) = fs::rename(backup, wheel) {
                    warn!(
                        backup = %backup.display(),
                        error = %restore,
                        "could not move backup back to the original wheel"
                    );
                }
            }
            return Err(err.error).io_context("failed to write", &destination);
        }

        if destination != wheel {
            match fs::remove_file(wheel) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err).io_context("failed to remove", wheel),
            }
            if options.rename == RenameMode::Symlink {
                link_to_sibling(wheel, &destination)?;
            }
            if !options.quiet {
                println!(
                    "Renamed wheel: {} -> {}",
                    wheel.display(),
                    destination.display()
                );
            }
        }
        Ok((destination, backup))
    }
}

/// `<wheel>.bak`, keeping the `.whl` suffix in front.
#[must_use]
pub fn backup_path(wheel: &Path) -> PathBuf {
    let mut name = wheel.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Deletes every source file below `root` that the filter does not match.
fn purge_sources(root: &Path, exclude: Option<&ExclusionFilter>, quiet: bool) -> Result<usize> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|err| ConvertError::Io {
            action: "failed to walk",
            path: err.path().unwrap_or(root).to_path_buf(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let is_source = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(SOURCE_SUFFIX));
        if is_source && !is_excluded(exclude, &path.to_string_lossy()) {
            sources.push(path);
        }
    }

    for path in &sources {
        if !quiet {
            println!("Deleting py file: {}", path.display());
        }
        ensure_owner_writable(path).io_context("failed to unlock", path)?;
        fs::remove_file(path).io_context("failed to remove", path)?;
    }
    debug!(removed = sources.len(), "purged python sources");
    Ok(sources.len())
}

fn link_to_sibling(link: &Path, target: &Path) -> Result<()> {
    // Both live in the same directory, so a bare filename keeps the link relocatable.
    let target = target.file_name().map_or(target, Path::new);
    create_symlink(target, link).io_context("failed to symlink", link)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io::Read;

    use super::*;
    use crate::archive::tests::{member_names, write_wheel};
    use crate::compile::CompileReport;
    use crate::record::record_hash;
    use pycw_python::Implementation;
    use zip::ZipArchive;

    const WHEEL_NAME: &str = "pkg-1.0.0-py3-none-any.whl";
    const WHEEL_BODY: &[u8] =
        b"Wheel-Version: 1.0\nGenerator: bdist_wheel (0.41.2)\nRoot-Is-Purelib: true\nTag: py3-none-any\n";

    /// Writes `compiled:<source>` next to each source the filter does not match.
    #[derive(Default)]
    struct FakeCompiler {
        calls: Cell<usize>,
        fail: bool,
        skip: Option<&'static str>,
    }

    impl SourceCompiler for FakeCompiler {
        fn compile_tree(&self, request: &CompileRequest<'_>) -> anyhow::Result<CompileReport> {
            self.calls.set(self.calls.get() + 1);
            assert!(request.force && request.legacy);
            assert_eq!(request.origin, "<pkg-1.0.0>");
            if self.fail {
                return Ok(CompileReport {
                    success: false,
                    output: "SyntaxError".to_string(),
                });
            }
            let exclude = request.exclude.map(|p| regex::Regex::new(p).expect("regex"));
            for entry in WalkDir::new(request.root) {
                let path = entry?.into_path();
                let text = path.to_string_lossy().into_owned();
                if !text.ends_with(".py") || self.skip.is_some_and(|s| text.ends_with(s)) {
                    continue;
                }
                if exclude.as_ref().is_some_and(|re| re.is_match(&text)) {
                    continue;
                }
                let source = fs::read(&path)?;
                let mut compiled = b"compiled:".to_vec();
                compiled.extend(source);
                fs::write(format!("{text}c"), compiled)?;
            }
            Ok(CompileReport {
                success: true,
                output: String::new(),
            })
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        dir: PathBuf,
        scratch: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().expect("tempdir");
            let dir = tmp.path().join("dist");
            let scratch = tmp.path().join("scratch");
            fs::create_dir_all(&dir).expect("mkdir");
            fs::create_dir_all(&scratch).expect("mkdir");
            Self {
                _tmp: tmp,
                dir,
                scratch,
            }
        }

        fn wheel(&self, wheel_body: &[u8]) -> PathBuf {
            let path = self.dir.join(WHEEL_NAME);
            let record = format!(
                "pkg/__init__.py,{},0\npkg/mod.py,{},11\npkg/data.txt,{},4\n\
                 pkg-1.0.0.dist-info/WHEEL,sha256=w,1\npkg-1.0.0.dist-info/RECORD,,\n",
                record_hash(b""),
                record_hash(b"VALUE = 42\n"),
                record_hash(b"data"),
            );
            write_wheel(
                &path,
                &[
                    ("pkg/", b"", 0o755),
                    ("pkg/__init__.py", b"", 0o644),
                    ("pkg/mod.py", b"VALUE = 42\n", 0o644),
                    ("pkg/data.txt", b"data", 0o640),
                    ("pkg-1.0.0.dist-info/", b"", 0o755),
                    ("pkg-1.0.0.dist-info/WHEEL", wheel_body, 0o644),
                    ("pkg-1.0.0.dist-info/RECORD", record.as_bytes(), 0o444),
                ],
            );
            path
        }

        fn converter(&self, compiler: FakeCompiler) -> WheelConverter<FakeCompiler> {
            WheelConverter::new(
                compiler,
                InterpreterIdentity::new(Implementation::CPython, 3, 11),
            )
            .with_scratch_dir(&self.scratch)
        }

        fn scratch_is_empty(&self) -> bool {
            fs::read_dir(&self.scratch)
                .expect("read scratch")
                .next()
                .is_none()
        }
    }

    fn quiet() -> ConvertOptions {
        ConvertOptions {
            quiet: true,
            ..ConvertOptions::default()
        }
    }

    fn read_member(wheel: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(fs::File::open(wheel).expect("open")).expect("zip");
        let mut contents = String::new();
        archive
            .by_name(name)
            .expect("member")
            .read_to_string(&mut contents)
            .expect("read");
        contents
    }

    #[test]
    fn converts_sources_to_bytecode_in_place() -> Result<()> {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let conversion = fixture.converter(FakeCompiler::default()).convert(&wheel, &quiet())?;

        assert_eq!(conversion.wheel, wheel);
        assert!(conversion.backup.is_none());
        let names = member_names(&wheel);
        assert!(!names.iter().any(|n| n.ends_with(".py")), "{names:?}");
        assert!(names.contains(&"pkg/mod.pyc".to_string()));
        assert!(names.contains(&"pkg/data.txt".to_string()));

        let record = read_member(&wheel, "pkg-1.0.0.dist-info/RECORD");
        assert!(!record.lines().any(|l| l.split(',').next().is_some_and(|p| p.ends_with(".py"))));
        let compiled = b"compiled:VALUE = 42\n";
        let mod_rows: Vec<_> = record.lines().filter(|l| l.starts_with("pkg/mod.pyc,")).collect();
        assert_eq!(
            mod_rows,
            vec![format!("pkg/mod.pyc,{},{}", record_hash(compiled), compiled.len())]
        );

        let wheel_meta = read_member(&wheel, "pkg-1.0.0.dist-info/WHEEL");
        assert!(wheel_meta.contains("Tag: cp311-none-any\n"), "{wheel_meta}");
        assert!(fixture.scratch_is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn stored_modes_survive_conversion() -> Result<()> {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        fixture.converter(FakeCompiler::default()).convert(&wheel, &quiet())?;

        let mut archive = ZipArchive::new(fs::File::open(&wheel).expect("open")).expect("zip");
        let data = archive.by_name("pkg/data.txt").expect("member");
        assert_eq!(data.unix_mode().map(|m| m & 0o777), Some(0o640));
        Ok(())
    }

    #[test]
    fn excluding_everything_keeps_sources() -> Result<()> {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let options = ConvertOptions {
            exclude: Some(ExclusionFilter::new(".")?),
            ..quiet()
        };
        let compiler = FakeCompiler::default();
        let converter = fixture.converter(compiler);
        converter.convert(&wheel, &options)?;

        assert_eq!(converter.compiler.calls.get(), 1);
        let names = member_names(&wheel);
        assert!(names.contains(&"pkg/mod.py".to_string()));
        assert!(names.contains(&"pkg/__init__.py".to_string()));
        assert!(!names.iter().any(|n| n.ends_with(".pyc")));
        let record = read_member(&wheel, "pkg-1.0.0.dist-info/RECORD");
        assert!(record.contains(&format!("pkg/mod.py,{},11\n", record_hash(b"VALUE = 42\n"))));
        Ok(())
    }

    #[test]
    fn rename_moves_wheel_to_interpreter_tag() -> Result<()> {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let options = ConvertOptions {
            rename: RenameMode::Rename,
            ..quiet()
        };
        let conversion = fixture.converter(FakeCompiler::default()).convert(&wheel, &options)?;

        assert_eq!(conversion.wheel, fixture.dir.join("pkg-1.0.0-cp311-none-any.whl"));
        assert!(conversion.wheel.is_file());
        assert!(!wheel.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_mode_leaves_link_at_original_name() -> Result<()> {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let options = ConvertOptions {
            rename: RenameMode::Symlink,
            ..quiet()
        };
        let conversion = fixture.converter(FakeCompiler::default()).convert(&wheel, &options)?;

        let meta = fs::symlink_metadata(&wheel).expect("stat link");
        assert!(meta.file_type().is_symlink());
        assert_eq!(
            fs::canonicalize(&wheel).expect("resolve"),
            fs::canonicalize(&conversion.wheel).expect("resolve")
        );
        Ok(())
    }

    #[test]
    fn backup_keeps_original_bytes() -> Result<()> {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let original = fs::read(&wheel).expect("read");
        let options = ConvertOptions {
            with_backup: true,
            ..quiet()
        };
        let conversion = fixture.converter(FakeCompiler::default()).convert(&wheel, &options)?;

        let backup = fixture.dir.join("pkg-1.0.0-py3-none-any.whl.bak");
        assert_eq!(conversion.backup.as_deref(), Some(backup.as_path()));
        assert_eq!(fs::read(&backup).expect("read backup"), original);
        assert_ne!(fs::read(&wheel).expect("read wheel"), original);
        Ok(())
    }

    #[test]
    fn wrong_suffix_fails_before_extraction() {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let zip = wheel.with_extension("zip");
        fs::rename(&wheel, &zip).expect("rename");

        let converter = fixture.converter(FakeCompiler::default());
        let err = converter.convert(&zip, &quiet()).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput { .. }), "{err}");
        assert_eq!(converter.compiler.calls.get(), 0);
        assert!(fixture.scratch_is_empty());
    }

    #[test]
    fn compilation_failure_cleans_up_and_keeps_original() {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let original = fs::read(&wheel).expect("read");
        let compiler = FakeCompiler {
            fail: true,
            ..FakeCompiler::default()
        };
        let err = fixture.converter(compiler).convert(&wheel, &quiet()).unwrap_err();

        assert!(
            matches!(&err, ConvertError::CompilationFailed { wheel, .. } if wheel == WHEEL_NAME),
            "{err}"
        );
        assert!(fixture.scratch_is_empty());
        assert_eq!(fs::read(&wheel).expect("read"), original);
    }

    #[test]
    fn missing_tags_fail_without_touching_wheel() {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(b"Wheel-Version: 1.0\nRoot-Is-Purelib: true\n");
        let original = fs::read(&wheel).expect("read");
        let err = fixture
            .converter(FakeCompiler::default())
            .convert(&wheel, &quiet())
            .unwrap_err();

        assert!(matches!(err, ConvertError::NoTagsFound { .. }), "{err}");
        assert!(fixture.scratch_is_empty());
        assert_eq!(fs::read(&wheel).expect("read"), original);
        let leftovers: Vec<_> = fs::read_dir(&fixture.dir)
            .expect("read dist")
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "{leftovers:?}");
    }

    #[test]
    fn skipped_source_is_a_missing_artifact() {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let compiler = FakeCompiler {
            skip: Some("mod.py"),
            ..FakeCompiler::default()
        };
        let err = fixture.converter(compiler).convert(&wheel, &quiet()).unwrap_err();
        assert!(matches!(err, ConvertError::MissingArtifact { .. }), "{err}");
        assert!(fixture.scratch_is_empty());
    }

    #[test]
    fn symlink_request_is_validated_eagerly() {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let original = fs::read(&wheel).expect("read");
        let options = ConvertOptions {
            rename: RenameMode::Symlink,
            ..quiet()
        };
        let mut converter = fixture.converter(FakeCompiler::default());
        converter.symlinks = false;
        let err = converter.convert(&wheel, &options).unwrap_err();

        assert!(matches!(err, ConvertError::UnsupportedOperation(_)), "{err}");
        assert_eq!(converter.compiler.calls.get(), 0);
        assert!(fixture.scratch_is_empty());
        assert_eq!(fs::read(&wheel).expect("read"), original);
    }

    #[test]
    fn failed_commit_restores_backed_up_wheel() {
        let fixture = Fixture::new();
        let wheel = fixture.wheel(WHEEL_BODY);
        let original = fs::read(&wheel).expect("read");
        let occupied = fixture.dir.join("pkg-1.0.0-cp311-none-any.whl");
        fs::create_dir_all(occupied.join("occupied")).expect("mkdir");
        fs::write(occupied.join("occupied/f"), b"x").expect("write");
        let options = ConvertOptions {
            rename: RenameMode::Rename,
            with_backup: true,
            ..quiet()
        };
        let err = fixture
            .converter(FakeCompiler::default())
            .convert(&wheel, &options)
            .unwrap_err();

        assert!(matches!(err, ConvertError::Io { .. }), "{err}");
        assert_eq!(fs::read(&wheel).expect("read"), original);
        assert!(!backup_path(&wheel).exists());
        assert!(occupied.join("occupied/f").is_file());
        assert!(fixture.scratch_is_empty());
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("dist/a-1-py3-none-any.whl")),
            PathBuf::from("dist/a-1-py3-none-any.whl.bak")
        );
    }

    #[test]
    fn purge_honours_exclusion() -> Result<()> {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("pkg/vendored")).expect("mkdir");
        fs::write(tmp.path().join("pkg/a.py"), b"").expect("write");
        fs::write(tmp.path().join("pkg/vendored/b.py"), b"").expect("write");
        fs::write(tmp.path().join("pkg/c.pyi"), b"").expect("write");

        let filter = ExclusionFilter::new("vendored")?;
        let removed = purge_sources(tmp.path(), Some(&filter), true)?;
        assert_eq!(removed, 1);
        assert!(!tmp.path().join("pkg/a.py").exists());
        assert!(tmp.path().join("pkg/vendored/b.py").exists());
        assert!(tmp.path().join("pkg/c.pyi").exists());
        Ok(())
    }
}
