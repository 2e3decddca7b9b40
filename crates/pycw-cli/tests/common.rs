#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    process::{Command, Stdio},
};

use zip::{write::FileOptions, ZipArchive, ZipWriter};

pub const WHEEL_NAME: &str = "pkg-1.0.0-py3-none-any.whl";

pub fn find_python() -> Option<String> {
    let candidates = [
        std::env::var("PYTHON").ok(),
        Some("python3".to_string()),
        Some("python".to_string()),
    ];
    for candidate in candidates.into_iter().flatten() {
        let status = Command::new(&candidate)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if matches!(status, Ok(code) if code.success()) {
            return Some(candidate);
        }
    }
    None
}

/// `cp311`-style tag of the given interpreter.
pub fn python_tag(python: &str) -> String {
    let output = Command::new(python)
        .arg("-c")
        .arg(
            "import sys; n = sys.implementation.name; \
             print({'cpython': 'cp', 'pypy': 'pp'}[n] + f'{sys.version_info[0]}{sys.version_info[1]}')",
        )
        .output()
        .expect("probe python");
    String::from_utf8(output.stdout)
        .expect("utf8")
        .trim()
        .to_string()
}

pub fn write_sample_wheel(path: &Path) {
    let members: [(&str, &[u8]); 4] = [
        ("pkg/__init__.py", b""),
        ("pkg/mod.py", b"VALUE = 42\n"),
        (
            "pkg-1.0.0.dist-info/WHEEL",
            b"Wheel-Version: 1.0\nGenerator: bdist_wheel (0.41.2)\nRoot-Is-Purelib: true\nTag: py3-none-any\n",
        ),
        (
            "pkg-1.0.0.dist-info/RECORD",
            b"pkg/__init__.py,sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU,0\n\
pkg/mod.py,sha256=unused,11\n\
pkg-1.0.0.dist-info/WHEEL,sha256=unused,98\n\
pkg-1.0.0.dist-info/RECORD,,\n",
        ),
    ];
    let file = File::create(path).expect("create wheel");
    let mut writer = ZipWriter::new(file);
    for (name, contents) in members {
        writer
            .start_file(name, FileOptions::default())
            .expect("start member");
        writer.write_all(contents).expect("write member");
    }
    writer.finish().expect("finish wheel");
}

pub fn member_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).expect("open wheel")).expect("zip");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("member").name().to_string())
        .collect()
}

pub fn read_member(path: &Path, name: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).expect("open wheel")).expect("zip");
    let mut contents = String::new();
    archive
        .by_name(name)
        .expect("member")
        .read_to_string(&mut contents)
        .expect("read member");
    contents
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .expect("read dir")
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
