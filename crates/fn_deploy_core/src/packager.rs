//! Reproducible zip packaging of a build output directory.
//!
//! Two runs over an unchanged tree must produce byte-identical archives:
//! entries are written in byte-wise order of their relative path, every
//! timestamp is pinned to the zip epoch and permissions are fixed.

use std::fs;
use std::io::{Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{DeployError, Result};

pub const ENTRY_PERMISSIONS: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKind {
    File,
    Symlink { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArchiveEntry {
    name: String,
    source: PathBuf,
    kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub path: PathBuf,
    pub entry_count: usize,
    pub size_bytes: u64,
}

/// Fixed 1980-01-01 00:00:00, the earliest instant a zip header can encode.
fn sentinel_timestamp() -> DateTime {
    DateTime::default()
}

fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(sentinel_timestamp())
        .unix_permissions(ENTRY_PERMISSIONS)
}

fn collect_entries(root: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();

    // Symlinks are recorded as links, never followed: a linked dependency tree
    // would otherwise be archived differently depending on the host.
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|error| {
            let path = error.path().unwrap_or(root).to_path_buf();
            DeployError::io("walking", path, error.into())
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).map_err(|_| {
            DeployError::configuration(format!(
                "{} is outside of {}",
                entry.path().display(),
                root.display()
            ))
        })?;
        let name = archive_name(relative)?;

        let kind = if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|error| DeployError::io("reading link", entry.path(), error))?;
            EntryKind::Symlink {
                target: target.to_string_lossy().replace('\\', "/"),
            }
        } else {
            EntryKind::File
        };

        entries.push(ArchiveEntry {
            name,
            source: entry.path().to_path_buf(),
            kind,
        });
    }

    entries.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(entries)
}

fn archive_name(relative: &Path) -> Result<String> {
    let parts = relative
        .components()
        .map(|component| {
            component.as_os_str().to_str().ok_or_else(|| {
                DeployError::configuration(format!(
                    "path {} is not valid UTF-8",
                    relative.display()
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

fn write_entries<W: Write + Seek>(writer: W, entries: &[ArchiveEntry]) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    for entry in entries {
        match &entry.kind {
            EntryKind::File => {
                let bytes = fs::read(&entry.source)
                    .map_err(|error| DeployError::io("reading", &entry.source, error))?;
                zip.start_file(entry.name.as_str(), entry_options())
                    .map_err(|error| zip_error(&entry.source, error))?;
                zip.write_all(&bytes)
                    .map_err(|error| DeployError::io("archiving", &entry.source, error))?;
            }
            EntryKind::Symlink { target } => {
                zip.add_symlink(entry.name.as_str(), target.as_str(), entry_options())
                    .map_err(|error| zip_error(&entry.source, error))?;
            }
        }
    }
    zip.finish().map_err(|error| zip_error(Path::new(""), error))
}

fn zip_error(path: &Path, error: zip::result::ZipError) -> DeployError {
    let source = match error {
        zip::result::ZipError::Io(source) => source,
        other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
    };
    DeployError::io("archiving", path, source)
}

/// Archives `source_dir` into `destination`, creating parent directories.
///
/// The archive is written to a temporary file next to `destination` and only
/// renamed into place once complete.
pub fn package_directory(source_dir: &Path, destination: &Path) -> Result<PackagedArchive> {
    if !source_dir.is_dir() {
        return Err(DeployError::configuration(format!(
            "output directory {} does not exist",
            source_dir.display()
        )));
    }

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .map_err(|error| DeployError::io("creating directory", parent, error))?;

    let entries = collect_entries(source_dir)?;
    let temp = tempfile::Builder::new()
        .prefix(".package-")
        .suffix(".zip.tmp")
        .tempfile_in(parent)
        .map_err(|error| DeployError::io("creating temp file in", parent, error))?;

    let handle = temp
        .reopen()
        .map_err(|error| DeployError::io("opening temp file", temp.path(), error))?;
    let mut file = write_entries(handle, &entries)?;
    file.flush()
        .map_err(|error| DeployError::io("flushing", temp.path(), error))?;
    file.sync_all()
        .map_err(|error| DeployError::io("syncing", temp.path(), error))?;
    drop(file);

    temp.persist(destination)
        .map_err(|error| DeployError::io("persisting", destination, error.error))?;

    let size_bytes = fs::metadata(destination)
        .map_err(|error| DeployError::io("inspecting", destination, error))?
        .len();

    debug!(
        component = "packager",
        source = %source_dir.display(),
        archive = %destination.display(),
        entries = entries.len(),
        size_bytes,
        "packaged output directory"
    );

    Ok(PackagedArchive {
        path: destination.to_path_buf(),
        entry_count: entries.len(),
        size_bytes,
    })
}

/// Builds a small archive from in-memory files with the same pinned metadata.
pub fn archive_from_memory(files: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut sorted: Vec<_> = files.to_vec();
    sorted.sort_by(|left, right| left.0.cmp(right.0));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in sorted {
        zip.start_file(name, entry_options())
            .map_err(|error| zip_error(Path::new(name), error))?;
        zip.write_all(bytes)
            .map_err(|error| DeployError::io("archiving", name, error))?;
    }
    let cursor = zip
        .finish()
        .map_err(|error| zip_error(Path::new(""), error))?;
    Ok(cursor.into_inner())
}
