//! Zip packaging of the artifact directory.

use sha2::{Digest, Sha256};
use sitepush_core::{DeployError, DeployResult};
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Component, Path};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A zip archive ready to upload.
#[derive(Debug, Clone)]
pub struct ArchivePayload {
    pub bytes: Vec<u8>,
    pub file_count: usize,
    /// Hex SHA-256 of `bytes`.
    pub sha256: String,
}

/// Zip every regular file under `dir`, keyed by its `/`-separated relative path.
///
/// Entries are written in file-name order so the same tree always produces
/// the same entry list. Symlinks are not followed.
pub fn build_archive(dir: &Path) -> DeployResult<ArchivePayload> {
    if !dir.is_dir() {
        return Err(DeployError::ArchiveFailure(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut file_count = 0;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_error(dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry_name(dir, entry.path())?;
        zip.start_file(name, options)
            .map_err(|e| archive_error(entry.path(), e))?;

        let mut file = File::open(entry.path()).map_err(|e| archive_error(entry.path(), e))?;
        std::io::copy(&mut file, &mut zip).map_err(|e| archive_error(entry.path(), e))?;
        file_count += 1;
    }

    if file_count == 0 {
        return Err(DeployError::ArchiveFailure(format!(
            "{} contains no files",
            dir.display()
        )));
    }

    let mut cursor = zip.finish().map_err(|e| archive_error(dir, e))?;
    cursor.flush().map_err(|e| archive_error(dir, e))?;
    let bytes = cursor.into_inner();
    let sha256 = hex::encode(Sha256::digest(&bytes));

    Ok(ArchivePayload {
        bytes,
        file_count,
        sha256,
    })
}

fn entry_name(root: &Path, path: &Path) -> DeployResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| archive_error(path, e))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| {
                DeployError::ArchiveFailure(format!(
                    "{} is not valid UTF-8",
                    path.display()
                ))
            })?),
            _ => {
                return Err(DeployError::ArchiveFailure(format!(
                    "unexpected path component in {}",
                    path.display()
                )));
            }
        }
    }
    Ok(parts.join("/"))
}

fn archive_error(path: &Path, e: impl std::fmt::Display) -> DeployError {
    DeployError::ArchiveFailure(format!("{}: {}", path.display(), e))
}
