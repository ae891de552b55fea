use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nova_vfs::ResourcePath;

use crate::error::{ModelError, Result};

/// Index of a `.jar`/`.zip` archive backing a binary root.
///
/// The archive bytes are kept so entries can be read lazily when class files are opened. The
/// handle is released when its root is closed; a released handle refuses further reads.
pub struct ArchiveHandle {
    path: ResourcePath,
    bytes: Arc<[u8]>,
    files: BTreeSet<String>,
    packages: BTreeSet<String>,
    released: AtomicBool,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .field("files", &self.files.len())
            .field("released", &self.is_released())
            .finish()
    }
}

impl ArchiveHandle {
    pub fn open(path: ResourcePath, bytes: Arc<[u8]>) -> Result<Self> {
        let (files, packages) = index_entries(&path, &bytes)?;

        Ok(Self {
            path,
            bytes,
            files,
            packages,
            released: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Dotted package names, including the default package (`""`).
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    /// File names (not paths) directly inside `package`, sorted.
    pub fn files_in(&self, package: &str) -> Vec<&str> {
        let prefix = if package.is_empty() {
            String::new()
        } else {
            format!("{}/", package.replace('.', "/"))
        };
        self.files
            .iter()
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.contains('/'))
            .collect()
    }

    pub fn read(&self, entry: &str) -> Result<Vec<u8>> {
        if self.is_released() {
            return Err(invalid(&self.path, "archive handle released"));
        }
        let mut archive = zip::ZipArchive::new(Cursor::new(&self.bytes[..]))
            .map_err(|err| invalid(&self.path, err))?;
        let mut file = archive
            .by_name(entry)
            .map_err(|err| invalid(&self.path, format!("{entry}: {err}")))?;
        let mut out = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut out)
            .map_err(|err| invalid(&self.path, format!("{entry}: {err}")))?;
        Ok(out)
    }

    /// Release hook run when the owning root is closed.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::trace!(target = "nova.model", path = %self.path, "released archive handle");
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

fn index_entries(path: &ResourcePath, bytes: &[u8]) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|err| invalid(path, err))?;

    let mut files = BTreeSet::new();
    let mut packages = BTreeSet::new();
    for name in archive.file_names() {
        let name = name.trim_start_matches('/');
        if name.is_empty() {
            continue;
        }
        let (dir, is_file) = match name.strip_suffix('/') {
            Some(dir) => (dir, false),
            None => (name.rsplit_once('/').map_or("", |(dir, _)| dir), true),
        };
        if is_file {
            files.insert(name.to_string());
        }
        packages.insert(String::new());
        let mut package = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if !package.is_empty() {
                package.push('.');
            }
            package.push_str(segment);
            packages.insert(package.clone());
        }
    }
    Ok((files, packages))
}

fn invalid(path: &ResourcePath, message: impl std::fmt::Display) -> ModelError {
    ModelError::InvalidArchive {
        path: path.to_string(),
        message: message.to_string(),
    }
}
