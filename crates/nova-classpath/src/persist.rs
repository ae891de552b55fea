//! External archive timestamp cache.
//!
//! On-disk format (all integers big-endian):
//!
//! ```text
//! i32 count
//! count x { u16 path_len, path_len bytes of UTF-8 path, i64 timestamp }
//! ```
//!
//! Loading is best-effort: a missing, truncated or otherwise corrupt file yields an empty cache.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nova_vfs::ResourcePath;

use crate::ClasspathError;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimestampCache {
    entries: BTreeMap<ResourcePath, i64>,
}

impl TimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &ResourcePath) -> Option<i64> {
        self.entries.get(path).copied()
    }

    pub fn insert(&mut self, path: ResourcePath, timestamp: i64) -> Option<i64> {
        self.entries.insert(path, timestamp)
    }

    pub fn remove(&mut self, path: &ResourcePath) -> Option<i64> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourcePath, i64)> {
        self.entries.iter().map(|(path, ts)| (path, *ts))
    }

    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                tracing::debug!(
                    target = "nova.classpath",
                    path = %path.display(),
                    error = %err,
                    "failed to read timestamp cache"
                );
                return Self::default();
            }
        };
        match Self::decode(&bytes) {
            Ok(cache) => cache,
            Err(err) => {
                tracing::warn!(
                    target = "nova.classpath",
                    path = %path.display(),
                    error = %err,
                    "ignoring corrupt timestamp cache"
                );
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ClasspathError> {
        let bytes = self.encode()?;
        atomic_write(path, &bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClasspathError> {
        let count = i32::try_from(self.entries.len())
            .map_err(|_| ClasspathError::Corrupt("too many timestamp entries".to_string()))?;
        let mut out = Vec::with_capacity(4 + self.entries.len() * 32);
        out.extend_from_slice(&count.to_be_bytes());
        for (path, timestamp) in &self.entries {
            let bytes = path.as_str().as_bytes();
            let len = u16::try_from(bytes.len())
                .map_err(|_| ClasspathError::Corrupt(format!("path too long: {path}")))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(bytes);
            out.extend_from_slice(&timestamp.to_be_bytes());
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ClasspathError> {
        let mut reader = Reader { bytes, pos: 0 };
        let count = i32::from_be_bytes(reader.take::<4>()?);
        if count < 0 {
            return Err(ClasspathError::Corrupt(format!("negative entry count {count}")));
        }
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let len = u16::from_be_bytes(reader.take::<2>()?) as usize;
            let raw = reader.slice(len)?;
            let path = std::str::from_utf8(raw)
                .map_err(|err| ClasspathError::Corrupt(format!("invalid UTF-8 path: {err}")))?;
            let timestamp = i64::from_be_bytes(reader.take::<8>()?);
            entries.insert(ResourcePath::new(path), timestamp);
        }
        if reader.pos != bytes.len() {
            return Err(ClasspathError::Corrupt(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }
        Ok(Self { entries })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn slice(&mut self, len: usize) -> Result<&'a [u8], ClasspathError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ClasspathError::Corrupt("unexpected end of file".to_string()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ClasspathError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(N)?);
        Ok(out)
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ClasspathError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let tmp_path = tmp_path_for(path, parent);
    let write_result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result.and_then(|()| fs::rename(&tmp_path, path)) {
        remove_file_best_effort(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn tmp_path_for(path: &Path, parent: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "timestamps".to_string());
    let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent.join(format!(".{name}.{}.{counter}.tmp", std::process::id()))
}

fn remove_file_best_effort(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                target = "nova.classpath",
                path = %path.display(),
                error = %err,
                "failed to remove temporary timestamp cache file"
            );
        }
    }
}
