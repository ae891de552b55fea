use std::fmt;
use std::sync::Arc;

/// An absolute, `/`-separated path into the host resource tree.
///
/// Paths are lexically normalized on construction: empty segments and `.` are dropped and `..`
/// pops the previous segment (never above the root). The workspace root is `/`; the first segment
/// of every workspace resource names its project.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(Arc<str>);

impl ResourcePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.as_ref().split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        Self::from_segments(&segments)
    }

    /// The workspace root (`/`).
    pub fn root() -> Self {
        Self(Arc::from("/"))
    }

    fn from_segments(segments: &[&str]) -> Self {
        if segments.is_empty() {
            return Self::root();
        }
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        Self(Arc::from(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "/"
    }

    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<ResourcePath> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind('/').unwrap_or(0);
        if idx == 0 {
            Some(Self::root())
        } else {
            Some(Self(Arc::from(&self.0[..idx])))
        }
    }

    pub fn join(&self, relative: impl AsRef<str>) -> ResourcePath {
        if self.is_root() {
            Self::new(relative)
        } else {
            Self::new(format!("{}/{}", self.0, relative.as_ref()))
        }
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().next_back()
    }

    /// Extension of the last segment (without the dot).
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext)
    }

    /// Name of the project this path belongs to (its first segment).
    pub fn project_name(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Segment-wise prefix test: `/a/b` starts with `/a`, `/a/bc` does not start with `/a/b`.
    pub fn starts_with(&self, prefix: &ResourcePath) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.0.strip_prefix(&*prefix.0) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Segments of `self` below `prefix`, or `None` if `prefix` is not a prefix.
    pub fn strip_prefix(&self, prefix: &ResourcePath) -> Option<Vec<&str>> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(self.segments().skip(prefix.segment_count()).collect())
    }

    /// Re-roots `self` from `from` onto `to` (used for moves); `None` if `from` is not a prefix.
    pub fn rebase(&self, from: &ResourcePath, to: &ResourcePath) -> Option<ResourcePath> {
        let rest = self.strip_prefix(from)?;
        if rest.is_empty() {
            return Some(to.clone());
        }
        Some(to.join(rest.join("/")))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourcePath({})", self.0)
    }
}

impl From<&str> for ResourcePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourcePath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
