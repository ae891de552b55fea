use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::ClasspathError;

/// Compiled inclusion/exclusion patterns of a source entry.
///
/// Patterns are matched against `/`-separated paths relative to the root. A pattern with a
/// trailing `/` (e.g. `gen/`) matches the folder and everything below it. Inclusion patterns only
/// filter files; folders are always traversed so included files below them stay reachable.
#[derive(Clone, Debug, Default)]
pub struct PathFilter {
    inclusions: Vec<String>,
    exclusions: Vec<String>,
    inclusion_set: Option<GlobSet>,
    exclusion_set: Option<GlobSet>,
}

impl PartialEq for PathFilter {
    fn eq(&self, other: &Self) -> bool {
        self.inclusions == other.inclusions && self.exclusions == other.exclusions
    }
}

impl PathFilter {
    pub fn new(inclusions: &[String], exclusions: &[String]) -> Result<Self, ClasspathError> {
        Ok(Self {
            inclusions: inclusions.to_vec(),
            exclusions: exclusions.to_vec(),
            inclusion_set: compile(inclusions)?,
            exclusion_set: compile(exclusions)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inclusions.is_empty() && self.exclusions.is_empty()
    }

    pub fn inclusions(&self) -> &[String] {
        &self.inclusions
    }

    pub fn exclusions(&self) -> &[String] {
        &self.exclusions
    }

    pub fn is_excluded(&self, relative: &str, is_folder: bool) -> bool {
        if relative.is_empty() {
            return false;
        }
        if self
            .exclusion_set
            .as_ref()
            .is_some_and(|set| set.is_match(relative))
        {
            return true;
        }
        if is_folder {
            return false;
        }
        match &self.inclusion_set {
            Some(set) => !set.is_match(relative),
            None => false,
        }
    }
}

fn compile(patterns: &[String]) -> Result<Option<GlobSet>, ClasspathError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match pattern.strip_suffix('/') {
            Some(folder) => {
                builder.add(glob(pattern, folder)?);
                builder.add(glob(pattern, &format!("{folder}/**"))?);
            }
            None => {
                builder.add(glob(pattern, pattern)?);
            }
        }
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| ClasspathError::Pattern {
            pattern: patterns.join(", "),
            source,
        })
}

fn glob(original: &str, pattern: &str) -> Result<Glob, ClasspathError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| ClasspathError::Pattern {
            pattern: original.to_string(),
            source,
        })
}
