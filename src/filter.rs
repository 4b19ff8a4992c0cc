//! Include/exclude path filtering.
//!
//! Filters are plain regex patterns partitioned by object kind (file vs
//! directory) and by direction (include vs exclude). [`PathFilter`]
//! compiles every pattern once at construction and is then a pure
//! decision function, cheap enough to consult for every tree entry.

use regex::Regex;
use thiserror::Error;

/// Direction of a filter pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Paths matching the pattern are kept.
    Include,

    /// Paths matching the pattern are rejected.
    Exclude,
}

/// Kind of repository object a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Directory,
}

/// One uncompiled filter rule.
///
/// Patterns are regular expressions evaluated as an unanchored substring
/// search against the full path, so `\.rs$` matches any Rust file and
/// `^docs` matches the top-level docs tree. Anchor explicitly when the
/// position matters.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Regular expression source.
    pub pattern: String,

    /// Whether a match keeps or rejects the path.
    pub kind: FilterKind,
}

impl Filter {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: FilterKind::Include,
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            kind: FilterKind::Exclude,
        }
    }
}

/// Errors from building a [`PathFilter`].
#[derive(Debug, Error)]
pub enum FilterError {
    /// A filter pattern failed to compile.
    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Pre-compiled include/exclude decision function over paths.
///
/// File filters and directory filters are independent: rejecting a
/// directory prunes its whole subtree before any listing call is made,
/// while file filters decide which blobs are fetched at all.
///
/// A path passes for a given kind when:
/// - no patterns of that kind are configured at all, or
/// - it matches at least one include pattern (an empty include set counts
///   as matched) and matches no exclude pattern.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include_file_patterns: Vec<Regex>,
    exclude_file_patterns: Vec<Regex>,
    include_directory_patterns: Vec<Regex>,
    exclude_directory_patterns: Vec<Regex>,
}

impl PathFilter {
    /// Compiles file and directory filter lists into a reusable filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidPattern`] for the first pattern that
    /// fails to compile.
    pub fn new(file_filters: &[Filter], directory_filters: &[Filter]) -> Result<Self, FilterError> {
        Ok(Self {
            include_file_patterns: compile(file_filters, FilterKind::Include)?,
            exclude_file_patterns: compile(file_filters, FilterKind::Exclude)?,
            include_directory_patterns: compile(directory_filters, FilterKind::Include)?,
            exclude_directory_patterns: compile(directory_filters, FilterKind::Exclude)?,
        })
    }

    /// A filter with no patterns; every path passes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Decides whether `path` passes the filters configured for `kind`.
    pub fn matches(&self, path: &str, kind: ObjectKind) -> bool {
        match kind {
            ObjectKind::File => {
                Self::decide(path, &self.include_file_patterns, &self.exclude_file_patterns)
            }
            ObjectKind::Directory => Self::decide(
                path,
                &self.include_directory_patterns,
                &self.exclude_directory_patterns,
            ),
        }
    }

    fn decide(path: &str, includes: &[Regex], excludes: &[Regex]) -> bool {
        if includes.is_empty() && excludes.is_empty() {
            return true;
        }

        // An empty include set is treated as "included"; only an explicit
        // exclude match rejects. This covers exclude-only configurations.
        let included = includes.is_empty() || includes.iter().any(|p| p.is_match(path));
        included && !excludes.iter().any(|p| p.is_match(path))
    }
}

fn compile(filters: &[Filter], kind: FilterKind) -> Result<Vec<Regex>, FilterError> {
    filters
        .iter()
        .filter(|f| f.kind == kind)
        .map(|f| {
            Regex::new(&f.pattern).map_err(|source| FilterError::InvalidPattern {
                pattern: f.pattern.clone(),
                source,
            })
        })
        .collect()
}
