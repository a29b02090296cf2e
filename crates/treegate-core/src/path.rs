//! Canonical repository subpaths and the prefix-overlap predicate.
//!
//! A lease claims one subtree of the repository, identified by a
//! `/`-separated path. Two paths conflict exactly when one is a
//! component-wise prefix of the other: `/foo` overlaps `/foo/bar` but not
//! `/foobar`, and `/` overlaps everything.
//!
//! Normalization happens once, at parse time, and the same canonical form
//! is used both for comparisons and as the store's primary key. This is
//! what makes the overlap check in SQL (`path || '/'` prefix matching) and
//! the check in Rust agree.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors rejecting a raw path string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PathError {
    /// The raw path was empty.
    #[error("lease path must not be empty")]
    Empty,

    /// A path component was `.` or `..`, or contained a NUL byte.
    #[error("invalid path component: {component:?}")]
    InvalidComponent {
        /// The offending component.
        component: String,
    },
}

/// A normalized repository subpath.
///
/// Canonical form: starts with `/`, duplicate separators collapsed, no
/// trailing separator (the root is the single byte `/`). The inner string
/// is immutable after construction, so a `LeasePath` is always canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LeasePath(String);

impl LeasePath {
    /// Parses and normalizes a raw path.
    ///
    /// Leading `/` is optional in the input; duplicate and trailing
    /// separators are dropped. Empty inputs and `.`/`..` components are
    /// rejected, as are components containing NUL bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the input is empty or contains an invalid
    /// component.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let mut canonical = String::with_capacity(raw.len() + 1);
        for component in raw.split('/').filter(|c| !c.is_empty()) {
            if component == "." || component == ".." || component.contains('\0') {
                return Err(PathError::InvalidComponent {
                    component: component.to_string(),
                });
            }
            canonical.push('/');
            canonical.push_str(component);
        }
        if canonical.is_empty() {
            // Input was all separators; that is the repository root.
            canonical.push('/');
        }
        Ok(Self(canonical))
    }

    /// Returns the root path `/`, which overlaps every other path.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this path is the repository root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Iterates the path components, root first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Component-wise prefix-overlap predicate.
    ///
    /// `a.overlaps(b)` holds iff `a` is a prefix of `b` or `b` is a prefix
    /// of `a`, comparing whole components. Overlapping paths cannot be
    /// leased concurrently.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.components()
            .zip(other.components())
            .all(|(a, b)| a == b)
    }
}

impl fmt::Display for LeasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LeasePath {
    type Error = PathError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<LeasePath> for String {
    fn from(path: LeasePath) -> Self {
        path.0
    }
}
