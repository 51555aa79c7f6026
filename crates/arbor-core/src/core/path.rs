// crates/arbor-core/src/core/path.rs
// ============================================================================
// Module: Arbor Materialized Paths
// Description: Materialized-path encoding, prefix arithmetic, and child allocation.
// Purpose: Provide the step-aligned path model that every tree predicate builds on.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A node's [`TreePath`] is the concatenation of one fixed-width step per tree
//! level. Each step is a base-N number written in the configured alphabet, so
//! lexicographic order of paths equals depth-first tree order. [`PathSpec`]
//! owns the step width and alphabet and performs all prefix arithmetic.
//!
//! Security posture: paths read from stores are untrusted until parsed through
//! [`PathSpec::parse`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of characters per tree level.
pub const DEFAULT_STEPLEN: usize = 4;
/// Default step alphabet (digits then uppercase letters).
pub const DEFAULT_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Largest supported step width.
pub const MAX_STEPLEN: usize = 16;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Materialized-path errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Step width or alphabet is unusable.
    #[error("invalid path spec: {0}")]
    InvalidSpec(String),
    /// Path string violates the step layout or alphabet.
    #[error("invalid tree path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path string.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
    /// No further child steps can be allocated under the parent.
    #[error("child step overflow under {parent:?}")]
    StepOverflow {
        /// Parent path whose step space is exhausted.
        parent: String,
    },
}

// ============================================================================
// SECTION: Tree Path
// ============================================================================

/// Materialized path of a tree node.
///
/// # Invariants
/// - Constructed paths are not validated; use [`PathSpec::parse`] at trust boundaries.
/// - The empty path denotes "above the roots" and never names a stored node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(String);

impl TreePath {
    /// Creates a path from a raw string without validation.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the empty path above all roots.
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the path length in characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when this is the empty path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when `self` starts with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(prefix.as_str())
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TreePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Path Spec
// ============================================================================

/// Step width and alphabet shared by every path in one tree.
///
/// # Invariants
/// - `1 <= steplen <= MAX_STEPLEN`.
/// - The alphabet holds at least two unique ASCII alphanumeric characters in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    /// Characters per level.
    steplen: usize,
    /// Step digits, lowest value first.
    alphabet: Arc<str>,
}

impl Default for PathSpec {
    fn default() -> Self {
        Self { steplen: DEFAULT_STEPLEN, alphabet: Arc::from(DEFAULT_ALPHABET) }
    }
}

impl PathSpec {
    /// Builds a validated path spec.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::InvalidSpec`] when the step width or alphabet is unusable.
    pub fn new(steplen: usize, alphabet: &str) -> Result<Self, PathError> {
        if steplen == 0 || steplen > MAX_STEPLEN {
            return Err(PathError::InvalidSpec(format!(
                "steplen must be between 1 and {MAX_STEPLEN}, got {steplen}"
            )));
        }
        if alphabet.len() < 2 {
            return Err(PathError::InvalidSpec("alphabet needs at least two characters".to_string()));
        }
        if !alphabet.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(PathError::InvalidSpec(
                "alphabet must contain ASCII alphanumerics only".to_string(),
            ));
        }
        let unique: BTreeSet<u8> = alphabet.bytes().collect();
        if unique.len() != alphabet.len() {
            return Err(PathError::InvalidSpec("alphabet characters must be unique".to_string()));
        }
        if !alphabet.as_bytes().windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(PathError::InvalidSpec(
                "alphabet must be in ascending byte order".to_string(),
            ));
        }
        Ok(Self { steplen, alphabet: Arc::from(alphabet) })
    }

    /// Returns the number of characters per level.
    #[must_use]
    pub const fn steplen(&self) -> usize {
        self.steplen
    }

    /// Returns the step alphabet.
    #[must_use]
    pub fn alphabet(&self) -> &str {
        &self.alphabet
    }

    /// Parses and validates a stored node path.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::InvalidPath`] when the path is empty, not step aligned,
    /// or uses characters outside the alphabet.
    pub fn parse(&self, raw: &str) -> Result<TreePath, PathError> {
        if raw.is_empty() {
            return Err(invalid_path(raw, "node paths cannot be empty"));
        }
        if raw.len() % self.steplen != 0 {
            return Err(invalid_path(raw, "length is not a multiple of the step width"));
        }
        if let Some(ch) = raw.chars().find(|ch| !self.alphabet.contains(*ch)) {
            return Err(invalid_path(raw, &format!("character '{ch}' is outside the alphabet")));
        }
        Ok(TreePath::new(raw))
    }

    /// Returns the depth encoded by a path (`len / steplen`).
    #[must_use]
    pub fn depth_of(&self, path: &TreePath) -> u32 {
        u32::try_from(path.len() / self.steplen).unwrap_or(u32::MAX)
    }

    /// Returns the path truncated by exactly one step (empty for roots).
    #[must_use]
    pub fn parent_of(&self, path: &TreePath) -> TreePath {
        let cut = path.len().saturating_sub(self.steplen);
        TreePath::new(path.as_str().get(.. cut).unwrap_or_default())
    }

    /// Returns every step-boundary prefix of `path`, shortest first, including `path` itself.
    #[must_use]
    pub fn ancestor_prefixes(&self, path: &TreePath) -> Vec<TreePath> {
        (self.steplen ..= path.len())
            .step_by(self.steplen)
            .filter_map(|end| path.as_str().get(.. end).map(TreePath::new))
            .collect()
    }

    /// Truncates an arbitrary prefix down to the nearest step boundary.
    #[must_use]
    pub fn truncate_to_step(&self, prefix: &str) -> TreePath {
        let aligned = prefix.len() - prefix.len() % self.steplen;
        TreePath::new(prefix.get(.. aligned).unwrap_or_default())
    }

    /// Returns the deepest step-aligned prefix shared by every path.
    ///
    /// Returns the empty path when `paths` is empty or diverges at the first step.
    #[must_use]
    pub fn common_prefix(&self, paths: &BTreeSet<TreePath>) -> TreePath {
        let mut iter = paths.iter();
        let Some(first) = iter.next() else {
            return TreePath::empty();
        };
        let mut shared = first.len();
        for path in iter {
            let matching = first
                .as_str()
                .bytes()
                .zip(path.as_str().bytes())
                .take_while(|(left, right)| left == right)
                .count();
            shared = shared.min(matching);
        }
        self.truncate_to_step(first.as_str().get(.. shared).unwrap_or_default())
    }

    /// Allocates the path for a new child appended after `last_child`.
    ///
    /// `parent` is the empty path when allocating a root.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::StepOverflow`] when the parent's step space is exhausted and
    /// [`PathError::InvalidPath`] when `last_child` uses characters outside the alphabet.
    pub fn next_child(
        &self,
        parent: &TreePath,
        last_child: Option<&TreePath>,
    ) -> Result<TreePath, PathError> {
        let next = match last_child {
            None => 1,
            Some(last) => {
                let step =
                    last.as_str().get(last.len().saturating_sub(self.steplen) ..).unwrap_or_default();
                self.decode_step(last, step)? + 1
            }
        };
        let step = self
            .encode_step(next)
            .ok_or_else(|| PathError::StepOverflow { parent: parent.as_str().to_string() })?;
        Ok(TreePath::new(format!("{}{step}", parent.as_str())))
    }

    /// Rewrites `path` so that `old_prefix` is replaced by `new_prefix`.
    #[must_use]
    pub fn rebase(&self, path: &TreePath, old_prefix: &TreePath, new_prefix: &TreePath) -> TreePath {
        let suffix = path.as_str().get(old_prefix.len() ..).unwrap_or_default();
        TreePath::new(format!("{}{suffix}", new_prefix.as_str()))
    }

    /// Decodes one step into its numeric value.
    fn decode_step(&self, path: &TreePath, step: &str) -> Result<u128, PathError> {
        let radix = self.radix();
        step.chars().try_fold(0_u128, |acc, ch| {
            let digit = self
                .alphabet
                .find(ch)
                .ok_or_else(|| invalid_path(path.as_str(), "step uses characters outside the alphabet"))?;
            Ok(acc * radix + digit as u128)
        })
    }

    /// Encodes a numeric step value, returning `None` when it does not fit the step width.
    fn encode_step(&self, mut value: u128) -> Option<String> {
        let radix = self.radix();
        let digits = self.alphabet.as_bytes();
        let mut out = vec![digits[0]; self.steplen];
        for slot in out.iter_mut().rev() {
            let index = usize::try_from(value % radix).ok()?;
            *slot = digits[index];
            value /= radix;
        }
        if value > 0 {
            return None;
        }
        String::from_utf8(out).ok()
    }

    /// Returns the numeric base of the alphabet.
    fn radix(&self) -> u128 {
        self.alphabet.len() as u128
    }
}

/// Builds an [`PathError::InvalidPath`] value.
fn invalid_path(path: &str, reason: &str) -> PathError {
    PathError::InvalidPath { path: path.to_string(), reason: reason.to_string() }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
