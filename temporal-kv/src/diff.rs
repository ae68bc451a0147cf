//! Binary diff codec.
//!
//! `generate` always prefers the smaller of a literal replacement and a
//! bsdiff-style patch, so a diff is never larger than `next.len() + 1`.

use std::fmt;

use qbsdiff::{Bsdiff, Bspatch};
use serde::{Deserialize, Serialize};

const TAG_LITERAL: u8 = 0x00;
const TAG_PATCH: u8 = 0x01;

/// A tagged byte transformation from one key's value to its next value.
///
/// Disk form is the tag byte followed by the payload; an empty `Diff`
/// (no bytes at all) is the delete-rebase sentinel: it leaves a value
/// unchanged when applied against an already-absent key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff(pub Vec<u8>);

impl Diff {
    /// The zero-length diff used to encode a delete event.
    pub fn empty() -> Self {
        Diff(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Computes a diff from `prior` to `next`, choosing whichever of the
    /// literal or patch encoding is smaller.
    pub fn generate(prior: &[u8], next: &[u8]) -> Result<Self, DiffError> {
        let mut patch = Vec::new();
        Bsdiff::new(prior, next)
            .compare(&mut patch)
            .map_err(DiffError::PatchGenerationFailed)?;

        if patch.len() >= next.len() {
            let mut literal = Vec::with_capacity(next.len() + 1);
            literal.push(TAG_LITERAL);
            literal.extend_from_slice(next);
            Ok(Diff(literal))
        } else {
            let mut tagged = Vec::with_capacity(patch.len() + 1);
            tagged.push(TAG_PATCH);
            tagged.extend_from_slice(&patch);
            Ok(Diff(tagged))
        }
    }

    /// Applies `self` against `prior`, yielding the reconstructed value.
    ///
    /// An empty diff returns `prior` unchanged — used only for the
    /// delete-rebase case where the key is already absent from the map.
    pub fn apply(&self, prior: &[u8]) -> Result<Vec<u8>, DiffError> {
        if self.0.is_empty() {
            return Ok(prior.to_vec());
        }

        let (tag, payload) = (self.0[0], &self.0[1..]);
        match tag {
            TAG_LITERAL => Ok(payload.to_vec()),
            TAG_PATCH => {
                let patcher =
                    Bspatch::new(payload).map_err(DiffError::PatchApplicationFailed)?;
                let mut out = Vec::new();
                patcher
                    .apply(prior, &mut out)
                    .map_err(DiffError::PatchApplicationFailed)?;
                Ok(out)
            }
            other => Err(DiffError::InvalidDiffFormat(other)),
        }
    }
}

#[derive(Debug)]
pub enum DiffError {
    PatchGenerationFailed(std::io::Error),
    PatchApplicationFailed(std::io::Error),
    InvalidDiffFormat(u8),
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PatchGenerationFailed(err) => write!(f, "failed to generate patch: {err}"),
            Self::PatchApplicationFailed(err) => write!(f, "failed to apply patch: {err}"),
            Self::InvalidDiffFormat(tag) => write!(f, "invalid diff tag byte: {tag:#04x}"),
        }
    }
}

impl std::error::Error for DiffError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_generate_and_apply() {
        let prior = b"hello";
        let next = b"hello world";
        let diff = Diff::generate(prior, next).unwrap();
        let applied = diff.apply(prior).unwrap();
        assert_eq!(applied, next);
    }

    #[test]
    fn picks_patch_form_when_smaller() {
        let prior = b"The quick brown fox jumps over the lazy dog.".repeat(4);
        let mut next = prior.clone();
        next.push(b'!');
        let diff = Diff::generate(&prior, &next).unwrap();
        assert_eq!(diff.0[0], TAG_PATCH);
    }

    #[test]
    fn picks_literal_form_for_unrelated_small_values() {
        let diff = Diff::generate(b"a", b"b").unwrap();
        assert_eq!(diff.0[0], TAG_LITERAL);
        assert_eq!(&diff.0[1..], b"b");
    }

    #[test]
    fn empty_diff_leaves_prior_unchanged() {
        let diff = Diff::empty();
        assert_eq!(diff.apply(b"unchanged").unwrap(), b"unchanged");
    }

    #[test]
    fn rejects_unknown_tag() {
        let diff = Diff(vec![0xFF, 1, 2, 3]);
        assert!(matches!(
            diff.apply(b"anything"),
            Err(DiffError::InvalidDiffFormat(0xFF))
        ));
    }
}
