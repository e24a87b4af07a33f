//! Anchor resolution
//!
//! An anchor is a verbatim substring the generator copied out of the document.
//! A span runs from the start of the first `anchor_start` occurrence to the end
//! of the first `anchor_end` occurrence at or after it. Offsets are byte offsets
//! into the searched string.

use std::fmt;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionFailure {
    /// An anchor was empty; an empty anchor never denotes an empty span.
    EmptyAnchor,
    StartNotFound,
    /// `anchor_start` was found but `anchor_end` never occurs at or after it.
    EndNotFound,
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResolutionFailure::EmptyAnchor => "anchor is empty",
            ResolutionFailure::StartNotFound => "anchor_start not found",
            ResolutionFailure::EndNotFound => "anchor_end not found after anchor_start",
        };
        f.write_str(text)
    }
}

/// Locate the span delimited by the two anchors.
///
/// The search for `anchor_end` begins at the start of the matched
/// `anchor_start`, so an `anchor_end` that also occurs earlier in the document
/// still binds to the occurrence that follows the start anchor.
pub fn resolve_span(
    document: &str,
    anchor_start: &str,
    anchor_end: &str,
) -> Result<Span, ResolutionFailure> {
    if anchor_start.is_empty() || anchor_end.is_empty() {
        return Err(ResolutionFailure::EmptyAnchor);
    }

    let start = document
        .find(anchor_start)
        .ok_or(ResolutionFailure::StartNotFound)?;
    let end_offset = document[start..]
        .find(anchor_end)
        .ok_or(ResolutionFailure::EndNotFound)?;
    let end = start + end_offset + anchor_end.len();

    // anchor_end found inside anchor_start: the span must still cover the start anchor
    Ok(Span {
        start,
        end: end.max(start + anchor_start.len()),
    })
}

/// Non-overlapping occurrences of `needle` in `haystack`. Zero for an empty needle.
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}
