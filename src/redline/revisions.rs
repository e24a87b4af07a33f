//! Find/replace revisions for a track-changes writer.
//!
//! A document writer that records real tracked changes cannot consume a
//! markup stream; it needs `find` strings it can locate in the original file.
//! Each deletion (with the insertion that follows it, if any) becomes one
//! revision, widened by one neighbouring word on each side so the `find`
//! string is less likely to match somewhere else.

use super::diff::{diff_chunks, ChunkTag, DiffChunk};
use serde::Serialize;

/// Below this length a `find` string matches too much of a contract to trust.
pub const MIN_RELIABLE_FIND_CHARS: usize = 10;

/// Context words shorter than this are not worth widening with.
const MIN_CONTEXT_WORD_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub find: String,
    pub replace: String,
    pub deleted: String,
    pub inserted: String,
}

impl Revision {
    pub fn is_reliable(&self) -> bool {
        self.find.chars().count() >= MIN_RELIABLE_FIND_CHARS
    }
}

/// Revisions that turn `original` into `modified`. Pure insertions are
/// skipped: with nothing deleted there is no text to anchor them to.
pub fn extract_revisions(original: &str, modified: &str) -> Vec<Revision> {
    let chunks = diff_chunks(original, modified);
    let mut revisions = Vec::new();
    let mut i = 0;

    while i < chunks.len() {
        if chunks[i].tag != ChunkTag::Delete {
            i += 1;
            continue;
        }

        let deleted = chunks[i].text.as_str();
        let mut inserted = "";
        let mut last = i;
        if let Some(next) = chunks.get(i + 1).filter(|c| c.tag == ChunkTag::Insert) {
            inserted = next.text.as_str();
            last = i + 1;
        }

        if !deleted.trim().is_empty() || !inserted.trim().is_empty() {
            let before = context_before(&chunks[..i]);
            let after = context_after(&chunks[last + 1..]);
            let find = format!("{before}{deleted}{after}").trim().to_string();
            let replace = format!("{before}{inserted}{after}").trim().to_string();
            if !find.is_empty() && find != replace {
                revisions.push(Revision {
                    find,
                    replace,
                    deleted: deleted.trim().to_string(),
                    inserted: inserted.trim().to_string(),
                });
            }
        }

        i = last + 1;
    }

    revisions
}

fn nearest_equal<'a>(mut chunks: impl Iterator<Item = &'a DiffChunk>) -> Option<&'a str> {
    chunks
        .find(|c| c.tag == ChunkTag::Equal)
        .map(|c| c.text.as_str())
}

fn context_before(chunks: &[DiffChunk]) -> String {
    nearest_equal(chunks.iter().rev())
        .and_then(|text| text.split_whitespace().last())
        .filter(|word| word.chars().count() >= MIN_CONTEXT_WORD_CHARS)
        .map(|word| format!("{word} "))
        .unwrap_or_default()
}

fn context_after(chunks: &[DiffChunk]) -> String {
    nearest_equal(chunks.iter())
        .and_then(|text| text.split_whitespace().next())
        .filter(|word| word.chars().count() >= MIN_CONTEXT_WORD_CHARS)
        .map(|word| format!(" {word}"))
        .unwrap_or_default()
}
