//! Redline rendering
//!
//! Word-level diff of two normalized texts, followed by a semantic cleanup pass
//! that folds short shared fragments sitting between edits into the edits
//! themselves ("the" matching "the" in the middle of a rewritten sentence is
//! noise, not a real unchanged span). The result is rendered as one linear
//! markup string.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, ChangeTag, TextDiff};
use std::time::Duration;

/// Upper bound on diff computation; past it `similar` returns a coarser diff.
const DIFF_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkTag {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffChunk {
    pub tag: ChunkTag,
    pub text: String,
}

impl DiffChunk {
    fn new(tag: ChunkTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

/// Markup wrapped around deleted and inserted spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffMarkers {
    pub delete_open: String,
    pub delete_close: String,
    pub insert_open: String,
    pub insert_close: String,
}

impl Default for DiffMarkers {
    fn default() -> Self {
        Self {
            delete_open: "~~".to_string(),
            delete_close: "~~".to_string(),
            insert_open: "<u>".to_string(),
            insert_close: "</u>".to_string(),
        }
    }
}

/// Render `original` → `modified` as strikethrough/underline markup.
///
/// Both inputs must already be normalized. Whitespace-only changes are
/// emitted verbatim, without markers.
pub fn render_diff(original: &str, modified: &str, markers: &DiffMarkers) -> String {
    let chunks = diff_chunks(original, modified);
    let mut out = String::with_capacity(modified.len() + original.len() / 4);

    for chunk in &chunks {
        let (open, close) = match chunk.tag {
            ChunkTag::Equal => ("", ""),
            ChunkTag::Delete => (markers.delete_open.as_str(), markers.delete_close.as_str()),
            ChunkTag::Insert => (markers.insert_open.as_str(), markers.insert_close.as_str()),
        };
        if chunk.tag == ChunkTag::Equal || chunk.text.trim().is_empty() {
            out.push_str(&chunk.text);
        } else {
            out.push_str(open);
            out.push_str(&chunk.text);
            out.push_str(close);
        }
    }

    out
}

/// Cleaned-up diff as a chunk list: within every change region the deletion
/// comes first, then the insertion.
pub fn diff_chunks(original: &str, modified: &str) -> Vec<DiffChunk> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(DIFF_TIMEOUT)
        .diff_words(original, modified);

    let mut raw: Vec<DiffChunk> = Vec::new();
    for change in diff.iter_all_changes() {
        let tag = match change.tag() {
            ChangeTag::Equal => ChunkTag::Equal,
            ChangeTag::Delete => ChunkTag::Delete,
            ChangeTag::Insert => ChunkTag::Insert,
        };
        match raw.last_mut() {
            Some(last) if last.tag == tag => last.text.push_str(change.value()),
            _ => raw.push(DiffChunk::new(tag, change.value())),
        }
    }

    cleanup_semantic(coalesce(raw))
}

/// Merge every run of non-equal chunks into at most one delete and one insert,
/// and adjacent equal chunks into one.
fn coalesce(chunks: Vec<DiffChunk>) -> Vec<DiffChunk> {
    let mut out: Vec<DiffChunk> = Vec::with_capacity(chunks.len());
    let mut deleted = String::new();
    let mut inserted = String::new();

    let flush = |out: &mut Vec<DiffChunk>, deleted: &mut String, inserted: &mut String| {
        if !deleted.is_empty() {
            out.push(DiffChunk::new(ChunkTag::Delete, std::mem::take(deleted)));
        }
        if !inserted.is_empty() {
            out.push(DiffChunk::new(ChunkTag::Insert, std::mem::take(inserted)));
        }
    };

    for chunk in chunks {
        match chunk.tag {
            ChunkTag::Delete => deleted.push_str(&chunk.text),
            ChunkTag::Insert => inserted.push_str(&chunk.text),
            ChunkTag::Equal => {
                flush(&mut out, &mut deleted, &mut inserted);
                if chunk.text.is_empty() {
                    continue;
                }
                match out.last_mut() {
                    Some(last) if last.tag == ChunkTag::Equal => last.text.push_str(&chunk.text),
                    _ => out.push(chunk),
                }
            }
        }
    }
    flush(&mut out, &mut deleted, &mut inserted);
    out
}

/// Largest of deleted/inserted length (in chars) of the change region that
/// ends just before `idx` (walking left) or starts just after it (walking right).
fn region_weight(chunks: &[DiffChunk], range: impl Iterator<Item = usize>) -> usize {
    let mut deleted = 0;
    let mut inserted = 0;
    for i in range {
        match chunks[i].tag {
            ChunkTag::Equal => break,
            ChunkTag::Delete => deleted += chunks[i].text.chars().count(),
            ChunkTag::Insert => inserted += chunks[i].text.chars().count(),
        }
    }
    deleted.max(inserted)
}

/// Fold an equality into its neighbours when it is no longer than the edits
/// on both sides of it, repeating until nothing changes.
fn cleanup_semantic(mut chunks: Vec<DiffChunk>) -> Vec<DiffChunk> {
    loop {
        let candidate = (1..chunks.len().saturating_sub(1)).find(|&i| {
            if chunks[i].tag != ChunkTag::Equal {
                return false;
            }
            let before = region_weight(&chunks, (0..i).rev());
            let after = region_weight(&chunks, i + 1..chunks.len());
            let len = chunks[i].text.chars().count();
            before > 0 && after > 0 && len <= before && len <= after
        });

        let Some(i) = candidate else {
            return chunks;
        };

        let text = chunks[i].text.clone();
        chunks[i] = DiffChunk::new(ChunkTag::Delete, text.clone());
        chunks.insert(i + 1, DiffChunk::new(ChunkTag::Insert, text));
        chunks = coalesce(chunks);
    }
}
