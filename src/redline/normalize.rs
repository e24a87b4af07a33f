//! Typographic normalization
//!
//! PDF-extracted contracts carry smart quotes, exotic spaces and dashes that a
//! model will echo back as plain ASCII. Anchors are matched byte-for-byte and the
//! redline is byte-sensitive, so every text that meets another text goes through
//! here first: the source document, every anchor and replacement the generator
//! returns, and any playbook injected into the prompt.

use std::borrow::Cow;

/// Canonicalize punctuation and whitespace variants to ASCII.
///
/// Idempotent: every replacement is plain ASCII, which is never rewritten.
pub fn normalize(text: &str) -> String {
    normalize_cow(text).into_owned()
}

/// Same as [`normalize`], without allocating when there is nothing to map.
pub fn normalize_cow(text: &str) -> Cow<'_, str> {
    if text.is_ascii() || !text.chars().any(|c| replacement(c).is_some()) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match replacement(c) {
            Some(mapped) => out.push_str(mapped),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn replacement(c: char) -> Option<&'static str> {
    let mapped = match c {
        // Double quotes, double primes, guillemets
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{2036}'
        | '\u{00AB}' | '\u{00BB}' | '\u{2039}' | '\u{203A}' => "\"",
        // Single quotes, apostrophes, primes
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{2035}' => "'",
        // Hyphen variants, figure/en/em dashes, horizontal bar, minus sign
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
        | '\u{2212}' => "-",
        // NBSP, ogham space, en quad through hair space, zero width space,
        // narrow NBSP, medium math space, ideographic space
        '\u{00A0}' | '\u{1680}' | '\u{2000}'..='\u{200B}' | '\u{202F}' | '\u{205F}'
        | '\u{3000}' => " ",
        '\u{2026}' => "...",
        // Bullets
        '\u{2022}' | '\u{2023}' | '\u{2043}' | '\u{2219}' | '\u{25AA}' | '\u{25CF}'
        | '\u{25E6}' => "*",
        '\u{00BD}' => "1/2",
        '\u{00BC}' => "1/4",
        '\u{00BE}' => "3/4",
        _ => return None,
    };
    Some(mapped)
}
