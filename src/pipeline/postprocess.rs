//! Text cleanup: deterministic rules applied to every text block.
//!
//! Extracted text arrives with layout residue: hard line ends from PDF lines,
//! runs split at inline markup boundaries, indentation whitespace from XHTML
//! source, zero-width characters, and now and then a control character that
//! XML 1.0 forbids outright. These rules turn it into one clean line of text
//! per block. Each rule is a pure `&str → String` function and independently
//! testable.
//!
//! ## Rule Order
//!
//! Runs are merged first (line breaks decide about hyphenation, which needs
//! the raw line ends), then illegal and invisible characters are removed, and
//! whitespace is collapsed last so removals cannot leave double spaces.

use once_cell::sync::Lazy;
use regex::Regex;

/// A piece of block content in reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPiece<'a> {
    Text(&'a str),
    Break,
}

/// Merge runs and apply all cleanup rules.
///
/// Rules (applied in order):
/// 1. Merge adjacent runs; a line break becomes a space, except that a word
///    hyphenated across the break is re-joined
/// 2. Strip characters that are illegal in XML 1.0
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 4. Collapse whitespace runs to a single space and trim
pub fn clean_runs<'a>(pieces: impl IntoIterator<Item = RunPiece<'a>>) -> String {
    let merged = merge_runs(pieces);
    clean_text(&merged)
}

/// Rules 2–4 on already merged text.
pub fn clean_text(input: &str) -> String {
    let s = strip_xml_illegal(input);
    let s = remove_invisible_chars(&s);
    collapse_whitespace(&s)
}

// ── Rule 1: Merge runs ───────────────────────────────────────────────────────

static RE_HYPHENATED_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{L}-$").unwrap());

fn merge_runs<'a>(pieces: impl IntoIterator<Item = RunPiece<'a>>) -> String {
    let mut out = String::new();
    let mut pending_break = false;

    for piece in pieces {
        match piece {
            RunPiece::Break => pending_break = true,
            RunPiece::Text(text) => {
                if pending_break && !out.is_empty() {
                    let trimmed_len = out.trim_end().len();
                    out.truncate(trimmed_len);
                    let next = text.trim_start();
                    let continues_lower = next.chars().next().is_some_and(|c| c.is_lowercase());
                    if continues_lower && RE_HYPHENATED_END.is_match(&out) {
                        out.pop();
                    } else {
                        out.push(' ');
                    }
                    out.push_str(next);
                } else {
                    out.push_str(text);
                }
                pending_break = false;
            }
        }
    }

    out
}

// ── Rule 2: Strip XML-illegal characters ─────────────────────────────────────

fn is_xml_legal(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || ('\u{20}'..='\u{D7FF}').contains(&c)
        || ('\u{E000}'..='\u{FFFD}').contains(&c)
        || c >= '\u{10000}'
}

fn strip_xml_illegal(input: &str) -> String {
    input.chars().filter(|&c| is_xml_legal(c)).collect()
}

// ── Rule 3: Remove invisible Unicode ─────────────────────────────────────────

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' // zero-width space
            | '\u{200C}' // zero-width non-joiner
            | '\u{200D}' // zero-width joiner
            | '\u{2060}' // word joiner
            | '\u{FEFF}' // BOM
            | '\u{00AD}' // soft hyphen
    )
}

fn remove_invisible_chars(input: &str) -> String {
    input.chars().filter(|&c| !is_invisible(c)).collect()
}

/// True when `c` survives every cleanup rule as a non-space character.
///
/// A block with no such character cleans up to the empty string.
pub fn is_visible_char(c: char) -> bool {
    !c.is_whitespace() && is_xml_legal(c) && !is_invisible(c)
}

// ── Rule 4: Collapse whitespace ──────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").trim().to_string()
}
