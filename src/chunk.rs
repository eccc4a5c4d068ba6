//! Overlapping, separator-aware text chunker.
//!
//! Splits document text into pieces of at most `chunk_size` characters.
//! Consecutive pieces share exactly `overlap` characters: the tail of chunk
//! *i* is the head of chunk *i+1*, so dropping the first `overlap`
//! characters of every chunk after the first and concatenating gives back
//! the original text.
//!
//! # Algorithm
//!
//! 1. Starting at offset `start`, the next chunk may end anywhere in
//!    `(start + overlap, start + chunk_size]`.
//! 2. Look for the last paragraph break (`\n\n`) in that window.
//! 3. If there is none, recurse into the next separator class: sentence
//!    breaks, then whitespace.
//! 4. If no class yields a break, cut hard at `start + chunk_size`.
//! 5. The next chunk starts `overlap` characters before the end of this one.
//!
//! All sizes are counted in characters (`char`s), never bytes, so multibyte
//! text is never cut inside a code point.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::split;
//!
//! let text = "x".repeat(1200);
//! let chunks = split(&text, 500, 100).unwrap();
//! assert_eq!(chunks.len(), 3);
//! ```

use crate::config::ChunkingConfig;
use crate::error::ChunkError;
use crate::models::Chunk;

const PARAGRAPH: &[&str] = &["\n\n"];
const SENTENCE: &[&str] = &["\n", "。", ". ", "! ", "? ", "！", "？"];
const WHITESPACE: &[&str] = &[" ", "\t", "\u{3000}"];

/// Separator classes in priority order.
const SEPARATOR_CLASSES: &[&[&str]] = &[PARAGRAPH, SENTENCE, WHITESPACE];

/// Split `text` into overlapping chunks of at most `chunk_size` characters.
///
/// # Errors
///
/// [`ChunkError::InvalidConfig`] when `chunk_size` is zero or `overlap`
/// is not smaller than `chunk_size`.
///
/// # Guarantees
///
/// - Empty input yields no chunks.
/// - Every chunk has at most `chunk_size` characters.
/// - The last `overlap` characters of a chunk start the next one.
/// - The same input and parameters always give the same output.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::InvalidConfig(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(ChunkError::InvalidConfig(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus the end of the string.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let limit = start + chunk_size;
        if limit >= total_chars {
            chunks.push(text[offsets[start]..].to_string());
            break;
        }

        let window = &text[offsets[start]..offsets[limit]];
        let len = find_break(window, overlap + 1, SEPARATOR_CLASSES).unwrap_or(chunk_size);
        let end = start + len;
        chunks.push(text[offsets[start]..offsets[end]].to_string());
        start = end - overlap;
    }

    Ok(chunks)
}

/// Find the character length of the longest prefix of `window` that ends
/// right after a separator of the highest-priority class that has one,
/// ignoring prefixes shorter than `min_chars`.
fn find_break(window: &str, min_chars: usize, classes: &[&[&str]]) -> Option<usize> {
    let (separators, lower) = classes.split_first()?;

    let last_end = separators
        .iter()
        .filter_map(|sep| window.rfind(sep).map(|pos| pos + sep.len()))
        .max();

    match last_end {
        Some(byte_end) => {
            let chars = window[..byte_end].chars().count();
            if chars >= min_chars {
                Some(chars)
            } else {
                find_break(window, min_chars, lower)
            }
        }
        None => find_break(window, min_chars, lower),
    }
}

/// Chunk one document's text into [`Chunk`]s with deterministic IDs.
///
/// Chunk IDs are `"{source_name}-{ordinal}"`, so chunking the same text with
/// the same settings reproduces the same IDs and a re-upsert overwrites the
/// previous entries instead of adding new ones.
pub fn chunk_document(
    document_id: &str,
    source_name: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, ChunkError> {
    let pieces = split(text, config.chunk_size, config.overlap)?;
    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(ordinal, text)| Chunk {
            id: chunk_id(source_name, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text,
            source_name: source_name.to_string(),
        })
        .collect())
}

/// The vector-store ID of a chunk.
pub fn chunk_id(source_name: &str, ordinal: usize) -> String {
    format!("{}-{}", source_name, ordinal)
}

/// Undo the overlap: concatenate chunks, dropping each later chunk's
/// first `overlap` characters.
pub fn merge_overlapping(chunks: &[String], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(chunk);
        } else {
            out.extend(chunk.chars().skip(overlap));
        }
    }
    out
}
