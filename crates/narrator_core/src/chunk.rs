//! Token estimation and provider-safe text chunking.
//!
//! The estimator intentionally over-counts so that chunks land conservatively
//! under provider limits. The splitter works paragraph-first, falls back to
//! sentences for oversized paragraphs, and finally to fixed-size character
//! slices for spans with no usable sentence boundaries. Nothing is dropped:
//! every piece of the input lands in exactly one chunk, in original order,
//! and each chunk remembers the separator that preceded it so the sequence
//! can be reassembled.

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";
const SLICE_SEP: &str = "";

/// An ordered, zero-indexed segment of one job's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    /// Sum of the estimates of the pieces packed into this chunk.
    pub estimated_tokens: u32,
    /// Separator between this chunk and the previous one in the source text;
    /// empty for the first chunk. Concatenating `separator + text` in order
    /// reproduces the input up to whitespace collapsing — exactly so across
    /// mid-word slice boundaries, where the separator is empty.
    pub separator: &'static str,
}

/// Estimates the provider-billable token count for `text`:
/// `ceil(max(chars / 4, words * 1.3))`.
pub fn estimate_token_count(text: &str) -> u32 {
    let chars = text.chars().count();
    let words = text.split_whitespace().count();
    let by_chars = chars as f64 / 4.0;
    let by_words = words as f64 * 1.3;
    by_chars.max(by_words).ceil() as u32
}

/// Splits `text` into ordered chunks whose estimated token counts stay within
/// `max_tokens`.
///
/// Paragraphs (blank-line separated) are the packing unit; a paragraph over
/// budget is split at sentence-terminal punctuation, and a sentence still
/// over budget is sliced into fixed-size character runs of roughly
/// `max_tokens * 4` characters. A slice can still estimate over budget
/// through the word-count branch of the estimator; it is admitted as-is,
/// since no further splitting can help.
///
/// Empty or whitespace-only input yields no chunks.
pub fn split_text_into_chunks(text: &str, max_tokens: u32) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut pieces: Vec<Piece> = Vec::new();
    for paragraph in paragraphs(text) {
        if estimate_token_count(&paragraph) <= max_tokens {
            pieces.push(Piece::new(paragraph, PARAGRAPH_SEP));
            continue;
        }
        let mut paragraph_sep = PARAGRAPH_SEP;
        for sentence in split_sentences(&paragraph) {
            let sep = std::mem::replace(&mut paragraph_sep, SENTENCE_SEP);
            if estimate_token_count(&sentence) <= max_tokens {
                pieces.push(Piece::new(sentence, sep));
            } else {
                let mut slice_sep = sep;
                for slice in slice_chars(&sentence, max_tokens) {
                    pieces.push(Piece::new(slice, std::mem::replace(&mut slice_sep, SLICE_SEP)));
                }
            }
        }
    }

    pack(pieces, max_tokens)
}

/// One splittable unit plus the separator that preceded it in the source.
struct Piece {
    text: String,
    tokens: u32,
    sep: &'static str,
}

impl Piece {
    fn new(text: String, sep: &'static str) -> Self {
        let tokens = estimate_token_count(&text);
        Self { text, tokens, sep }
    }
}

/// Blank-line separated paragraphs, trimmed, empties skipped.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            push_trimmed(&mut out, &current);
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    push_trimmed(&mut out, &current);
    out
}

/// Splits after sentence-terminal punctuation followed by whitespace.
/// Closing quotes and brackets stay attached to their sentence.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if matches!(next, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{00bb}') {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek().map_or(true, |next| next.is_whitespace()) {
            push_trimmed(&mut out, &current);
            current.clear();
        }
    }
    push_trimmed(&mut out, &current);
    out
}

/// Fixed-size character slices sized so `chars / 4` lands near `max_tokens`.
/// Slices are kept verbatim — no trimming — so adjacent slices reassemble
/// into the original span exactly.
fn slice_chars(span: &str, max_tokens: u32) -> Vec<String> {
    let slice_len = (max_tokens as usize * 4).max(1);
    let chars: Vec<char> = span.chars().collect();
    chars
        .chunks(slice_len)
        .map(|slice| slice.iter().collect())
        .collect()
}

/// Greedy packing: append pieces while the running estimate stays within
/// budget, otherwise flush and start a new chunk.
fn pack(pieces: Vec<Piece>, max_tokens: u32) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Option<TextChunk> = None;

    for piece in pieces {
        match current.as_mut() {
            Some(chunk) if chunk.estimated_tokens + piece.tokens <= max_tokens => {
                chunk.text.push_str(piece.sep);
                chunk.text.push_str(&piece.text);
                chunk.estimated_tokens += piece.tokens;
            }
            Some(_) => {
                if let Some(done) = current.take() {
                    chunks.push(done);
                }
                current = Some(open_chunk(chunks.len(), piece, chunks.is_empty()));
            }
            None => {
                current = Some(open_chunk(chunks.len(), piece, true));
            }
        }
    }
    if let Some(done) = current {
        chunks.push(done);
    }
    chunks
}

fn open_chunk(index: usize, piece: Piece, first: bool) -> TextChunk {
    TextChunk {
        index,
        text: piece.text,
        estimated_tokens: piece.tokens,
        separator: if first { "" } else { piece.sep },
    }
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
