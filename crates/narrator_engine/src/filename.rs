use sha2::{Digest, Sha256};
use url::Url;

const MAX_STEM_CHARS: usize = 80;

/// Windows-safe, deterministic download name:
/// `{sanitized_title}--{short_hash(url)}.wav`.
///
/// The same page converted twice lands on the same file. Pages without a
/// usable title fall back to a stem derived from the URL, then to `audio`.
pub fn derive_output_filename(title: Option<&str>, url: &str) -> String {
    let stem = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(sanitize_stem)
        .or_else(|| stem_from_url(url))
        .unwrap_or_else(|| "audio".to_string());
    format!("{stem}--{}.wav", short_hash(url))
}

/// Last meaningful path segment of the URL, else its host.
fn stem_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(str::to_string);
    let raw = segment.or_else(|| parsed.host_str().map(str::to_string))?;
    let stem = sanitize_stem(&raw);
    (stem != "untitled").then_some(stem)
}

fn sanitize_stem(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }

    let mut stem: String = compacted.chars().take(MAX_STEM_CHARS).collect();
    if stem.is_empty() {
        stem = "untitled".to_string();
    }
    if is_reserved_windows_name(&stem) {
        stem.push('_');
    }
    stem
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
