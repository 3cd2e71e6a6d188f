//! Byte scanning helpers shared by the metadata and change routing code.
//!
//! Frames are scanned as raw bytes. All markers are ASCII, so offsets found
//! here are always valid slice boundaries for the frame they came from.

/// Offset of the first occurrence of `needle` in `haystack` at or after `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Offset of the first `byte` in `haystack` at or after `from`.
pub fn find_byte(haystack: &[u8], byte: u8, from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .iter()
        .position(|&b| b == byte)
        .map(|pos| pos + from)
}

/// Find the `close` byte matching an `open` that precedes `from`.
///
/// Scanning starts at `from` with one level already open. Returns the offset
/// of the last byte examined: the matching `close` when the brackets balance,
/// `text.len() - 1` when they don't, and `from - 1` when there is nothing left
/// to scan.
pub fn closing_marker(text: &[u8], from: usize, open: u8, close: u8) -> usize {
    let mut depth = 1usize;
    let mut j = from;
    while j < text.len() && depth > 0 {
        let b = text[j];
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
        }
        j += 1;
    }
    j.saturating_sub(1)
}
