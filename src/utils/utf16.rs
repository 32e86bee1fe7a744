//! UTF-16LE decoding helpers.
//!
//! EVTX strings are UTF-16LE throughout. Decoding is forensically lenient:
//! unpaired surrogates are replaced with U+FFFD instead of failing the
//! record.

/// Decode `bytes` as UTF-16LE code units. `bytes.len()` must be even;
/// a trailing odd byte is ignored.
pub(crate) fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Decode a string value buffer: UTF-16LE with at most one trailing NUL
/// code unit stripped.
pub(crate) fn decode_utf16le_string(bytes: &[u8]) -> String {
    let mut end = bytes.len() & !1;
    if end >= 2 && bytes[end - 2] == 0 && bytes[end - 1] == 0 {
        end -= 2;
    }
    decode_utf16le(&bytes[..end])
}

/// Split a buffer of NUL-terminated UTF-16LE strings into its fragments,
/// dropping empty ones. This is the layout of string-array substitutions.
pub(crate) fn split_utf16le_string_array(bytes: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0_usize;
    let even_len = bytes.len() & !1;

    let mut idx = 0_usize;
    while idx + 2 <= even_len {
        if bytes[idx] == 0 && bytes[idx + 1] == 0 {
            if idx > start {
                out.push(decode_utf16le(&bytes[start..idx]));
            }
            start = idx + 2;
        }
        idx += 2;
    }

    if start < even_len {
        out.push(decode_utf16le(&bytes[start..even_len]));
    }

    out
}
