//! Modified UTF-8 as used by `CONSTANT_Utf8`
//!
//! Differs from standard UTF-8 in two ways: U+0000 is written as the two
//! bytes `C0 80`, and supplementary characters are written as a surrogate
//! pair with each half encoded on three bytes.

/// Decode modified UTF-8
///
/// Returns `None` for truncated or structurally invalid sequences. Unpaired
/// surrogates decode to U+FFFD.
pub fn decode(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        match b0 {
            0x01..=0x7f => {
                units.push(u16::from(b0));
                i += 1;
            }
            0xc0..=0xdf => {
                let b1 = continuation(bytes, i + 1)?;
                units.push(u16::from(b0 & 0x1f) << 6 | b1);
                i += 2;
            }
            0xe0..=0xef => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push(u16::from(b0 & 0x0f) << 12 | b1 << 6 | b2);
                i += 3;
            }
            _ => return None,
        }
    }
    Some(char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect())
}

fn continuation(bytes: &[u8], at: usize) -> Option<u16> {
    match bytes.get(at) {
        Some(&b) if b & 0xc0 == 0x80 => Some(u16::from(b & 0x3f)),
        _ => None,
    }
}

/// Encode a string as modified UTF-8
#[allow(clippy::cast_possible_truncation)]
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_is_unchanged() {
        assert_eq!(encode("java/lang/Object"), b"java/lang/Object");
        assert_eq!(decode(b"<init>").as_deref(), Some("<init>"));
    }

    #[test]
    fn test_nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xc0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xc0, 0x80, b'b']).as_deref(), Some("a\0b"));
    }

    #[test]
    fn test_supplementary_uses_surrogate_pair() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode(&encoded).as_deref(), Some("\u{1F600}"));
    }

    #[test]
    fn test_truncated_sequence_rejected() {
        assert_eq!(decode(&[0xe2, 0x82]), None);
        assert_eq!(decode(&[0x00]), None);
    }
}
