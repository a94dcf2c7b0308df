//! Length-prefixed legacy strings.
//!
//! Pascal strings carry one length byte, that many bytes of text in an 8-bit
//! platform code page, and zero padding so the total is a multiple of the
//! host section's padding rule (1, 2 or 4). The text is decoded to Unicode
//! at this boundary and the rest of the crate only ever sees `String`s;
//! when a `luni` tagged block is present its UTF-16 name overrides the
//! legacy one.

use encoding::all::{MAC_ROMAN, WINDOWS_1252};
use encoding::{DecoderTrap, EncoderTrap, Encoding};

use crate::error::{PsdError, Result};

/// The legacy 8-bit code page a document's Pascal strings are encoded in.
///
/// Photoshop picks the code page of the authoring host; files written by
/// this crate use Windows-1252 unless told otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CodePage {
    /// The Windows Latin-1 superset.
    #[default]
    Windows1252,
    /// The classic Mac OS roman code page.
    MacRoman,
}

impl CodePage {
    fn encoding(self) -> &'static dyn Encoding {
        match self {
            CodePage::Windows1252 => WINDOWS_1252,
            CodePage::MacRoman => MAC_ROMAN,
        }
    }
}

/// Decode the payload of a Pascal string (without its length byte).
pub(crate) fn decode(bytes: &[u8], code_page: CodePage) -> String {
    code_page
        .encoding()
        .decode(bytes, DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

/// Encode `text` as a full Pascal string: length byte, payload, padding.
///
/// `pad` is the host section's alignment (1, 2 or 4); the returned buffer's
/// length is a multiple of it. Text longer than 255 encoded bytes is a
/// [`PsdError::StructuralError`].
pub(crate) fn encode(text: &str, pad: usize, code_page: CodePage) -> Result<Vec<u8>> {
    let payload = code_page
        .encoding()
        .encode(text, EncoderTrap::Replace)
        .map_err(|err| PsdError::InvalidArgument(format!("unencodable layer name: {}", err)))?;

    if payload.len() > 255 {
        return Err(PsdError::StructuralError(format!(
            "pascal string of {} bytes exceeds the 255 byte limit",
            payload.len()
        )));
    }

    let mut bytes = Vec::with_capacity(padded_len(payload.len(), pad));
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(&payload);
    bytes.resize(padded_len(payload.len(), pad), 0);
    Ok(bytes)
}

/// Total on-disk length of a Pascal string holding `payload_len` bytes,
/// including the length byte and padding.
pub(crate) fn padded_len(payload_len: usize, pad: usize) -> usize {
    let total = payload_len + 1;
    total.div_ceil(pad) * pad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pads_to_four() {
        // Length(1) + "Test"(4) = 5, padded to 8.
        let bytes = encode("Test", 4, CodePage::Windows1252).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(bytes[0], 4);
        assert_eq!(&bytes[1..5], b"Test");
        assert_eq!(&bytes[5..], &[0, 0, 0]);
    }

    #[test]
    fn encode_empty_name_pads_to_two() {
        let bytes = encode("", 2, CodePage::Windows1252).unwrap();
        assert_eq!(bytes, vec![0, 0]);
    }

    #[test]
    fn round_trip_windows_1252() {
        let text = "Caf\u{e9} layer";
        let bytes = encode(text, 1, CodePage::Windows1252).unwrap();
        let len = bytes[0] as usize;
        assert_eq!(decode(&bytes[1..1 + len], CodePage::Windows1252), text);
    }

    #[test]
    fn round_trip_mac_roman() {
        let text = "Ombre \u{2022} 2";
        let bytes = encode(text, 1, CodePage::MacRoman).unwrap();
        let len = bytes[0] as usize;
        assert_eq!(decode(&bytes[1..1 + len], CodePage::MacRoman), text);
    }

    #[test]
    fn oversize_string_is_rejected() {
        let text: String = std::iter::repeat('x').take(256).collect();
        assert!(matches!(
            encode(&text, 2, CodePage::Windows1252),
            Err(PsdError::StructuralError(_))
        ));
    }

    #[test]
    fn padded_len_examples() {
        assert_eq!(padded_len(0, 2), 2);
        assert_eq!(padded_len(4, 4), 8);
        assert_eq!(padded_len(3, 4), 4);
        assert_eq!(padded_len(7, 1), 8);
    }
}
