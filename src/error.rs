//! The error taxonomy shared by every fallible operation in the crate.
//!
//! Decode errors are fatal to the operation that raised them; the partially
//! constructed document is dropped. Parse failures for *known* tagged-block
//! keys are the one exception: they are downgraded to raw-byte preservation
//! by the registry and never surface here.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PsdError>;

/// Any error raised while reading, manipulating or writing a document.
#[derive(Debug, Error)]
pub enum PsdError {
    /// An underlying OS-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A read past the recorded size of the file, or a write exceeding the
    /// planned size of a section.
    #[error("attempted to access {requested} bytes at offset {offset} but only {available} bytes are available")]
    IoOverflow {
        /// Offset the access started at
        offset: u64,
        /// Number of bytes requested
        requested: u64,
        /// Number of bytes actually available
        available: u64,
    },

    /// A 4-byte magic value did not match any of its allowed values.
    #[error("invalid signature while reading {location}: found {}", display_tag(.found))]
    InvalidSignature {
        /// Which structure was being read
        location: &'static str,
        /// The four bytes that were found instead
        found: [u8; 4],
    },

    /// API misuse: a value outside its documented range, a channel count
    /// that does not match the color mode, a chunk buffer of the wrong size.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The document structure is internally inconsistent: unmatched section
    /// dividers, channel lengths that disagree with the channel data
    /// section, an oversize Pascal string.
    #[error("structural error: {0}")]
    StructuralError(String),

    /// The file is well formed but requests something the library does not
    /// implement (1-bit compositing, channel indexing for exotic color
    /// modes, an unmapped blend mode key).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// `extract` was called on a channel whose buffer was already moved out.
    #[error("channel {channel} was already extracted")]
    AlreadyExtracted {
        /// The channel's numeric id
        channel: i16,
    },

    /// A codec produced less data than `width * height * size_of::<T>()`
    /// or refused its input.
    #[error("compression error: {0}")]
    CompressionError(String),

    /// The progress callback requested cancellation. Checked between
    /// sections and chunks, never mid-chunk.
    #[error("operation cancelled by caller")]
    Cancelled,
}

/// Renders a 4-byte key as ASCII where possible, hex otherwise.
fn display_tag(tag: &[u8; 4]) -> String {
    if tag.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        format!("'{}'", String::from_utf8_lossy(tag))
    } else {
        format!("{:02x?}", tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_error_displays_ascii_tag() {
        let err = PsdError::InvalidSignature {
            location: "file header",
            found: *b"8BPX",
        };
        assert!(err.to_string().contains("'8BPX'"));
    }

    #[test]
    fn signature_error_displays_hex_for_binary_tag() {
        let err = PsdError::InvalidSignature {
            location: "tagged block",
            found: [0, 1, 2, 3],
        };
        assert!(err.to_string().contains("00"));
    }
}
