//! Shared encode/decode helpers.
//!
//! Every persisted record is `postcard`-encoded then gzip-compressed via
//! `flate2`. Additive schema evolution is handled by
//! [`crate::identifier::FormatIdentifier`] version tags rather than a
//! self-describing-by-field-name format — see DESIGN.md.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};

use crate::identifier::{FormatIdentifier, ReadFormatIdentifierError};

/// Encodes `value` with postcard, then gzip-compresses the result.
pub fn encode_compressed<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let raw = postcard::to_allocvec(value).map_err(CodecError::EncodingFailure)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(CodecError::IoFailure)?;
    encoder.finish().map_err(CodecError::IoFailure)
}

/// Reverses [`encode_compressed`].
pub fn decode_compressed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw).map_err(CodecError::IoFailure)?;
    postcard::from_bytes(&raw).map_err(CodecError::DecodingFailure)
}

/// Prepends `identifier` (postcard-encoded, uncompressed) to the
/// gzip-compressed, postcard-encoded `value`. This is the on-disk form of
/// chunk headers and chunk bodies: a short version tag, then the payload.
pub fn encode_versioned<T: Serialize>(
    identifier: &FormatIdentifier,
    value: &T,
) -> Result<Vec<u8>, CodecError> {
    let mut out = postcard::to_allocvec(identifier).map_err(CodecError::EncodingFailure)?;
    out.extend_from_slice(&encode_compressed(value)?);
    Ok(out)
}

/// Reads a versioned record: checks that `expected` can read the
/// identifier found at the front of `reader`, then decodes the remainder.
pub fn decode_versioned<T: DeserializeOwned>(
    expected: &FormatIdentifier,
    mut reader: impl Read,
) -> Result<T, CodecError> {
    let found = FormatIdentifier::try_from_io(&mut reader)
        .map_err(CodecError::UnreadableFormatIdentifier)?;
    if !expected.can_read_version(&found) {
        return Err(CodecError::IncompatibleVersion {
            expected: expected.clone(),
            found,
        });
    }

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).map_err(CodecError::IoFailure)?;
    decode_compressed(&rest)
}

#[derive(Debug)]
pub enum CodecError {
    EncodingFailure(postcard::Error),
    DecodingFailure(postcard::Error),
    IoFailure(std::io::Error),
    UnreadableFormatIdentifier(ReadFormatIdentifierError),
    IncompatibleVersion {
        expected: FormatIdentifier,
        found: FormatIdentifier,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodingFailure(err) => write!(f, "encoding failure: {err}"),
            Self::DecodingFailure(err) => write!(f, "decoding failure: {err}"),
            Self::IoFailure(err) => write!(f, "i/o failure: {err}"),
            Self::UnreadableFormatIdentifier(err) => {
                write!(f, "could not read format identifier: {err}")
            }
            Self::IncompatibleVersion { expected, found } => write!(
                f,
                "incompatible format version: reader supports {expected}, record is {found}"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::current_chunk_version;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn compressed_round_trips() {
        let sample = Sample {
            a: 7,
            b: "hello".into(),
        };
        let encoded = encode_compressed(&sample).unwrap();
        let decoded: Sample = decode_compressed(&encoded).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn versioned_round_trips() {
        let sample = Sample {
            a: 1,
            b: "world".into(),
        };
        let version = current_chunk_version();
        let encoded = encode_versioned(&version, &sample).unwrap();
        let decoded: Sample = decode_versioned(&version, encoded.as_slice()).unwrap();
        assert_eq!(sample, decoded);
    }
}
