//! Format identifiers for the standalone files this crate writes.
//!
//! Every file written directly to the blob store that isn't addressed purely
//! by convention (`start.idx`, `<id>.header`, `<id>.chunk`, `events/*`)
//! carries one of these at the front so that additive schema evolution can
//! be detected before the rest of the record is decoded.

use std::{fmt, io, str::FromStr};

use serde::{de::Visitor, Deserialize, Serialize};

/// Which on-disk record kind a [`FormatIdentifier`] describes.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatVariant {
    /// A chunk body (`<id>.chunk`).
    KvChunk,
    /// A chunk header (`<id>.header`).
    KvHeader,
}

impl FormatVariant {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "tkv-chunk" => Some(Self::KvChunk),
            "tkv-header" => Some(Self::KvHeader),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::KvChunk => "tkv-chunk",
            Self::KvHeader => "tkv-header",
        }
    }
}

impl fmt::Display for FormatVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The variant and version of a persisted record's encoding.
///
/// String representation is `<variant>/<major>.<minor>.<patch>`, following
/// the same leading-zero-sensitive semantic versioning Cargo itself uses:
/// while `major` is `0`, a change in `minor` is treated as breaking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatIdentifier {
    pub variant: FormatVariant,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FormatIdentifier {
    /// Returns whether a reader built against `self`'s version can decode
    /// data written at `version`.
    pub fn can_read_version(&self, version: &FormatIdentifier) -> bool {
        let current = self;

        if current.variant != version.variant {
            return false;
        }
        if current.major != version.major {
            return false;
        }

        if current.major == 0 {
            if current.minor != version.minor {
                return false;
            }
            if current.minor == 0 && current.patch != version.patch {
                return false;
            }
            if current.patch >= version.patch {
                return true;
            }
        }

        current.minor >= version.minor
    }

    pub fn try_from_io(reader: impl io::Read) -> Result<Self, ReadFormatIdentifierError> {
        let mut reader = reader;
        let mut buffer = vec![0_u8; 32];

        match postcard::from_io((&mut reader, buffer.as_mut_slice())) {
            Ok((raw_value, _)) => FormatIdentifier::from_str(raw_value)
                .map_err(ReadFormatIdentifierError::Invalid),
            Err(postcard::Error::DeserializeUnexpectedEnd) => {
                Err(ReadFormatIdentifierError::TooLong)
            }
            Err(err) => Err(ReadFormatIdentifierError::PostcardReadFailed(err)),
        }
    }
}

impl fmt::Display for FormatIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{variant}/{major}.{minor}.{patch}",
            variant = self.variant,
            major = self.major,
            minor = self.minor,
            patch = self.patch,
        )
    }
}

impl FromStr for FormatIdentifier {
    type Err = ParseFormatVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split('/').collect::<Vec<_>>();
        if parts.len() != 2 {
            return Err(ParseFormatVersionError::IncorrectParts);
        }

        let variant = FormatVariant::from_str(parts[0])
            .ok_or_else(|| ParseFormatVersionError::UnknownVariant(parts[0].into()))?;

        let ver_parts = parts[1].split('.').collect::<Vec<_>>();
        if ver_parts.len() != 3 {
            return Err(ParseFormatVersionError::InvalidVersion(parts[1].into()));
        }

        let invalid_version = |_err| ParseFormatVersionError::InvalidVersion(parts[1].into());
        let major = ver_parts[0].parse().map_err(invalid_version)?;
        let minor = ver_parts[1].parse().map_err(invalid_version)?;
        let patch = ver_parts[2].parse().map_err(invalid_version)?;

        Ok(Self {
            variant,
            major,
            minor,
            patch,
        })
    }
}

/// An error parsing a [`FormatIdentifier`] from its string representation.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseFormatVersionError {
    IncorrectParts,
    UnknownVariant(String),
    InvalidVersion(String),
}

impl fmt::Display for ParseFormatVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncorrectParts => write!(
                f,
                "expected '<variant>/<major>.<minor>.<patch>' with exactly one '/'"
            ),
            Self::UnknownVariant(variant) => write!(f, "unrecognised variant: {variant}"),
            Self::InvalidVersion(version) => {
                write!(f, "expected '<major>.<minor>.<patch>', found '{version}'")
            }
        }
    }
}

/// An error reading a [`FormatIdentifier`] from a reader.
#[derive(Debug)]
pub enum ReadFormatIdentifierError {
    PostcardReadFailed(postcard::Error),
    TooLong,
    Invalid(ParseFormatVersionError),
}

impl fmt::Display for ReadFormatIdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostcardReadFailed(err) => write!(f, "could not read format identifier: {err}"),
            Self::TooLong => write!(f, "format identifier longer than the reserved buffer"),
            Self::Invalid(err) => write!(f, "invalid format identifier: {err}"),
        }
    }
}

impl std::error::Error for ReadFormatIdentifierError {}

impl Serialize for FormatIdentifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{self}"))
    }
}

struct FormatIdentifierVisitor;

impl<'de> Visitor<'de> for FormatIdentifierVisitor {
    type Value = FormatIdentifier;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a format identifier string, e.g. 'tkv-chunk/0.1.0'")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        FormatIdentifier::from_str(v).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for FormatIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(FormatIdentifierVisitor)
    }
}

pub fn current_chunk_version() -> FormatIdentifier {
    FormatIdentifier {
        variant: FormatVariant::KvChunk,
        major: 0,
        minor: 1,
        patch: 0,
    }
}

pub fn current_header_version() -> FormatIdentifier {
    FormatIdentifier {
        variant: FormatVariant::KvHeader,
        major: 0,
        minor: 1,
        patch: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = current_chunk_version();
        let parsed: FormatIdentifier = format!("{id}").parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_mismatched_variant() {
        let chunk = current_chunk_version();
        let header = current_header_version();
        assert!(!chunk.can_read_version(&header));
    }

    #[test]
    fn pre_1_0_requires_matching_minor() {
        let reader = FormatIdentifier {
            variant: FormatVariant::KvChunk,
            major: 0,
            minor: 1,
            patch: 2,
        };
        let older = FormatIdentifier {
            variant: FormatVariant::KvChunk,
            major: 0,
            minor: 1,
            patch: 0,
        };
        let different_minor = FormatIdentifier {
            variant: FormatVariant::KvChunk,
            major: 0,
            minor: 0,
            patch: 9,
        };
        assert!(reader.can_read_version(&older));
        assert!(!reader.can_read_version(&different_minor));
    }
}
