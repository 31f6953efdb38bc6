use crate::schema::{DataKind, SchemaError};
use crate::spacepacket::Apid;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A bit range reaching past the end of the buffer was handed to the bit extractor.
    ///
    /// The decoder checks field bounds before extracting, so this indicates a schema or
    /// offset bug rather than bad data.
    #[error("bit range {offset}+{width} exceeds buffer of {available} bits")]
    Range {
        offset: u64,
        width: u64,
        available: u64,
    },

    #[error("width of {width} bits is not valid for {kind} values")]
    InvalidWidth { kind: DataKind, width: u64 },

    /// Fewer than [PrimaryHeader::LEN](crate::spacepacket::PrimaryHeader::LEN) bytes
    /// remained where a primary header was expected.
    #[error("truncated primary header at offset {offset}: {available} of 6 bytes available")]
    TruncatedHeader { offset: usize, available: usize },

    /// A packet declared more bytes than remain in the stream.
    #[error("packet at offset {offset} declares {declared} bytes but only {available} remain")]
    CorruptStream {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("no schema for APID {apid} (packet at offset {offset})")]
    UnknownApid { apid: Apid, offset: usize },

    /// A field's bit range extends past the end of its packet body.
    #[error("field {field} spans bits {start}..{end} of a {available} bit body")]
    FieldOverrun {
        field: String,
        start: u64,
        end: u64,
        available: u64,
    },

    /// A field could not be placed or sized because a field it depends on was missing.
    #[error("field {field} depends on {depends_on}, which could not be decoded")]
    MissingDependency { field: String, depends_on: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that only affect a single packet and leave the rest of the stream
    /// decodable.
    #[must_use]
    pub fn is_per_packet(&self) -> bool {
        matches!(
            self,
            Error::FieldOverrun { .. } | Error::MissingDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
