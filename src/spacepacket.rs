//! CCSDS space packet primary header and packet iteration.
//!
//! References:
//! * CCSDS Space Packet Protocol 133.0-B-2
//!     - <https://public.ccsds.org/Pubs/133x0b2e1.pdf>
mod stream;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use stream::{read_packets, PacketReaderIter, PacketSlices};

pub type Apid = u16;

/// Packet is not part of a packet group, i.e., standalone.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// CCSDS Primary Header
///
/// The primary header format is common to all CCSDS space packets.
///
/// # Example
/// ```
/// use ccsds_tlm::spacepacket::PrimaryHeader;
///
/// // version 0, secondary header flag set, APID 2, unsegmented, sequence 0, 2 byte data field
/// let hdr = PrimaryHeader::decode(&[0x08, 0x02, 0xc0, 0x00, 0x00, 0x01]).unwrap();
/// assert_eq!(hdr.apid, 2);
/// assert_eq!(hdr.packet_len(), 8);
/// ```
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Defines a packets grouping, e.g., [SEQ_UNSEGMENTED].
    pub sequence_flags: u8,
    pub sequence_id: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;
    pub const APID_MAX: Apid = 0x7ff;

    /// Decode from bytes.
    ///
    /// # Errors
    /// [Error::TruncatedHeader] if there are fewer than [Self::LEN] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::TruncatedHeader {
                offset: 0,
                available: buf.len(),
            });
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Ok(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Encode to bytes. Values wider than their header field are truncated to it.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::LEN] {
        let d1 = (u16::from(self.version & 0x7) << 13)
            | (u16::from(self.type_flag & 0x1) << 12)
            | (u16::from(self.has_secondary_header) << 11)
            | (self.apid & 0x7ff);
        let d2 = (u16::from(self.sequence_flags & 0x3) << 14) | (self.sequence_id & 0x3fff);
        let mut buf = [0u8; Self::LEN];
        buf[..2].copy_from_slice(&d1.to_be_bytes());
        buf[2..4].copy_from_slice(&d2.to_be_bytes());
        buf[4..].copy_from_slice(&self.len_minus1.to_be_bytes());
        buf
    }

    /// Number of bytes in the packet data field, including any secondary header.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.len_minus1 as usize + 1
    }

    /// Total packet length, primary header included.
    ///
    /// The secondary header is part of the packet data field, so its length is already
    /// accounted for by the header's data length.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.data_len()
    }

    /// Offset from the start of the packet to the user data, skipping a secondary header of
    /// `secondary_header_len` bytes when this packet flags one.
    #[must_use]
    pub fn data_offset(&self, secondary_header_len: usize) -> usize {
        if self.has_secondary_header {
            Self::LEN + secondary_header_len
        } else {
            Self::LEN
        }
    }
}

/// A packet borrowed from a larger buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub header: PrimaryHeader,
    /// Byte offset of the packet in its source stream.
    pub offset: usize,
    /// All packet bytes, including the primary header.
    pub data: &'a [u8],
}

/// Common view of borrowed and owned packets.
pub trait PacketView {
    fn header(&self) -> &PrimaryHeader;
    /// Byte offset of the packet in its source stream.
    fn offset(&self) -> usize;
    /// All packet bytes, including the primary header.
    fn bytes(&self) -> &[u8];
}

impl PacketView for RawPacket<'_> {
    fn header(&self) -> &PrimaryHeader {
        &self.header
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn bytes(&self) -> &[u8] {
        self.data
    }
}

impl PacketView for Packet {
    fn header(&self) -> &PrimaryHeader {
        &self.header
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// An owned CCSDS space packet, as produced by [read_packets].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PrimaryHeader,
    /// All packet bytes, including header and user data
    pub data: Vec<u8>,
    /// Byte offset of the packet in its source stream.
    pub offset: usize,
}

/// Calculate the number of missing sequence ids.
///
/// `cur` is the current sequence id. `last` is the sequence id seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let expected = if last + 1 > PrimaryHeader::SEQ_MAX {
        0
    } else {
        last + 1
    };
    if cur != expected {
        if last + 1 > cur {
            return cur + PrimaryHeader::SEQ_MAX - last;
        }
        return cur - last - 1;
    }
    0
}
