use std::io::{ErrorKind, Read};
use std::iter::FusedIterator;

use tracing::trace;

use super::{Packet, PrimaryHeader, RawPacket};
use crate::{Error, Result};

/// Iterates the packets of an in-memory packet stream without copying.
///
/// Each step reads a primary header and advances by the length it declares. A trailing
/// partial header produces [Error::TruncatedHeader] and a declared length running past the
/// end of the buffer produces [Error::CorruptStream]. Either ends iteration; there is no
/// attempt to resynchronize.
///
/// # Examples
/// ```
/// use ccsds_tlm::spacepacket::PacketSlices;
///
/// let dat: &[u8] = &[
///     0x08, 0x02, 0xc0, 0x00, 0x00, 0x01, 0xaa, 0xbb,
///     0x08, 0x03, 0xc0, 0x01, 0x00, 0x00, 0xcc,
/// ];
/// let apids: Vec<u16> = PacketSlices::new(dat)
///     .map(|zult| zult.unwrap().header.apid)
///     .collect();
/// assert_eq!(apids, vec![2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct PacketSlices<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> PacketSlices<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            done: false,
        }
    }

    /// Number of bytes consumed by the packets produced so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for PacketSlices<'a> {
    type Item = Result<RawPacket<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.buf.len() {
            return None;
        }
        let remaining = &self.buf[self.offset..];

        let header = match PrimaryHeader::decode(remaining) {
            Ok(header) => header,
            Err(_) => {
                self.done = true;
                return Some(Err(Error::TruncatedHeader {
                    offset: self.offset,
                    available: remaining.len(),
                }));
            }
        };
        let need = header.packet_len();
        if remaining.len() < need {
            self.done = true;
            return Some(Err(Error::CorruptStream {
                offset: self.offset,
                declared: need,
                available: remaining.len(),
            }));
        }

        let packet = RawPacket {
            header,
            offset: self.offset,
            data: &remaining[..need],
        };
        trace!(offset = self.offset, apid = header.apid, len = need, "packet");
        self.offset += need;
        Some(Ok(packet))
    }
}

impl FusedIterator for PacketSlices<'_> {}

/// Read into `buf` until it is full or the reader is exhausted, returning the number of
/// bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Iterates the packets of a packet stream provided by a reader, holding at most one
/// packet in memory.
///
/// Errors are the same as [PacketSlices], plus [Error::Io] for read failures.
pub struct PacketReaderIter<R>
where
    R: Read,
{
    reader: R,
    offset: usize,
    done: bool,
}

impl<R> PacketReaderIter<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        PacketReaderIter {
            reader,
            offset: 0,
            done: false,
        }
    }

    /// Number of bytes consumed by the packets produced so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_packet(&mut self) -> Option<Result<Packet>> {
        let mut hdr = [0u8; PrimaryHeader::LEN];
        let got = match read_full(&mut self.reader, &mut hdr) {
            Ok(n) => n,
            Err(err) => return Some(Err(err.into())),
        };
        if got == 0 {
            return None;
        }
        if got < PrimaryHeader::LEN {
            return Some(Err(Error::TruncatedHeader {
                offset: self.offset,
                available: got,
            }));
        }

        let header = match PrimaryHeader::decode(&hdr) {
            Ok(header) => header,
            Err(err) => return Some(Err(err)),
        };
        let need = header.packet_len();
        let mut data = vec![0u8; need];
        data[..PrimaryHeader::LEN].copy_from_slice(&hdr);
        let got = match read_full(&mut self.reader, &mut data[PrimaryHeader::LEN..]) {
            Ok(n) => n,
            Err(err) => return Some(Err(err.into())),
        };
        if got < need - PrimaryHeader::LEN {
            return Some(Err(Error::CorruptStream {
                offset: self.offset,
                declared: need,
                available: PrimaryHeader::LEN + got,
            }));
        }

        let packet = Packet {
            header,
            data,
            offset: self.offset,
        };
        trace!(offset = self.offset, apid = header.apid, len = need, "packet");
        self.offset += need;
        Some(Ok(packet))
    }
}

impl<R> Iterator for PacketReaderIter<R>
where
    R: Read,
{
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let zult = self.read_packet();
        if !matches!(zult, Some(Ok(_))) {
            self.done = true;
        }
        zult
    }
}

impl<R: Read> FusedIterator for PacketReaderIter<R> {}

/// Return an iterator providing [Packet]s read from a byte synchronized packet stream.
///
/// # Examples
/// ```
/// use ccsds_tlm::spacepacket::read_packets;
///
/// let dat: &[u8] = &[
///     // primary header bytes
///     0xd, 0x59, 0xd2, 0xab, 0x0, 0x0,
///     // minimum 1 byte of user data
///     0xff
/// ];
///
/// read_packets(dat).for_each(|zult| {
///     let packet = zult.unwrap();
///     assert_eq!(packet.header.apid, 1369);
/// });
/// ```
pub fn read_packets<R>(reader: R) -> PacketReaderIter<R>
where
    R: Read,
{
    PacketReaderIter::new(reader)
}
