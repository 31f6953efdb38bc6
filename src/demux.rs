//! Routing packets to the schema for their APID.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::schema::{PacketSchema, SchemaSet};
use crate::spacepacket::{missing_packets, Apid, PacketSlices, PacketView};
use crate::{Error, Result};

/// What to do with a packet whose APID has no schema.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedApid {
    /// Skip the packet and count it.
    #[default]
    Skip,
    /// Produce [Error::UnknownApid] and stop.
    Error,
}

/// Packet, byte and gap counts for skipped packets of one APID.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct Skipped {
    pub count: usize,
    pub bytes: usize,
    /// Sequence ids missing between consecutive skipped packets.
    pub missing: usize,

    #[serde(skip)]
    last_sequence_id: Option<u16>,
}

impl Skipped {
    fn add<P: PacketView>(&mut self, packet: &P) {
        let seq = packet.header().sequence_id;
        self.count += 1;
        self.bytes += packet.bytes().len();
        if let Some(last) = self.last_sequence_id {
            self.missing += missing_packets(seq, last) as usize;
        }
        self.last_sequence_id = Some(seq);
    }
}

/// A packet paired with the schema that describes it.
#[derive(Debug, Clone)]
pub struct Dispatched<'s, P> {
    pub packet: P,
    pub schema: &'s PacketSchema,
}

impl<P: PacketView> Dispatched<'_, P> {
    #[must_use]
    pub fn apid(&self) -> Apid {
        self.packet.header().apid
    }

    /// The bytes the schema's field offsets are relative to.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.schema.body(self.packet.header(), self.packet.bytes())
    }
}

/// Pairs each packet of a packet iterator with its schema.
///
/// Any error from the underlying iterator is passed through and ends iteration, as does
/// [Error::UnknownApid] under [UnmatchedApid::Error].
///
/// # Examples
/// ```
/// use ccsds_tlm::demux::{Demux, UnmatchedApid};
/// use ccsds_tlm::schema::{FieldDef, SchemaDef, SchemaSet};
///
/// let schemas = SchemaSet::from_defs([SchemaDef::builder()
///     .name("two")
///     .apids(vec![2])
///     .fields(vec![FieldDef::uint("value", 16)])
///     .build()])
/// .unwrap();
/// let dat: &[u8] = &[
///     0x08, 0x02, 0xc0, 0x00, 0x00, 0x01, 0xaa, 0xbb,
///     0x08, 0x03, 0xc0, 0x01, 0x00, 0x00, 0xcc,
/// ];
///
/// let mut demux = Demux::slices(dat, &schemas, UnmatchedApid::Skip);
/// let bodies: Vec<Vec<u8>> = demux
///     .by_ref()
///     .map(|zult| zult.unwrap().body().to_vec())
///     .collect();
/// assert_eq!(bodies, vec![vec![0xaa, 0xbb]]);
/// assert_eq!(demux.skipped()[&3].count, 1);
/// ```
pub struct Demux<'s, I> {
    packets: I,
    schemas: &'s SchemaSet,
    policy: UnmatchedApid,
    skipped: BTreeMap<Apid, Skipped>,
    done: bool,
}

impl<'a, 's> Demux<'s, PacketSlices<'a>> {
    /// Demultiplex the packets of an in-memory stream.
    #[must_use]
    pub fn slices(buf: &'a [u8], schemas: &'s SchemaSet, policy: UnmatchedApid) -> Self {
        Self::new(PacketSlices::new(buf), schemas, policy)
    }
}

impl<'s, I, P> Demux<'s, I>
where
    I: Iterator<Item = Result<P>>,
    P: PacketView,
{
    pub fn new(packets: I, schemas: &'s SchemaSet, policy: UnmatchedApid) -> Self {
        Self {
            packets,
            schemas,
            policy,
            skipped: BTreeMap::default(),
            done: false,
        }
    }

    /// Packets skipped so far because no schema matched their APID.
    #[must_use]
    pub fn skipped(&self) -> &BTreeMap<Apid, Skipped> {
        &self.skipped
    }
}

impl<'s, I, P> Iterator for Demux<'s, I>
where
    I: Iterator<Item = Result<P>>,
    P: PacketView,
{
    type Item = Result<Dispatched<'s, P>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let packet = match self.packets.next()? {
                Ok(packet) => packet,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            let apid = packet.header().apid;
            if let Some(schema) = self.schemas.get(apid) {
                return Some(Ok(Dispatched { packet, schema }));
            }
            match self.policy {
                UnmatchedApid::Skip => {
                    trace!(apid, offset = packet.offset(), "no schema; skipping");
                    self.skipped.entry(apid).or_default().add(&packet);
                }
                UnmatchedApid::Error => {
                    self.done = true;
                    return Some(Err(Error::UnknownApid {
                        apid,
                        offset: packet.offset(),
                    }));
                }
            }
        }
    }
}
