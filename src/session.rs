//! Decoding whole packet streams into per-APID tables.
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use rayon::prelude::*;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::decode::{decode_packet, DecodedRow};
use crate::demux::{Demux, Skipped, UnmatchedApid};
use crate::schema::{PacketSchema, SchemaSet};
use crate::spacepacket::{
    missing_packets, read_packets, Apid, PacketSlices, PacketView, PrimaryHeader,
};
use crate::table::{DecodedTable, TableBuilder};
use crate::{Error, Result};

fn as_display<S>(err: &Error, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(err)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ApidSummary {
    /// Packets seen with this APID.
    pub count: usize,
    pub bytes: usize,
    /// Sequence ids missing between consecutive packets.
    pub missing: usize,
    /// Rows added to the APID's table.
    pub rows: usize,
    /// Packets not added to the table because they could not be decoded.
    pub dropped: usize,
    /// False if no schema matched and the APID's packets were skipped.
    pub matched: bool,

    #[serde(skip)]
    last_sequence_id: Option<u16>,
}

impl ApidSummary {
    fn add(&mut self, header: &PrimaryHeader, len: usize) {
        self.count += 1;
        self.bytes += len;
        if let Some(last) = self.last_sequence_id {
            self.missing += missing_packets(header.sequence_id, last) as usize;
        }
        self.last_sequence_id = Some(header.sequence_id);
    }
}

/// A problem decoding a single packet.
#[derive(Debug, Serialize)]
pub struct PacketIssue {
    pub offset: usize,
    pub apid: Apid,
    pub sequence_id: u16,
    #[serde(serialize_with = "as_display")]
    pub error: Error,
    /// True if the packet's row was dropped, otherwise the row was kept with missing cells.
    pub dropped: bool,
}

/// Where and why demultiplexing stopped before the end of the input.
#[derive(Debug, Serialize)]
pub struct StreamStop {
    /// Stream offset of the packet that could not be read, if known.
    pub offset: Option<usize>,
    #[serde(serialize_with = "as_display")]
    pub error: Error,
}

/// Tracks stats on a decode.
#[derive(Debug, Default, Serialize)]
pub struct DecodeReport {
    /// Packets walked, matched or not.
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    /// Packets skipped because no schema matched their APID.
    pub unmatched: usize,
    pub apids: BTreeMap<Apid, ApidSummary>,
    pub issues: Vec<PacketIssue>,
    pub stopped: Option<StreamStop>,
}

impl DecodeReport {
    /// True if the whole input was walked.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

/// Result of a decode: one table per matched APID, plus the report.
#[derive(Debug, Serialize)]
pub struct Decoded {
    pub tables: BTreeMap<Apid, DecodedTable>,
    pub report: DecodeReport,
}

/// Decode configuration and entry point.
///
/// # Examples
/// ```
/// use ccsds_tlm::schema::{FieldDef, SchemaDef, SchemaSet};
/// use ccsds_tlm::session::Decoder;
///
/// let schemas = SchemaSet::from_defs([SchemaDef::builder()
///     .name("example")
///     .apids(vec![2])
///     .fields(vec![FieldDef::uint("value", 16)])
///     .build()])
/// .unwrap();
/// let decoder = Decoder::builder().schemas(schemas).build();
///
/// let decoded = decoder.decode(&[0x08, 0x02, 0xc0, 0x00, 0x00, 0x01, 0x12, 0x34]).unwrap();
/// let table = &decoded.tables[&2];
/// assert_eq!(table.len(), 1);
/// assert_eq!(decoded.report.bytes, 8);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct Decoder {
    schemas: SchemaSet,
    /// What to do with packets whose APID has no schema.
    #[builder(default)]
    unmatched_apid: UnmatchedApid,
    /// Drop a packet's whole row when any field overruns the packet, rather than keeping
    /// the row with the field missing.
    #[builder(default)]
    strict_field_bounds: bool,
    /// Expected number of rows per APID, used to pre-size tables.
    #[builder(default, setter(strip_option))]
    capacity_hint: Option<usize>,
}

struct Assembly<'s> {
    builders: BTreeMap<Apid, TableBuilder<'s>>,
    capacities: HashMap<Apid, usize>,
    default_capacity: usize,
    report: DecodeReport,
}

impl<'s> Assembly<'s> {
    fn new(capacities: HashMap<Apid, usize>, default_capacity: usize) -> Self {
        Self {
            builders: BTreeMap::default(),
            capacities,
            default_capacity,
            report: DecodeReport::default(),
        }
    }

    fn accept(
        &mut self,
        schema: &'s PacketSchema,
        header: &PrimaryHeader,
        offset: usize,
        len: usize,
        row: Result<DecodedRow<'s>>,
    ) -> Result<()> {
        let summary = self.report.apids.entry(header.apid).or_default();
        summary.matched = true;
        summary.add(header, len);

        let issue = |error, dropped| PacketIssue {
            offset,
            apid: header.apid,
            sequence_id: header.sequence_id,
            error,
            dropped,
        };
        match row {
            Ok(mut row) => {
                summary.rows += 1;
                self.report
                    .issues
                    .extend(row.issues.drain(..).map(|err| issue(err, false)));
                let capacity = self
                    .capacities
                    .get(&header.apid)
                    .copied()
                    .unwrap_or(self.default_capacity);
                self.builders
                    .entry(header.apid)
                    .or_insert_with(|| TableBuilder::with_capacity(schema, header.apid, capacity))
                    .push(*header, offset, row);
            }
            Err(err) if err.is_per_packet() => {
                summary.dropped += 1;
                debug!(offset, apid = header.apid, "dropping row: {err}");
                self.report.issues.push(issue(err, true));
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn stop(&mut self, error: Error) {
        let offset = match error {
            Error::TruncatedHeader { offset, .. }
            | Error::CorruptStream { offset, .. }
            | Error::UnknownApid { offset, .. } => Some(offset),
            _ => None,
        };
        warn!("stream stopped: {error}");
        self.report.stopped = Some(StreamStop { offset, error });
    }

    fn finish(mut self, skipped: &BTreeMap<Apid, Skipped>) -> Decoded {
        for (apid, skipped) in skipped {
            let summary = self.report.apids.entry(*apid).or_default();
            summary.count += skipped.count;
            summary.bytes += skipped.bytes;
            summary.missing += skipped.missing;
            self.report.unmatched += skipped.count;
        }
        let report = &mut self.report;
        for summary in report.apids.values() {
            report.count += summary.count;
            report.bytes += summary.bytes;
            report.missing += summary.missing;
        }
        debug!(
            "decoded {} packets, {} bytes; {} unmatched",
            report.count, report.bytes, report.unmatched
        );

        Decoded {
            tables: self
                .builders
                .into_iter()
                .map(|(apid, builder)| (apid, builder.finish()))
                .collect(),
            report: self.report,
        }
    }
}

impl Decoder {
    #[must_use]
    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Decode an in-memory packet stream.
    ///
    /// Stream errors stop decoding; rows decoded before the stop are kept and the error is
    /// available in [DecodeReport::stopped].
    ///
    /// # Errors
    /// Extractor errors, which indicate an invalid schema. Per-packet and stream problems
    /// are reported rather than returned.
    pub fn decode(&self, buf: &[u8]) -> Result<Decoded> {
        self.run(Demux::new(
            PacketSlices::new(buf),
            &self.schemas,
            self.unmatched_apid,
        ))
    }

    /// Decode packets read from `reader`, one packet at a time.
    ///
    /// # Errors
    /// See [Decoder::decode]. Read failures are reported as a stream stop.
    pub fn decode_reader<R: Read>(&self, reader: R) -> Result<Decoded> {
        self.run(Demux::new(
            read_packets(reader),
            &self.schemas,
            self.unmatched_apid,
        ))
    }

    fn run<I, P>(&self, mut demux: Demux<'_, I>) -> Result<Decoded>
    where
        I: Iterator<Item = Result<P>>,
        P: PacketView,
    {
        let mut asm = Assembly::new(HashMap::default(), self.capacity_hint.unwrap_or(0));
        for zult in demux.by_ref() {
            match zult {
                Ok(dispatched) => {
                    let packet = &dispatched.packet;
                    let row =
                        decode_packet(dispatched.schema, dispatched.body(), self.strict_field_bounds);
                    asm.accept(
                        dispatched.schema,
                        packet.header(),
                        packet.offset(),
                        packet.bytes().len(),
                        row,
                    )?;
                }
                Err(err) => asm.stop(err),
            }
        }
        Ok(asm.finish(demux.skipped()))
    }

    /// Decode an in-memory packet stream using all available threads.
    ///
    /// Packet boundaries are found first, then packets are decoded in parallel and
    /// assembled in stream order. Results are identical to [Decoder::decode].
    ///
    /// # Errors
    /// See [Decoder::decode].
    pub fn decode_parallel(&self, buf: &[u8]) -> Result<Decoded> {
        let mut demux = Demux::new(PacketSlices::new(buf), &self.schemas, self.unmatched_apid);
        let mut dispatched = Vec::default();
        let mut stop = None;
        for zult in demux.by_ref() {
            match zult {
                Ok(d) => dispatched.push(d),
                Err(err) => stop = Some(err),
            }
        }

        let strict = self.strict_field_bounds;
        let rows: Vec<Result<DecodedRow>> = dispatched
            .par_iter()
            .map(|d| decode_packet(d.schema, d.body(), strict))
            .collect();

        let mut capacities: HashMap<Apid, usize> = HashMap::default();
        for d in &dispatched {
            *capacities.entry(d.apid()).or_default() += 1;
        }
        let mut asm = Assembly::new(capacities, 0);
        for (d, row) in dispatched.iter().zip(rows) {
            asm.accept(d.schema, &d.packet.header, d.packet.offset, d.packet.data.len(), row)?;
        }
        if let Some(err) = stop {
            asm.stop(err);
        }
        Ok(asm.finish(demux.skipped()))
    }
}
