//! Applying a [PacketSchema] to a single packet body.
use serde::Serialize;
use tracing::warn;

use crate::bits::{extract, Value};
use crate::schema::{Count, Field, PacketSchema, Start, Width};
use crate::{Error, Result};

/// The decoded content of one field of one packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Scalar(Value),
    Array(Vec<Value>),
    /// The field could not be decoded from this packet.
    Missing,
}

impl Cell {
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Cell::Scalar(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Cell::Array(v) => Some(v),
            _ => None,
        }
    }
}

/// The cells decoded from one packet, one per non-fill field in schema order.
#[derive(Debug)]
pub struct DecodedRow<'s> {
    schema: &'s PacketSchema,
    pub cells: Vec<Cell>,
    /// Per-packet problems that left cells [Cell::Missing].
    pub issues: Vec<Error>,
}

impl<'s> DecodedRow<'s> {
    #[must_use]
    pub fn schema(&self) -> &'s PacketSchema {
        self.schema
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.schema
            .column_index(name)
            .and_then(|idx| self.cells.get(idx))
    }

    /// True when every field decoded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor<'s> {
    At(u64),
    /// Position unknown after the named field could not be sized.
    Lost(&'s str),
}

/// Resolved position of a field in a particular packet.
struct Span {
    start: u64,
    /// Element width in bits.
    width: u64,
    /// Number of elements, `None` for scalars.
    count: Option<usize>,
}

impl Span {
    fn end(&self) -> u64 {
        let n = self.count.map_or(1, |n| n as u64);
        self.start.saturating_add(self.width.saturating_mul(n))
    }
}

fn missing(field: &Field, depends_on: &str) -> Error {
    Error::MissingDependency {
        field: field.name().to_string(),
        depends_on: depends_on.to_string(),
    }
}

fn layout(
    schema: &PacketSchema,
    field: &Field,
    cells: &[Cell],
    cursor: Cursor<'_>,
    available: u64,
) -> Result<Span> {
    let start = match (field.start, cursor) {
        (Start::At(offset), _) => offset,
        (Start::Cursor, Cursor::At(bit)) => bit,
        (Start::Cursor, Cursor::Lost(name)) => return Err(missing(field, name)),
    };
    let remaining = available.saturating_sub(start);
    let width = match field.def().width {
        Width::Bits(w) => w,
        Width::ToEnd => remaining - remaining % 8,
    };

    let count = match field.count {
        Count::One => None,
        Count::Fixed(n) => Some(n),
        // widths of repeated fields are never zero
        Count::ToEnd => Some(usize::try_from(remaining / width).unwrap_or(usize::MAX)),
        Count::Field(idx) => {
            let count_field = &schema.fields()[idx];
            let value = count_field
                .slot
                .and_then(|slot| cells.get(slot))
                .and_then(Cell::as_scalar)
                .and_then(Value::as_u64);
            match value {
                Some(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
                None => return Err(missing(field, count_field.name())),
            }
        }
    };

    Ok(Span {
        start,
        width,
        count,
    })
}

fn read_cell(field: &Field, body: &[u8], span: &Span) -> Result<Cell> {
    let def = field.def();
    match span.count {
        None => Ok(Cell::Scalar(extract(
            body,
            span.start,
            span.width,
            def.kind,
            def.byte_order,
        )?)),
        Some(n) => (0..n as u64)
            .map(|i| {
                extract(
                    body,
                    span.start + i * span.width,
                    span.width,
                    def.kind,
                    def.byte_order,
                )
            })
            .collect::<Result<Vec<_>>>()
            .map(Cell::Array),
    }
}

/// Decode every field of `schema` from `body`.
///
/// `body` is the region the schema's offsets are relative to, see [PacketSchema::body].
///
/// Fields are decoded in schema order. A field without an explicit offset starts where
/// the furthest earlier field ended. A field whose bits extend past `body` produces
/// [Error::FieldOverrun]; a field that cannot be placed or sized because an earlier field
/// is missing produces [Error::MissingDependency]. When `strict` is set, either is
/// returned and the row is dropped. Otherwise the cell is [Cell::Missing] and the error is
/// recorded in [DecodedRow::issues].
///
/// # Errors
/// Per-packet errors as described above when `strict`, and any [Error::Range] or
/// [Error::InvalidWidth] from the bit extractor, which indicate an invalid schema.
///
/// # Examples
/// ```
/// use ccsds_tlm::bits::Value;
/// use ccsds_tlm::decode::{decode_packet, Cell};
/// use ccsds_tlm::schema::{FieldDef, PacketSchema, SchemaDef};
///
/// let schema = PacketSchema::new(SchemaDef::builder()
///     .name("hk")
///     .apids(vec![2])
///     .fields(vec![
///         FieldDef::uint("n", 8),
///         FieldDef::uint("samples", 4).counted_by("n"),
///     ])
///     .build()).unwrap();
///
/// let row = decode_packet(&schema, &[0x03, 0x12, 0x30], false).unwrap();
/// assert_eq!(
///     row.get("samples"),
///     Some(&Cell::Array(vec![Value::Uint(1), Value::Uint(2), Value::Uint(3)]))
/// );
/// ```
pub fn decode_packet<'s>(
    schema: &'s PacketSchema,
    body: &[u8],
    strict: bool,
) -> Result<DecodedRow<'s>> {
    let available = body.len() as u64 * 8;
    let mut row = DecodedRow {
        schema,
        cells: Vec::with_capacity(schema.num_columns()),
        issues: Vec::default(),
    };
    let mut cursor = Cursor::At(0);

    for field in schema.fields() {
        let zult = match layout(schema, field, &row.cells, cursor, available) {
            Ok(span) => {
                let end = span.end();
                if let (Cursor::At(bit), false) = (cursor, field.is_alias()) {
                    cursor = Cursor::At(bit.max(end));
                }
                if end > available {
                    Err(Error::FieldOverrun {
                        field: field.name().to_string(),
                        start: span.start,
                        end,
                        available,
                    })
                } else if field.slot.is_none() {
                    Ok(None)
                } else {
                    read_cell(field, body, &span).map(Some)
                }
            }
            Err(err) => {
                if let (Cursor::At(_), false) = (cursor, field.is_alias()) {
                    cursor = Cursor::Lost(field.name());
                }
                Err(err)
            }
        };

        match zult {
            Ok(Some(cell)) => row.cells.push(cell),
            Ok(None) => {}
            Err(err) if err.is_per_packet() => {
                if strict {
                    return Err(err);
                }
                warn!(schema = schema.name(), "{err}");
                if field.slot.is_some() {
                    row.cells.push(Cell::Missing);
                }
                row.issues.push(err);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, OffsetOrigin, SchemaDef};
    use crate::spacepacket::PrimaryHeader;

    fn schema(fields: Vec<FieldDef>) -> PacketSchema {
        PacketSchema::new(
            SchemaDef::builder()
                .name("test")
                .apids(vec![1])
                .fields(fields)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn scalars_across_byte_boundaries() {
        let s = schema(vec![
            FieldDef::uint("a", 3),
            FieldDef::int("b", 9),
            FieldDef::boolean("c"),
            FieldDef::fill("spare", 3),
            FieldDef::uint("d", 8),
        ]);
        // a=0b101, b=0b1_1111_1110 (-2), c=1, spare=0b000, d=0x5a
        let row = decode_packet(&s, &[0b1011_1111, 0b1110_1000, 0x5a], false).unwrap();

        assert!(row.is_complete());
        assert_eq!(row.cells.len(), 4);
        assert_eq!(row.get("a"), Some(&Cell::Scalar(Value::Uint(5))));
        assert_eq!(row.get("b"), Some(&Cell::Scalar(Value::Int(-2))));
        assert_eq!(row.get("c"), Some(&Cell::Scalar(Value::Bool(true))));
        assert_eq!(row.get("spare"), None);
        assert_eq!(row.get("d"), Some(&Cell::Scalar(Value::Uint(0x5a))));
    }

    #[test]
    fn explicit_offsets() {
        let s = schema(vec![
            FieldDef::uint("second", 8).at(8),
            FieldDef::uint("first", 8).at(0),
            FieldDef::uint("third", 8),
        ]);
        let row = decode_packet(&s, &[1, 2, 3], false).unwrap();

        assert_eq!(row.get("first"), Some(&Cell::Scalar(Value::Uint(1))));
        assert_eq!(row.get("second"), Some(&Cell::Scalar(Value::Uint(2))));
        assert_eq!(row.get("third"), Some(&Cell::Scalar(Value::Uint(3))));
    }

    #[test]
    fn counted_array_then_trailer() {
        let s = schema(vec![
            FieldDef::uint("n", 8),
            FieldDef::uint("samples", 16).counted_by("n"),
            FieldDef::uint("crc", 16),
        ]);
        let row = decode_packet(&s, &[2, 0, 1, 0, 2, 0xbe, 0xef], false).unwrap();

        assert_eq!(
            row.get("samples"),
            Some(&Cell::Array(vec![Value::Uint(1), Value::Uint(2)]))
        );
        assert_eq!(row.get("crc"), Some(&Cell::Scalar(Value::Uint(0xbeef))));
    }

    #[test]
    fn zero_count_is_empty_array() {
        let s = schema(vec![
            FieldDef::uint("n", 8),
            FieldDef::uint("samples", 16).counted_by("n"),
            FieldDef::uint("crc", 8),
        ]);
        let row = decode_packet(&s, &[0, 0x7f], false).unwrap();

        assert_eq!(row.get("samples"), Some(&Cell::Array(vec![])));
        assert_eq!(row.get("crc"), Some(&Cell::Scalar(Value::Uint(0x7f))));
        assert!(row.is_complete());
    }

    #[test]
    fn overrun_is_missing_when_lenient() {
        let s = schema(vec![
            FieldDef::uint("n", 8),
            FieldDef::uint("samples", 8).counted_by("n"),
            FieldDef::uint("crc", 8),
        ]);
        // declares 4 samples but only has 2 bytes
        let row = decode_packet(&s, &[4, 1, 2], false).unwrap();

        assert_eq!(row.get("n"), Some(&Cell::Scalar(Value::Uint(4))));
        assert_eq!(row.get("samples"), Some(&Cell::Missing));
        assert_eq!(row.get("crc"), Some(&Cell::Missing));
        assert_eq!(row.issues.len(), 2);
        assert!(matches!(
            &row.issues[0],
            Error::FieldOverrun { field, start: 8, end: 40, available: 24 } if field == "samples"
        ));
    }

    #[test]
    fn overrun_aborts_when_strict() {
        let s = schema(vec![FieldDef::uint("a", 8), FieldDef::uint("b", 16)]);
        let zult = decode_packet(&s, &[1, 2], true);

        assert!(
            matches!(zult, Err(Error::FieldOverrun { ref field, .. }) if field == "b"),
            "{zult:?}"
        );
    }

    #[test]
    fn missing_count_loses_position() {
        let s = schema(vec![
            FieldDef::uint("a", 8),
            FieldDef::uint("n", 8).at(32),
            FieldDef::uint("samples", 8).counted_by("n"),
            FieldDef::uint("after", 8),
        ]);
        let row = decode_packet(&s, &[1, 2], false).unwrap();

        assert_eq!(row.get("a"), Some(&Cell::Scalar(Value::Uint(1))));
        assert_eq!(row.get("n"), Some(&Cell::Missing));
        assert_eq!(row.get("samples"), Some(&Cell::Missing));
        assert_eq!(row.get("after"), Some(&Cell::Missing));
        assert!(matches!(
            &row.issues[1],
            Error::MissingDependency { field, depends_on } if field == "samples" && depends_on == "n"
        ));
        assert!(matches!(
            &row.issues[2],
            Error::MissingDependency { field, depends_on } if field == "after" && depends_on == "samples"
        ));
    }

    #[test]
    fn trailing_bytes_and_strings() {
        let s = schema(vec![
            FieldDef::string("name", 4),
            FieldDef::trailing_bytes("rest"),
        ]);
        let row = decode_packet(&s, b"ab\0\0\x01\x02", false).unwrap();

        assert_eq!(row.get("name"), Some(&Cell::Scalar(Value::Str("ab".into()))));
        assert_eq!(
            row.get("rest"),
            Some(&Cell::Scalar(Value::Bytes(vec![1, 2])))
        );
    }

    #[test]
    fn trailing_bytes_may_be_empty() {
        let s = schema(vec![FieldDef::uint("a", 8), FieldDef::trailing_bytes("rest")]);
        let row = decode_packet(&s, &[1], false).unwrap();

        assert_eq!(row.get("rest"), Some(&Cell::Scalar(Value::Bytes(vec![]))));
        assert!(row.is_complete());
    }

    #[test]
    fn repeated_to_end_takes_whole_elements() {
        let s = schema(vec![
            FieldDef::uint("hdr", 8),
            FieldDef::int("v", 16).repeated_to_end(),
        ]);
        // one trailing byte does not make a whole element
        let row = decode_packet(&s, &[9, 0xff, 0xff, 0x00, 0x02, 0x55], false).unwrap();

        assert_eq!(
            row.get("v"),
            Some(&Cell::Array(vec![Value::Int(-1), Value::Int(2)]))
        );
    }

    #[test]
    fn fixed_repeat_little_endian() {
        let s = schema(vec![FieldDef::uint("v", 16).little_endian().repeated(2)]);
        let row = decode_packet(&s, &[0x01, 0x00, 0x00, 0x01], false).unwrap();

        assert_eq!(
            row.get("v"),
            Some(&Cell::Array(vec![Value::Uint(1), Value::Uint(256)]))
        );
    }

    #[test]
    fn alias_views_same_bits() {
        let s = schema(vec![
            FieldDef::uint("word", 16).at(0),
            FieldDef::int("hi", 8).at(0).aliased(),
            FieldDef::uint("next", 8),
        ]);
        let row = decode_packet(&s, &[0xff, 0x01, 0x02], false).unwrap();

        assert_eq!(row.get("word"), Some(&Cell::Scalar(Value::Uint(0xff01))));
        assert_eq!(row.get("hi"), Some(&Cell::Scalar(Value::Int(-1))));
        assert_eq!(row.get("next"), Some(&Cell::Scalar(Value::Uint(2))));
    }

    #[test]
    fn alias_over_whole_body() {
        let s = schema(vec![
            FieldDef::trailing_bytes("raw").at(0).aliased(),
            FieldDef::uint("a", 8),
            FieldDef::int("b", 8),
        ]);
        let row = decode_packet(&s, &[0x01, 0xfe], false).unwrap();

        assert!(row.is_complete());
        assert_eq!(row.get("raw"), Some(&Cell::Scalar(Value::Bytes(vec![0x01, 0xfe]))));
        assert_eq!(row.get("a"), Some(&Cell::Scalar(Value::Uint(1))));
        assert_eq!(row.get("b"), Some(&Cell::Scalar(Value::Int(-2))));
    }

    #[test]
    fn secondary_header_is_skipped() {
        let s = PacketSchema::new(
            SchemaDef::builder()
                .name("sec")
                .apids(vec![1])
                .fields(vec![FieldDef::uint("v", 8)])
                .secondary_header_len(2)
                .build(),
        )
        .unwrap();
        #[rustfmt::skip]
        let packet: &[u8] = &[
            0x08, 0x01, 0xc0, 0x00, 0x00, 0x02,
            // secondary header
            0xaa, 0xbb,
            0x42,
        ];
        let mut header = PrimaryHeader::decode(packet).unwrap();
        header.has_secondary_header = true;

        let row = decode_packet(&s, s.body(&header, packet), false).unwrap();
        assert_eq!(row.get("v"), Some(&Cell::Scalar(Value::Uint(0x42))));

        // without the flag the secondary header length is ignored
        header.has_secondary_header = false;
        let row = decode_packet(&s, s.body(&header, packet), false).unwrap();
        assert_eq!(row.get("v"), Some(&Cell::Scalar(Value::Uint(0xaa))));
    }

    #[test]
    fn packet_origin_includes_header() {
        let s = PacketSchema::new(
            SchemaDef::builder()
                .name("whole")
                .apids(vec![2])
                .fields(vec![
                    FieldDef::uint("apid", 11).at(5),
                    FieldDef::uint("value", 16).at(48),
                ])
                .origin(OffsetOrigin::Packet)
                .build(),
        )
        .unwrap();
        let packet: &[u8] = &[0x08, 0x02, 0xc0, 0x00, 0x00, 0x01, 0x12, 0x34];
        let header = PrimaryHeader::decode(packet).unwrap();

        let row = decode_packet(&s, s.body(&header, packet), false).unwrap();
        assert_eq!(row.get("apid"), Some(&Cell::Scalar(Value::Uint(2))));
        assert_eq!(row.get("value"), Some(&Cell::Scalar(Value::Uint(0x1234))));
    }
}
