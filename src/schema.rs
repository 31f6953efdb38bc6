//! Packet layout definitions.
//!
//! A mission describes each packet type as a [SchemaDef]: an ordered list of [FieldDef]s
//! plus the APIDs it applies to. [PacketSchema::new] validates a definition once, up front,
//! so the per-packet decode never has to re-check layout rules.
//!
//! # Field placement
//! A field with an explicit `offset` starts at that bit. A field without one starts at the
//! decode cursor, the furthest bit reached by any earlier field in the same packet, which
//! is how fields following a variable-length array are positioned.
//!
//! # Examples
//! ```
//! use ccsds_tlm::schema::{FieldDef, PacketSchema, SchemaDef};
//!
//! let def = SchemaDef::builder()
//!     .name("hk")
//!     .apids(vec![0x10])
//!     .fields(vec![
//!         FieldDef::uint("mode", 4),
//!         FieldDef::int("temp", 12),
//!         FieldDef::uint("nsamples", 8),
//!         FieldDef::uint("samples", 16).counted_by("nsamples"),
//!         FieldDef::uint("checksum", 16),
//!     ])
//!     .build();
//! let schema = PacketSchema::new(def).unwrap();
//! assert_eq!(schema.fields().len(), 5);
//! ```
use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::spacepacket::{Apid, PrimaryHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Unsigned integer, 1 to 64 bits.
    Uint,
    /// Two's-complement signed integer, 1 to 64 bits.
    Int,
    /// IEEE-754 float, 32 or 64 bits.
    Float,
    /// True when any bit is set.
    Bool,
    /// Raw bytes, any multiple of 8 bits.
    Bytes,
    /// Text, any multiple of 8 bits. Decoded as lossy UTF-8 with trailing NULs removed.
    Str,
    /// Spare or padding bits. Occupies space in the layout but produces no column.
    Fill,
}

impl Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataKind::Uint => "uint",
            DataKind::Int => "int",
            DataKind::Float => "float",
            DataKind::Bool => "bool",
            DataKind::Bytes => "bytes",
            DataKind::Str => "str",
            DataKind::Fill => "fill",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    /// Only valid for numeric fields whose width is a multiple of 8.
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Width {
    Bits(u64),
    /// The remaining whole bytes of the packet body. Only valid for bytes, str and fill.
    ToEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    /// A fixed number of elements.
    Fixed(usize),
    /// The number of elements is the value of an earlier unsigned scalar field.
    CountField(String),
    /// As many whole elements as fit before the end of the packet body.
    ToEnd,
}

/// Definition of a single field. For arrays the `width` is the width of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: DataKind,
    pub width: Width,
    /// Start bit relative to the schema's [OffsetOrigin]. `None` places the field at the
    /// decode cursor.
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub repeat: Option<Repeat>,
    /// Alias fields may overlap other fields, e.g., to view the same bits as a union.
    #[serde(default)]
    pub alias: bool,
}

impl FieldDef {
    pub fn new<S: Into<String>>(name: S, kind: DataKind, width: Width) -> Self {
        Self {
            name: name.into(),
            kind,
            width,
            offset: None,
            byte_order: ByteOrder::Big,
            repeat: None,
            alias: false,
        }
    }

    pub fn uint<S: Into<String>>(name: S, bits: u64) -> Self {
        Self::new(name, DataKind::Uint, Width::Bits(bits))
    }

    pub fn int<S: Into<String>>(name: S, bits: u64) -> Self {
        Self::new(name, DataKind::Int, Width::Bits(bits))
    }

    pub fn float<S: Into<String>>(name: S, bits: u64) -> Self {
        Self::new(name, DataKind::Float, Width::Bits(bits))
    }

    pub fn boolean<S: Into<String>>(name: S) -> Self {
        Self::new(name, DataKind::Bool, Width::Bits(1))
    }

    /// A raw field of `len` bytes.
    pub fn bytes<S: Into<String>>(name: S, len: u64) -> Self {
        Self::new(name, DataKind::Bytes, Width::Bits(len * 8))
    }

    /// A text field of `len` bytes.
    pub fn string<S: Into<String>>(name: S, len: u64) -> Self {
        Self::new(name, DataKind::Str, Width::Bits(len * 8))
    }

    pub fn fill<S: Into<String>>(name: S, bits: u64) -> Self {
        Self::new(name, DataKind::Fill, Width::Bits(bits))
    }

    /// Raw bytes from the field start to the end of the packet body.
    pub fn trailing_bytes<S: Into<String>>(name: S) -> Self {
        Self::new(name, DataKind::Bytes, Width::ToEnd)
    }

    #[must_use]
    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn little_endian(mut self) -> Self {
        self.byte_order = ByteOrder::Little;
        self
    }

    #[must_use]
    pub fn repeated(mut self, count: usize) -> Self {
        self.repeat = Some(Repeat::Fixed(count));
        self
    }

    #[must_use]
    pub fn counted_by<S: Into<String>>(mut self, field: S) -> Self {
        self.repeat = Some(Repeat::CountField(field.into()));
        self
    }

    #[must_use]
    pub fn repeated_to_end(mut self) -> Self {
        self.repeat = Some(Repeat::ToEnd);
        self
    }

    #[must_use]
    pub fn aliased(mut self) -> Self {
        self.alias = true;
        self
    }
}

/// Where field offsets are counted from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetOrigin {
    /// The first byte of user data, after the primary header and, when the packet flags
    /// one, the secondary header.
    #[default]
    DataField,
    /// The first bit of the primary header, for layouts that list header fields too.
    Packet,
}

/// Unvalidated schema definition, as authored or deserialized.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct SchemaDef {
    #[builder(setter(into))]
    pub name: String,
    pub apids: Vec<Apid>,
    pub fields: Vec<FieldDef>,
    /// Length in bytes of the mission secondary header, skipped when a packet has its
    /// secondary header flag set.
    #[builder(default)]
    #[serde(default)]
    pub secondary_header_len: usize,
    #[builder(default)]
    #[serde(default)]
    pub origin: OffsetOrigin,
    /// Expected length in bytes of the decoded region. When given, fixed layout must fit.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub body_len: Option<usize>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("schema {0} applies to no APIDs")]
    NoApids(String),
    #[error("APID {0} is larger than 11 bits")]
    InvalidApid(u32),
    #[error("APID {apid} is claimed by both {first} and {second}")]
    DuplicateApid {
        apid: Apid,
        first: String,
        second: String,
    },
    #[error("field {0} has no name")]
    EmptyName(usize),
    #[error("field name {0} is used more than once")]
    DuplicateName(String),
    #[error("field {field}: width {width:?} is not valid for {kind}")]
    InvalidWidth {
        field: String,
        kind: DataKind,
        width: Width,
    },
    #[error("field {0}: little endian requires a numeric field with a multiple of 8 bits")]
    InvalidByteOrder(String),
    #[error("field {0}: elements of a repeated field cannot extend to the end of the packet")]
    InvalidRepeat(String),
    #[error("field {field}: count field {count} does not exist")]
    UnknownCountField { field: String, count: String },
    #[error("field {field}: count field {count} must come before it")]
    CountFieldOrder { field: String, count: String },
    #[error("field {field}: count field {count} must be an unsigned scalar")]
    CountFieldKind { field: String, count: String },
    #[error("fields {first} and {second} overlap")]
    Overlap { first: String, second: String },
    #[error("field {field} has a fixed position after {open}, whose extent is not fixed")]
    FollowsOpenEnded { field: String, open: String },
    #[error("schema {schema} uses {bits} bits but packets are {available} bits")]
    ExceedsPacketLength {
        schema: String,
        bits: u64,
        available: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Start {
    At(u64),
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Count {
    One,
    Fixed(usize),
    /// Index of the count field in the schema.
    Field(usize),
    ToEnd,
}

/// A validated field.
#[derive(Debug, Clone)]
pub struct Field {
    def: FieldDef,
    pub(crate) start: Start,
    pub(crate) count: Count,
    /// Position of this field's cell in a decoded row; `None` for fill.
    pub(crate) slot: Option<usize>,
}

impl Field {
    #[must_use]
    pub fn def(&self) -> &FieldDef {
        &self.def
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.def.kind
    }

    /// True for a view of bits other fields own. Aliases never move the cursor.
    #[must_use]
    pub fn is_alias(&self) -> bool {
        self.def.alias
    }

    /// True when the field decodes to a sequence of values per packet.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.count != Count::One
    }
}

/// A validated, immutable packet layout.
#[derive(Debug, Clone)]
pub struct PacketSchema {
    name: String,
    apids: Vec<Apid>,
    secondary_header_len: usize,
    origin: OffsetOrigin,
    body_len: Option<usize>,
    fields: Vec<Field>,
    /// Indexes into `fields` of the fields that produce cells, in slot order.
    columns: Vec<usize>,
}

enum Extent {
    Fixed(u64),
    Variable,
    ToEnd,
}

fn validate_width(def: &FieldDef) -> Result<(), SchemaError> {
    use DataKind::{Bool, Bytes, Fill, Float, Int, Str, Uint};

    let ok = match (def.kind, def.width) {
        (_, Width::Bits(0)) => false,
        (Uint | Int | Bool, Width::Bits(w)) => w <= 64,
        (Float, Width::Bits(w)) => w == 32 || w == 64,
        (Bytes | Str, Width::Bits(w)) => w % 8 == 0,
        (Fill, Width::Bits(_)) | (Bytes | Str | Fill, Width::ToEnd) => true,
        (Uint | Int | Bool | Float, Width::ToEnd) => false,
    };
    if !ok {
        return Err(SchemaError::InvalidWidth {
            field: def.name.clone(),
            kind: def.kind,
            width: def.width,
        });
    }
    if def.byte_order == ByteOrder::Little {
        let numeric = matches!(def.kind, Uint | Int | Float);
        if !numeric || !matches!(def.width, Width::Bits(w) if w % 8 == 0) {
            return Err(SchemaError::InvalidByteOrder(def.name.clone()));
        }
    }
    if def.repeat.is_some() && def.width == Width::ToEnd {
        return Err(SchemaError::InvalidRepeat(def.name.clone()));
    }
    Ok(())
}

fn check_overlaps(mut ranges: Vec<(u64, u64, String)>) -> Result<(), SchemaError> {
    ranges.retain(|(start, end, _)| end > start);
    ranges.sort_by_key(|(start, _, _)| *start);

    let mut furthest: Option<(u64, &str)> = None;
    for (start, end, name) in &ranges {
        if let Some((prev_end, prev_name)) = furthest {
            if *start < prev_end {
                return Err(SchemaError::Overlap {
                    first: prev_name.to_string(),
                    second: name.clone(),
                });
            }
        }
        if furthest.map_or(true, |(prev_end, _)| *end > prev_end) {
            furthest = Some((*end, name));
        }
    }
    Ok(())
}

impl PacketSchema {
    /// Validate `def`.
    ///
    /// # Errors
    /// [SchemaError] describing the first layout rule `def` violates.
    pub fn new(def: SchemaDef) -> Result<Self, SchemaError> {
        if def.apids.is_empty() {
            return Err(SchemaError::NoApids(def.name));
        }
        if let Some(apid) = def.apids.iter().find(|a| **a > PrimaryHeader::APID_MAX) {
            return Err(SchemaError::InvalidApid(u32::from(*apid)));
        }

        let mut index: HashMap<String, usize> = HashMap::default();
        let mut fields: Vec<Field> = Vec::with_capacity(def.fields.len());
        let mut columns = Vec::default();
        // Furthest bit reached while every earlier extent is known.
        let mut static_cursor = Some(0u64);
        // Most recent field whose extent is only known at decode time.
        let mut unbounded: Option<String> = None;
        let mut open_ended: Option<String> = None;
        let mut ranges: Vec<(u64, u64, String)> = Vec::default();

        for (idx, fdef) in def.fields.iter().enumerate() {
            if fdef.name.is_empty() {
                return Err(SchemaError::EmptyName(idx));
            }
            if index.contains_key(&fdef.name) {
                return Err(SchemaError::DuplicateName(fdef.name.clone()));
            }
            validate_width(fdef)?;

            let count = match &fdef.repeat {
                None => Count::One,
                Some(Repeat::Fixed(n)) => Count::Fixed(*n),
                Some(Repeat::ToEnd) => Count::ToEnd,
                Some(Repeat::CountField(count)) => match index.get(count) {
                    Some(&ci) => {
                        let cf: &Field = &fields[ci];
                        if cf.kind() != DataKind::Uint || cf.is_array() {
                            return Err(SchemaError::CountFieldKind {
                                field: fdef.name.clone(),
                                count: count.clone(),
                            });
                        }
                        Count::Field(ci)
                    }
                    None if def.fields.iter().any(|f| &f.name == count) => {
                        return Err(SchemaError::CountFieldOrder {
                            field: fdef.name.clone(),
                            count: count.clone(),
                        });
                    }
                    None => {
                        return Err(SchemaError::UnknownCountField {
                            field: fdef.name.clone(),
                            count: count.clone(),
                        });
                    }
                },
            };

            if !fdef.alias {
                if let Some(open) = &open_ended {
                    return Err(SchemaError::FollowsOpenEnded {
                        field: fdef.name.clone(),
                        open: open.clone(),
                    });
                }
            }
            let start = match fdef.offset {
                Some(offset) => {
                    if let (false, None, Some(open)) = (fdef.alias, static_cursor, &unbounded) {
                        return Err(SchemaError::FollowsOpenEnded {
                            field: fdef.name.clone(),
                            open: open.clone(),
                        });
                    }
                    Start::At(offset)
                }
                None => Start::Cursor,
            };
            let static_start = match start {
                Start::At(offset) => Some(offset),
                Start::Cursor => static_cursor,
            };

            let extent = match (fdef.width, count) {
                (Width::ToEnd, _) | (_, Count::ToEnd) => Extent::ToEnd,
                (Width::Bits(_), Count::Field(_)) => Extent::Variable,
                (Width::Bits(w), Count::One) => Extent::Fixed(w),
                (Width::Bits(w), Count::Fixed(n)) => Extent::Fixed(w.saturating_mul(n as u64)),
            };
            match extent {
                _ if fdef.alias => {}
                Extent::Fixed(len) => match static_start {
                    Some(s) => {
                        let end = s.saturating_add(len);
                        ranges.push((s, end, fdef.name.clone()));
                        static_cursor = static_cursor.map(|c| c.max(end));
                    }
                    None => static_cursor = None,
                },
                Extent::Variable => {
                    // extends to at most the end of the body
                    if let Some(s) = static_start {
                        ranges.push((s, u64::MAX, fdef.name.clone()));
                    }
                    unbounded = Some(fdef.name.clone());
                    static_cursor = None;
                }
                Extent::ToEnd => {
                    if let Some(s) = static_start {
                        ranges.push((s, u64::MAX, fdef.name.clone()));
                    }
                    open_ended = Some(fdef.name.clone());
                    unbounded = Some(fdef.name.clone());
                    static_cursor = None;
                }
            }

            let slot = if fdef.kind == DataKind::Fill {
                None
            } else {
                columns.push(idx);
                Some(columns.len() - 1)
            };
            index.insert(fdef.name.clone(), idx);
            fields.push(Field {
                def: fdef.clone(),
                start,
                count,
                slot,
            });
        }

        if let Some(len) = def.body_len {
            let available = len as u64 * 8;
            let bits = ranges
                .iter()
                .map(|(_, end, _)| *end)
                .filter(|end| *end != u64::MAX)
                .max()
                .unwrap_or(0);
            if bits > available {
                return Err(SchemaError::ExceedsPacketLength {
                    schema: def.name,
                    bits,
                    available,
                });
            }
        }
        check_overlaps(ranges)?;

        Ok(Self {
            name: def.name,
            apids: def.apids,
            secondary_header_len: def.secondary_header_len,
            origin: def.origin,
            body_len: def.body_len,
            fields,
            columns,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn apids(&self) -> &[Apid] {
        &self.apids
    }

    #[must_use]
    pub fn secondary_header_len(&self) -> usize {
        self.secondary_header_len
    }

    #[must_use]
    pub fn origin(&self) -> OffsetOrigin {
        self.origin
    }

    #[must_use]
    pub fn body_len(&self) -> Option<usize> {
        self.body_len
    }

    /// All fields, including fill, in schema order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Fields that produce output columns, in column order.
    pub fn columns(&self) -> impl Iterator<Item = &Field> + '_ {
        self.columns.iter().map(|idx| &self.fields[*idx])
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Column position of the named field, if it produces one.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.field(name).and_then(|f| f.slot)
    }

    /// The region of `packet` that field offsets are relative to.
    ///
    /// `packet` must be the full packet, starting with its primary header.
    #[must_use]
    pub fn body<'p>(&self, header: &PrimaryHeader, packet: &'p [u8]) -> &'p [u8] {
        match self.origin {
            OffsetOrigin::Packet => packet,
            OffsetOrigin::DataField => packet
                .get(header.data_offset(self.secondary_header_len)..)
                .unwrap_or(&[]),
        }
    }
}

/// The schemas active for a decode, at most one per APID.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    schemas: Vec<PacketSchema>,
    by_apid: HashMap<Apid, usize>,
}

impl SchemaSet {
    /// # Errors
    /// [SchemaError::DuplicateApid] if more than one schema claims an APID.
    pub fn new<I>(schemas: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = PacketSchema>,
    {
        let mut set = Self::default();
        for schema in schemas {
            set.insert(schema)?;
        }
        Ok(set)
    }

    /// Validate and collect `defs`.
    ///
    /// # Errors
    /// The first [SchemaError] from validating a definition or assigning its APIDs.
    pub fn from_defs<I>(defs: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = SchemaDef>,
    {
        Self::new(
            defs.into_iter()
                .map(PacketSchema::new)
                .collect::<Result<Vec<_>, _>>()?,
        )
    }

    /// # Errors
    /// [SchemaError::DuplicateApid] if one of the schema's APIDs is already claimed.
    pub fn insert(&mut self, schema: PacketSchema) -> Result<(), SchemaError> {
        for apid in schema.apids() {
            if let Some(existing) = self.by_apid.get(apid) {
                return Err(SchemaError::DuplicateApid {
                    apid: *apid,
                    first: self.schemas[*existing].name().to_string(),
                    second: schema.name().to_string(),
                });
            }
        }
        let idx = self.schemas.len();
        for apid in schema.apids() {
            self.by_apid.insert(*apid, idx);
        }
        self.schemas.push(schema);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, apid: Apid) -> Option<&PacketSchema> {
        self.by_apid.get(&apid).map(|idx| &self.schemas[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketSchema> + '_ {
        self.schemas.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
