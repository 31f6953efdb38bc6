//! Columnar assembly of decoded rows.
use ndarray::{Array1, Array2};
use serde::{Serialize, Serializer};

use crate::bits::Value;
use crate::decode::{Cell, DecodedRow};
use crate::schema::PacketSchema;
use crate::spacepacket::{Apid, PrimaryHeader};

/// Values of one field across all rows of a table. Rows where the field could not be
/// decoded are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Column {
    Scalar(Vec<Option<Value>>),
    /// One sequence per row. Sequences need not have the same length.
    Ragged(Vec<Option<Vec<Value>>>),
}

impl Column {
    fn with_capacity(array: bool, capacity: usize) -> Self {
        if array {
            Column::Ragged(Vec::with_capacity(capacity))
        } else {
            Column::Scalar(Vec::with_capacity(capacity))
        }
    }

    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (Column::Scalar(values), Cell::Scalar(v)) => values.push(Some(v)),
            (Column::Ragged(values), Cell::Array(v)) => values.push(Some(v)),
            (Column::Scalar(values), _) => values.push(None),
            (Column::Ragged(values), _) => values.push(None),
        }
    }

    /// Append the rows of `other`, returning false if the column kinds differ.
    fn append(&mut self, other: Column) -> bool {
        match (self, other) {
            (Column::Scalar(values), Column::Scalar(more)) => values.extend(more),
            (Column::Ragged(values), Column::Ragged(more)) => values.extend(more),
            _ => return false,
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Ragged(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows where the field could not be decoded.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        match self {
            Column::Scalar(v) => v.iter().filter(|x| x.is_none()).count(),
            Column::Ragged(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Number of values in each row: 1 for present scalars, the sequence length for
    /// arrays, `None` for missing rows.
    #[must_use]
    pub fn lengths(&self) -> Vec<Option<usize>> {
        match self {
            Column::Scalar(v) => v.iter().map(|x| x.as_ref().map(|_| 1)).collect(),
            Column::Ragged(v) => v.iter().map(|x| x.as_ref().map(Vec::len)).collect(),
        }
    }

    /// True for array columns whose present rows do not all have the same length.
    #[must_use]
    pub fn is_ragged(&self) -> bool {
        let Column::Ragged(_) = self else {
            return false;
        };
        let mut lengths = self.lengths().into_iter().flatten();
        match lengths.next() {
            Some(first) => lengths.any(|n| n != first),
            None => false,
        }
    }

    /// Scalar numeric column as floats, with missing rows as NaN.
    ///
    /// `None` for array columns and for columns holding byte or string values.
    #[must_use]
    pub fn to_f64_array(&self) -> Option<Array1<f64>> {
        let Column::Scalar(values) = self else {
            return None;
        };
        values
            .iter()
            .map(|v| match v {
                Some(v) => v.as_f64(),
                None => Some(f64::NAN),
            })
            .collect::<Option<Vec<f64>>>()
            .map(Array1::from)
    }

    /// Scalar column as unsigned integers. `None` if any row is missing or does not fit.
    #[must_use]
    pub fn to_u64_array(&self) -> Option<Array1<u64>> {
        let Column::Scalar(values) = self else {
            return None;
        };
        values
            .iter()
            .map(|v| v.as_ref().and_then(Value::as_u64))
            .collect::<Option<Vec<u64>>>()
            .map(Array1::from)
    }

    /// Scalar column as signed integers. `None` if any row is missing or does not fit.
    #[must_use]
    pub fn to_i64_array(&self) -> Option<Array1<i64>> {
        let Column::Scalar(values) = self else {
            return None;
        };
        values
            .iter()
            .map(|v| v.as_ref().and_then(Value::as_i64))
            .collect::<Option<Vec<i64>>>()
            .map(Array1::from)
    }

    /// Array column as a `rows x elements` float array, with missing rows filled with NaN.
    ///
    /// `None` for scalar columns, ragged columns and non-numeric values.
    #[must_use]
    pub fn to_f64_array2(&self) -> Option<Array2<f64>> {
        let Column::Ragged(rows) = self else {
            return None;
        };
        if self.is_ragged() {
            return None;
        }
        let width = rows.iter().flatten().map(Vec::len).next().unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            match row {
                Some(values) => {
                    for v in values {
                        data.push(v.as_f64()?);
                    }
                }
                None => data.extend(std::iter::repeat(f64::NAN).take(width)),
            }
        }
        Array2::from_shape_vec((rows.len(), width), data).ok()
    }
}

#[allow(clippy::ptr_arg)]
fn columns_as_map<S>(columns: &Vec<(String, Column)>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(columns.iter().map(|(name, column)| (name, column)))
}

/// Decoded packets of one APID, one column per non-fill schema field.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedTable {
    pub schema: String,
    pub apid: Apid,
    /// Primary header of each row's packet.
    pub headers: Vec<PrimaryHeader>,
    /// Stream offset of each row's packet.
    pub offsets: Vec<usize>,
    #[serde(serialize_with = "columns_as_map")]
    pub columns: Vec<(String, Column)>,
}

impl DecodedTable {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Concatenate tables in order.
    ///
    /// Returns `None` if `tables` is empty or the tables were not produced by the same
    /// schema for the same APID.
    pub fn concat<I>(tables: I) -> Option<DecodedTable>
    where
        I: IntoIterator<Item = DecodedTable>,
    {
        let mut tables = tables.into_iter();
        let mut merged = tables.next()?;
        for table in tables {
            let same_layout = table.schema == merged.schema
                && table.apid == merged.apid
                && table.columns.len() == merged.columns.len()
                && table
                    .columns
                    .iter()
                    .zip(&merged.columns)
                    .all(|((a, _), (b, _))| a == b);
            if !same_layout {
                return None;
            }
            merged.headers.extend(table.headers);
            merged.offsets.extend(table.offsets);
            for ((_, dest), (_, src)) in merged.columns.iter_mut().zip(table.columns) {
                if !dest.append(src) {
                    return None;
                }
            }
        }
        Some(merged)
    }
}

/// Accumulates [DecodedRow]s for one APID in arrival order.
#[derive(Debug)]
pub struct TableBuilder<'s> {
    schema: &'s PacketSchema,
    apid: Apid,
    headers: Vec<PrimaryHeader>,
    offsets: Vec<usize>,
    columns: Vec<Column>,
}

impl<'s> TableBuilder<'s> {
    #[must_use]
    pub fn new(schema: &'s PacketSchema, apid: Apid) -> Self {
        Self::with_capacity(schema, apid, 0)
    }

    /// Create a builder pre-sized for `capacity` rows.
    #[must_use]
    pub fn with_capacity(schema: &'s PacketSchema, apid: Apid, capacity: usize) -> Self {
        Self {
            schema,
            apid,
            headers: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
            columns: schema
                .columns()
                .map(|f| Column::with_capacity(f.is_array(), capacity))
                .collect(),
        }
    }

    /// Append a row decoded from the packet with `header` at stream `offset`.
    pub fn push(&mut self, header: PrimaryHeader, offset: usize, row: DecodedRow<'s>) {
        debug_assert!(std::ptr::eq(row.schema(), self.schema));
        self.headers.push(header);
        self.offsets.push(offset);
        let mut cells = row.cells.into_iter();
        for column in &mut self.columns {
            column.push(cells.next().unwrap_or(Cell::Missing));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    #[must_use]
    pub fn finish(self) -> DecodedTable {
        DecodedTable {
            schema: self.schema.name().to_string(),
            apid: self.apid,
            headers: self.headers,
            offsets: self.offsets,
            columns: self
                .schema
                .columns()
                .map(|f| f.name().to_string())
                .zip(self.columns)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_packet;
    use crate::schema::{FieldDef, SchemaDef};

    fn schema() -> PacketSchema {
        PacketSchema::new(
            SchemaDef::builder()
                .name("hk")
                .apids(vec![7])
                .fields(vec![
                    FieldDef::uint("n", 8),
                    FieldDef::int("samples", 8).counted_by("n"),
                    FieldDef::float("temp", 32),
                ])
                .build(),
        )
        .unwrap()
    }

    fn header(seq: u16) -> PrimaryHeader {
        PrimaryHeader {
            version: 0,
            type_flag: 0,
            has_secondary_header: false,
            apid: 7,
            sequence_flags: 3,
            sequence_id: seq,
            len_minus1: 0,
        }
    }

    fn build(schema: &PacketSchema, bodies: &[&[u8]]) -> DecodedTable {
        let mut builder = TableBuilder::with_capacity(schema, 7, bodies.len());
        for (i, body) in bodies.iter().enumerate() {
            let row = decode_packet(schema, body, false).unwrap();
            builder.push(header(i as u16), i * 100, row);
        }
        builder.finish()
    }

    #[test]
    fn rows_keep_arrival_order() {
        let s = schema();
        #[rustfmt::skip]
        let table = build(&s, &[
            &[2, 0xff, 0x01, 0x3f, 0x80, 0x00, 0x00],
            &[1, 0x05, 0x40, 0x00, 0x00, 0x00],
            // temp is cut short
            &[0, 0x40],
        ]);

        assert_eq!(table.len(), 3);
        assert_eq!(table.schema, "hk");
        assert_eq!(table.offsets, vec![0, 100, 200]);
        assert_eq!(
            table.headers.iter().map(|h| h.sequence_id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let samples = table.column("samples").unwrap();
        assert_eq!(
            samples,
            &Column::Ragged(vec![
                Some(vec![Value::Int(-1), Value::Int(1)]),
                Some(vec![Value::Int(5)]),
                Some(vec![]),
            ])
        );
        assert!(samples.is_ragged());
        assert_eq!(samples.lengths(), vec![Some(2), Some(1), Some(0)]);
        assert!(samples.to_f64_array2().is_none());

        let temp = table.column("temp").unwrap();
        assert_eq!(temp.missing_count(), 1);
        let arr = temp.to_f64_array().unwrap();
        assert_eq!(arr[0], 1.0);
        assert_eq!(arr[1], 2.0);
        assert!(arr[2].is_nan(), "missing values must not read as zero");
        assert!(temp.to_u64_array().is_none());

        let n = table.column("n").unwrap().to_u64_array().unwrap();
        assert_eq!(n.to_vec(), vec![2, 1, 0]);
    }

    #[test]
    fn rectangular_arrays() {
        let s = PacketSchema::new(
            SchemaDef::builder()
                .name("img")
                .apids(vec![7])
                .fields(vec![FieldDef::uint("px", 8).repeated(3)])
                .build(),
        )
        .unwrap();
        let table = build(&s, &[&[1, 2, 3], &[4, 5], &[7, 8, 9]]);

        let px = table.column("px").unwrap();
        assert!(!px.is_ragged());
        assert_eq!(px.missing_count(), 1);
        let arr = px.to_f64_array2().unwrap();
        assert_eq!(arr.shape(), &[3, 3]);
        assert_eq!(arr[[0, 2]], 3.0);
        assert!(arr[[1, 0]].is_nan());
        assert_eq!(arr[[2, 0]], 7.0);
    }

    #[test]
    fn concat_tables() {
        let s = schema();
        let a = build(&s, &[&[0, 0x3f, 0x80, 0x00, 0x00]]);
        let b = build(&s, &[&[0, 0x40, 0x00, 0x00, 0x00], &[0, 0x40, 0x40, 0x00, 0x00]]);

        let merged = DecodedTable::concat([a, b]).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged.column("temp").unwrap().to_f64_array().unwrap().to_vec(),
            vec![1.0, 2.0, 3.0]
        );
        assert!(DecodedTable::concat(Vec::new()).is_none());
    }

    #[test]
    fn serializes_columns_by_name() {
        let s = schema();
        let table = build(&s, &[&[1, 0x02, 0x3f, 0x80, 0x00, 0x00]]);
        let json = serde_json::to_value(&table).unwrap();

        assert_eq!(json["columns"]["n"], serde_json::json!([1]));
        assert_eq!(json["columns"]["samples"], serde_json::json!([[2]]));
        assert_eq!(json["columns"]["temp"], serde_json::json!([1.0]));
    }
}
