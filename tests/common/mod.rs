#![allow(dead_code)]

use std::path::PathBuf;

use ccsds_tlm::bits::write_bits;
use ccsds_tlm::schema::SchemaDef;
use ccsds_tlm::spacepacket::{Apid, PrimaryHeader, SEQ_UNSEGMENTED};
use ccsds_tlm::SchemaSet;

pub fn fixture_path(name: &str) -> PathBuf {
    let mut path =
        PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set"));
    path.push("tests/fixtures");
    path.push(name);
    path
}

pub fn fixture_schemas() -> SchemaSet {
    let dat = std::fs::read(fixture_path("hk.json")).unwrap();
    let defs: Vec<SchemaDef> = serde_json::from_slice(&dat).unwrap();
    SchemaSet::from_defs(defs).unwrap()
}

/// Packs values MSB first at arbitrary bit widths.
#[derive(Default)]
pub struct BodyBuilder {
    buf: Vec<u8>,
    bits: u64,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits(mut self, width: u32, value: u64) -> Self {
        let end = self.bits + u64::from(width);
        self.buf.resize(end.div_ceil(8) as usize, 0);
        write_bits(&mut self.buf, self.bits, width, value).unwrap();
        self.bits = end;
        self
    }

    pub fn bytes(mut self, dat: &[u8]) -> Self {
        for b in dat {
            self = self.bits(8, u64::from(*b));
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode a complete packet. `body` plus any secondary header must not be empty.
pub fn packet(apid: Apid, seq: u16, secondary: Option<&[u8]>, body: &[u8]) -> Vec<u8> {
    let sec = secondary.unwrap_or_default();
    let data_len = sec.len() + body.len();
    assert!(data_len > 0, "packets carry at least one byte of data");
    let header = PrimaryHeader {
        version: 0,
        type_flag: 0,
        has_secondary_header: secondary.is_some(),
        apid,
        sequence_flags: SEQ_UNSEGMENTED,
        sequence_id: seq,
        len_minus1: u16::try_from(data_len - 1).unwrap(),
    };
    let mut dat = header.encode().to_vec();
    dat.extend_from_slice(sec);
    dat.extend_from_slice(body);
    dat
}

pub const SECONDARY: &[u8] = &[0xde, 0xad, 0xbe, 0xef];

/// Body for the fixture housekeeping schema.
pub fn housekeeping_body(mode: u8, temp: i16, volts: &[f32]) -> Vec<u8> {
    let mut body = BodyBuilder::new()
        .bits(4, u64::from(mode))
        .bits(12, (i64::from(temp) as u64) & 0xfff)
        .bits(8, volts.len() as u64);
    for v in volts {
        body = body.bytes(&v.to_le_bytes());
    }
    body.bytes(b"HK\0\0").build()
}

/// Body for the fixture status schema.
pub fn status_body(flags: u8, counter: u16) -> Vec<u8> {
    BodyBuilder::new()
        .bits(8, u64::from(flags))
        .bits(8, 0xff)
        .bits(16, u64::from(counter))
        .build()
}
