#![doc = include_str!("../README.md")]

mod error;

pub mod bits;
pub mod decode;
pub mod demux;
pub mod schema;
pub mod session;
pub mod spacepacket;
pub mod table;

pub use error::{Error, Result};
pub use schema::{FieldDef, PacketSchema, SchemaDef, SchemaSet};
pub use session::{Decoded, DecodeReport, Decoder};
pub use table::{Column, DecodedTable};
