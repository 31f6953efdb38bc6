use std::fs::File;
use std::io::{stdout, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ccsds_tlm::demux::UnmatchedApid;
use ccsds_tlm::{Decoded, Decoder, SchemaDef, SchemaSet};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum Unmatched {
    Skip,
    Error,
}

impl clap::ValueEnum for Unmatched {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Skip, Self::Error]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Skip => Some(clap::builder::PossibleValue::new("skip")),
            Self::Error => Some(clap::builder::PossibleValue::new("error")),
        }
    }
}

impl From<Unmatched> for UnmatchedApid {
    fn from(value: Unmatched) -> Self {
        match value {
            Unmatched::Skip => UnmatchedApid::Skip,
            Unmatched::Error => UnmatchedApid::Error,
        }
    }
}

pub struct Opts {
    pub strict: bool,
    pub unmatched: Unmatched,
    pub parallel: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    One(SchemaDef),
    Many(Vec<SchemaDef>),
}

pub fn load_schemas(paths: &[PathBuf]) -> Result<SchemaSet> {
    let mut defs = Vec::default();
    for path in paths {
        let file = File::open(path).with_context(|| format!("opening schema {path:?}"))?;
        let parsed: SchemaFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing schema {path:?}"))?;
        match parsed {
            SchemaFile::One(def) => defs.push(def),
            SchemaFile::Many(more) => defs.extend(more),
        }
    }
    SchemaSet::from_defs(defs).context("invalid schema")
}

fn write_json<W: Write>(writer: W, decoded: &Decoded) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer(&mut writer, decoded).context("serializing to json")?;
    writer.write_all(b"\n").context("writing output")?;
    writer.flush().context("writing output")
}

pub fn decode(input: &Path, schemas: &[PathBuf], opts: &Opts, output: Option<&Path>) -> Result<()> {
    let schemas = load_schemas(schemas)?;
    info!(
        "loaded {} schemas: {}",
        schemas.len(),
        schemas.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );
    let decoder = Decoder::builder()
        .schemas(schemas)
        .unmatched_apid(opts.unmatched.clone().into())
        .strict_field_bounds(opts.strict)
        .build();

    let zult = if opts.parallel {
        let dat = std::fs::read(input).with_context(|| format!("reading {input:?}"))?;
        decoder.decode_parallel(&dat)
    } else {
        let file = File::open(input).context("opening input")?;
        decoder.decode_reader(BufReader::new(file))
    };
    let decoded = zult.context("decoding")?;

    let report = &decoded.report;
    info!(
        "decoded {} packets ({} bytes) into {} tables; {} unmatched, {} issues",
        report.count,
        report.bytes,
        decoded.tables.len(),
        report.unmatched,
        report.issues.len()
    );
    if let Some(stop) = &report.stopped {
        warn!("decoding stopped early: {}", stop.error);
    }

    match output {
        Some(path) => {
            let dest =
                File::create(path).with_context(|| format!("failed to create output {path:?}"))?;
            write_json(dest, &decoded)
        }
        None => write_json(stdout().lock(), &decoded),
    }
}
