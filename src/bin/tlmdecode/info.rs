use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::{stdout, Write};
use std::path::Path;

use anyhow::{Context, Result};
use ccsds_tlm::spacepacket::{missing_packets, read_packets, Apid};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Default, Debug, Clone, Serialize)]
struct Summary {
    total_packets: usize,
    total_bytes: usize,
    missing_packets: usize,
}

#[derive(Debug, Clone, Serialize)]
struct Info {
    filename: String,
    summary: Summary,
    apids: BTreeMap<Apid, Summary>,
    /// Why reading stopped before the end of the file, if it did.
    error: Option<String>,
}

fn summarize(fpath: &Path) -> Result<Info> {
    let reader = std::fs::File::open(fpath).context("opening input")?;

    let mut last_seqid: BTreeMap<Apid, u16> = BTreeMap::default();
    let mut apids: BTreeMap<Apid, Summary> = BTreeMap::default();
    let mut summary = Summary::default();
    let mut error = None;

    for zult in read_packets(std::io::BufReader::new(reader)) {
        let packet = match zult {
            Ok(packet) => packet,
            Err(err) => {
                warn!("{err}");
                error = Some(err.to_string());
                break;
            }
        };
        let hdr = packet.header;
        let missing = match last_seqid.insert(hdr.apid, hdr.sequence_id) {
            Some(last) => missing_packets(hdr.sequence_id, last) as usize,
            None => 0,
        };

        summary.total_packets += 1;
        summary.total_bytes += packet.data.len();
        summary.missing_packets += missing;

        let apid = apids.entry(hdr.apid).or_default();
        apid.total_packets += 1;
        apid.total_bytes += packet.data.len();
        apid.missing_packets += missing;
    }

    Ok(Info {
        filename: fpath.to_string_lossy().to_string(),
        summary,
        apids,
        error,
    })
}

fn render_text(info: &Info) -> Result<String> {
    let mut s = String::new();
    writeln!(s, "{}", info.filename)?;
    writeln!(s, "{}", "=".repeat(40))?;
    writeln!(s, "Count:    {}", info.summary.total_packets)?;
    writeln!(s, "Bytes:    {}", info.summary.total_bytes)?;
    writeln!(s, "Missing:  {}", info.summary.missing_packets)?;
    if let Some(err) = &info.error {
        writeln!(s, "Error:    {err}")?;
    }
    writeln!(s, "{}", "-".repeat(40))?;
    writeln!(s, "{:>6}  {:>8}  {:>12}  {:>7}", "APID", "Count", "Bytes", "Missing")?;
    writeln!(s, "{}", "-".repeat(40))?;
    for (apid, summary) in &info.apids {
        writeln!(
            s,
            "{:>6}  {:>8}  {:>12}  {:>7}",
            apid, summary.total_packets, summary.total_bytes, summary.missing_packets
        )?;
    }
    Ok(s)
}

pub fn info(fpath: &Path, format: &Format) -> Result<()> {
    let info = summarize(fpath)?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("rendering text")?;
            stdout()
                .write_all(data.as_bytes())
                .context("writing to stdout")
        }
    }
}
