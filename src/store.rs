//! Raw dataset persistence.
//!
//! [`ResultStore`] accumulates one [`RawRecord`] per paper and rewrites the
//! whole CSV file on every flush; the last flush wins. The pipeline flushes
//! once per completed volume, so the file on disk is always a set of whole
//! volumes and doubles as the resume checkpoint.

use crate::dblp::{Paper, VolumeLink};
use crate::error::Result;
use crate::scholar::CitationLookup;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Literal recorded when a value could not be determined
pub const SENTINEL: &str = "-1";

/// Column order of the raw dataset file
pub const RAW_COLUMNS: [&str; 8] = [
    "DOI",
    "conference_title",
    "scholar_title",
    "conference",
    "volume",
    "citations",
    "year",
    "retrieved_at",
];

/// Timestamp layout of the `retrieved_at` column
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One row of the raw dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// DOI or quoted title used as search term, `-1` if none
    #[serde(rename = "DOI")]
    pub doi: String,
    /// Title as listed on dblp
    pub conference_title: String,
    /// Title of the matched Scholar result, `-1` if none
    pub scholar_title: String,
    pub conference: String,
    pub volume: String,
    /// Citation count, `-1` if undetermined
    pub citations: i64,
    pub year: String,
    pub retrieved_at: String,
}

impl RawRecord {
    /// Combine a listing entry with its citation lookup
    pub fn new(link: &VolumeLink, paper: &Paper, lookup: &CitationLookup) -> Self {
        Self {
            doi: paper.identifier.column(),
            conference_title: paper.title.clone().unwrap_or_else(|| SENTINEL.to_string()),
            scholar_title: lookup
                .scholar_title
                .clone()
                .unwrap_or_else(|| SENTINEL.to_string()),
            conference: link.venue.clone(),
            volume: link.volume.clone(),
            citations: lookup.citations.as_i64(),
            year: link.year.clone(),
            retrieved_at: lookup.retrieved_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Whether an identifier was extracted for this paper
    pub fn has_identifier(&self) -> bool {
        self.doi != SENTINEL
    }
}

/// Append-only accumulator of raw records backed by a CSV file
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    records: Vec<RawRecord>,
}

impl ResultStore {
    /// Empty store that will overwrite `path` on flush
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: Vec::new(),
        }
    }

    /// Store seeded with the rows already flushed to `path`, if any
    pub fn open(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "No previous raw dataset");
            return Ok(Self::new(path));
        }

        let records = read_records(&path)?;
        info!(path = ?path, rows = records.len(), "Resuming from previous raw dataset");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record to the in-memory dataset
    pub fn append(&mut self, record: RawRecord) {
        self.records.push(record);
    }

    /// Whether any row of a venue/volume pair is already stored
    pub fn contains_volume(&self, venue: &str, volume: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.conference == venue && r.volume == volume)
    }

    /// Rewrite the file with the full dataset.
    ///
    /// Writes to a sibling temporary file first and renames it over the
    /// target, so an interrupted flush leaves the previous checkpoint intact.
    pub fn flush(&self) -> Result<()> {
        let tmp_path = self.path.with_extension("csv.tmp");
        write_records(&tmp_path, &self.records)?;
        std::fs::rename(&tmp_path, &self.path)?;
        info!(path = ?self.path, rows = self.records.len(), "Saved results");
        Ok(())
    }
}

/// Read a raw dataset file
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<RawRecord>, csv::Error>>()?;
    Ok(records)
}

fn write_records(path: &Path, records: &[RawRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(RAW_COLUMNS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
