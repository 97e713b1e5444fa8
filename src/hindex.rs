//! Per-volume h-index aggregation.
//!
//! Groups raw records by (venue, volume, year) and summarizes each group's
//! citation counts.

use crate::error::Result;
use crate::store::{read_records, RawRecord};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Column order of the summary file
pub const SUMMARY_COLUMNS: [&str; 7] = [
    "conference",
    "volume",
    "year",
    "h-index",
    "number_of_papers",
    "citations_per_paper_average",
    "type",
];

/// Track of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Main,
    Findings,
}

impl Category {
    /// Classify a volume label; any case of "finding" marks a findings volume
    pub fn of_volume(volume: &str) -> Self {
        if volume.to_lowercase().contains("finding") {
            Category::Findings
        } else {
            Category::Main
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Main => "Main",
            Category::Findings => "Findings",
        }
    }

    /// Sortable label written to the summary; main-track rows sort first
    pub fn label(&self) -> &'static str {
        match self {
            Category::Main => "1-Main",
            Category::Findings => "2-Findings",
        }
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Summary row of one venue/volume/year group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueVolumeYearStat {
    pub conference: String,
    pub volume: String,
    pub year: String,
    #[serde(rename = "h-index")]
    pub h_index: usize,
    pub number_of_papers: usize,
    pub citations_per_paper_average: f64,
    #[serde(rename = "type")]
    pub category: Category,
}

/// Largest h such that at least h counts are >= h.
///
/// Walks candidates k = 1..=n over the counts sorted descending and stops at
/// the first k whose top-k entries are not all >= k.
pub fn h_index(citations: &[u32]) -> usize {
    let mut sorted = citations.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    sorted
        .iter()
        .enumerate()
        .take_while(|&(i, &c)| c as usize > i)
        .count()
}

/// Group records and compute each group's summary.
///
/// Rows without an identifier and rows whose paper was not found by the
/// search engine (`citations == -1`) are left out; zero counts are kept.
/// Groups come out sorted by (venue, volume, year).
pub fn aggregate(records: &[RawRecord]) -> Vec<VenueVolumeYearStat> {
    let mut groups: BTreeMap<(&str, &str, &str), Vec<u32>> = BTreeMap::new();

    for record in records.iter().filter(|r| r.has_identifier()) {
        let Ok(count) = u32::try_from(record.citations) else {
            continue;
        };
        groups
            .entry((
                record.conference.as_str(),
                record.volume.as_str(),
                record.year.as_str(),
            ))
            .or_default()
            .push(count);
    }

    groups
        .into_iter()
        .map(|((conference, volume, year), citations)| {
            let total: u64 = citations.iter().map(|&c| u64::from(c)).sum();
            VenueVolumeYearStat {
                conference: conference.to_string(),
                volume: volume.to_string(),
                year: year.to_string(),
                h_index: h_index(&citations),
                number_of_papers: citations.len(),
                citations_per_paper_average: total as f64 / citations.len() as f64,
                category: Category::of_volume(volume),
            }
        })
        .collect()
}

/// Write summary rows as CSV
pub fn write_summary(path: &Path, stats: &[VenueVolumeYearStat]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    writer.write_record(SUMMARY_COLUMNS)?;
    for stat in stats {
        writer.serialize(stat)?;
    }
    writer.flush()?;
    Ok(())
}

/// Aggregate a raw dataset file into a summary file
pub fn run(input: &Path, output: &Path) -> Result<Vec<VenueVolumeYearStat>> {
    let records = read_records(input)?;
    let stats = aggregate(&records);
    write_summary(output, &stats)?;
    info!(
        input = ?input,
        output = ?output,
        rows = records.len(),
        groups = stats.len(),
        "H-index calculated"
    );
    Ok(stats)
}
