//! Scrape settings file parsing.
//!
//! The settings file lists venue blocks separated by blank lines. The first
//! line of a block names the venue (`acl`, or `acl (title)` to look papers up
//! by title instead of DOI); every following line is a volume label.
//! Lines starting with `#` are ignored.
//!
//! ```text
//! # ACL main conference and findings
//! acl
//! Proceedings of the 61st Annual Meeting
//! Findings of the Association for Computational Linguistics: ACL 2023
//!
//! emnlp (title)
//! Findings of EMNLP 2023
//! ```

use crate::error::{HindexError, Result};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// How papers of a venue are looked up in the citation search engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IdentifierMode {
    /// Search by DOI, falling back to the quoted title when a paper has none
    #[default]
    Doi,
    /// Search by quoted title
    Title,
}

impl fmt::Display for IdentifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierMode::Doi => write!(f, "doi"),
            IdentifierMode::Title => write!(f, "title"),
        }
    }
}

/// One venue and the volumes to scrape from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    /// Venue identifier as used by the bibliographic index (e.g. `acl`)
    pub venue: String,
    /// Identifier lookup mode
    pub mode: IdentifierMode,
    /// Volume labels, in file order
    pub volumes: Vec<String>,
}

/// Read and parse a settings file.
pub fn load(path: &Path) -> Result<Vec<ScrapeTarget>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HindexError::Config(format!("Cannot read settings file {:?}: {}", path, e))
    })?;
    let targets = parse(&content);
    info!(
        path = ?path,
        venues = targets.len(),
        volumes = targets.iter().map(|t| t.volumes.len()).sum::<usize>(),
        "Loaded scrape settings"
    );
    Ok(targets)
}

/// Parse settings text into scrape targets, preserving file order.
pub fn parse(content: &str) -> Vec<ScrapeTarget> {
    let mut targets: Vec<ScrapeTarget> = Vec::new();
    let mut current: Option<ScrapeTarget> = None;

    for line in content.lines() {
        let line = line.trim();

        if line.starts_with('#') {
            continue;
        }

        if line.is_empty() {
            if let Some(target) = current.take() {
                push_target(&mut targets, target);
            }
            continue;
        }

        match current.as_mut() {
            Some(target) => target.volumes.push(line.to_string()),
            None => current = Some(parse_header(line)),
        }
    }

    if let Some(target) = current.take() {
        push_target(&mut targets, target);
    }

    targets
}

fn push_target(targets: &mut Vec<ScrapeTarget>, target: ScrapeTarget) {
    if target.volumes.is_empty() {
        warn!(venue = %target.venue, "Venue block has no volumes, skipping");
        return;
    }
    debug!(venue = %target.venue, mode = %target.mode, volumes = target.volumes.len(), "Parsed venue block");
    targets.push(target);
}

/// Parse a venue header such as `acl` or `emnlp (title)`
fn parse_header(line: &str) -> ScrapeTarget {
    let (venue, mode) = match line.split_once(" (") {
        Some((venue, modifier)) if modifier.to_lowercase().contains("title") => {
            (venue, IdentifierMode::Title)
        }
        Some((venue, _)) => (venue, IdentifierMode::Doi),
        None => (line, IdentifierMode::Doi),
    };

    ScrapeTarget {
        venue: venue.trim().to_string(),
        mode,
        volumes: Vec::new(),
    }
}
