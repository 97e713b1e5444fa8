//! Google Scholar citation retrieval.
//!
//! Queries Scholar one identifier at a time through an interactive
//! [`Session`], clears CAPTCHAs with the [`ChallengeSolver`], and reads the
//! first result's title and "Cited by N" count.

use crate::challenge::ChallengeSolver;
use crate::dblp::Identifier;
use crate::error::{HindexError, Result};
use crate::pacing::Jitter;
use crate::session::{Locator, Session};
use chrono::{DateTime, Local};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Title link of the first search result
pub const RESULT_LINK: Locator = Locator::XPath("//div[@data-rp='0']//h3/a");
/// Heading of the first search result (citation-only entries have no link)
pub const RESULT_HEADING: Locator = Locator::XPath("//div[@data-rp='0']//h3");
/// "Cited by N" link of the first search result
pub const CITED_BY: Locator =
    Locator::XPath("//div[@data-rp='0']//a[contains(text(), 'Cited by')]");

/// Citation count of one paper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Citations {
    /// Not determined: identifier unresolved or paper not indexed
    Unresolved,
    /// Citation count; zero when no "Cited by" link is rendered
    Count(u32),
}

impl Citations {
    /// Column value, `-1` when unresolved
    pub fn as_i64(&self) -> i64 {
        match self {
            Citations::Unresolved => -1,
            Citations::Count(n) => i64::from(*n),
        }
    }
}

/// Result of looking up one identifier
#[derive(Debug, Clone, PartialEq)]
pub struct CitationLookup {
    pub citations: Citations,
    pub retrieved_at: DateTime<Local>,
    /// Title of the matched search result
    pub scholar_title: Option<String>,
}

impl CitationLookup {
    fn unresolved() -> Self {
        Self {
            citations: Citations::Unresolved,
            retrieved_at: Local::now(),
            scholar_title: None,
        }
    }
}

/// Citation fetcher settings
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Scholar base URL (mirrors allowed)
    pub base_url: String,
    /// How long to wait for the "Cited by" link
    pub cited_by_wait: Duration,
    /// Log progress every this many identifiers
    pub progress_every: usize,
    /// Refresh-and-solve rounds allowed per query
    pub max_challenge_rounds: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SCHOLAR_URL.to_string(),
            cited_by_wait: Duration::from_secs(10),
            progress_every: 50,
            max_challenge_rounds: 3,
        }
    }
}

/// Sequential Scholar client over an interactive session
pub struct CitationFetcher<S: Session> {
    session: S,
    solver: ChallengeSolver,
    config: FetcherConfig,
    jitter: Jitter,
}

impl<S: Session> CitationFetcher<S> {
    pub fn new(session: S, solver: ChallengeSolver, config: FetcherConfig) -> Self {
        Self {
            session,
            solver,
            config,
            jitter: Jitter::default(),
        }
    }

    /// Replace the pause policy applied after every query
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Give the session back, e.g. to close it
    pub fn into_session(self) -> S {
        self.session
    }

    /// Look up every identifier in order.
    ///
    /// # Returns
    ///
    /// One lookup per identifier, same order as the input
    ///
    /// # Errors
    ///
    /// A fatal challenge error aborts the whole batch; no partial results are
    /// returned.
    pub async fn fetch_all(&mut self, identifiers: &[Identifier]) -> Result<Vec<CitationLookup>> {
        info!(count = identifiers.len(), "Getting citations");
        let mut lookups = Vec::with_capacity(identifiers.len());

        for (index, identifier) in identifiers.iter().enumerate() {
            if self.config.progress_every > 0 && (index + 1) % self.config.progress_every == 0 {
                info!(done = index + 1, total = identifiers.len(), "Papers scraped");
            }
            lookups.push(self.fetch_one(identifier).await?);
        }

        info!(count = lookups.len(), "Citations collected");
        Ok(lookups)
    }

    /// Look up a single identifier, pacing afterwards if a query was issued
    pub async fn fetch_one(&mut self, identifier: &Identifier) -> Result<CitationLookup> {
        let Some(term) = identifier.search_term() else {
            debug!("Skipping unresolved identifier");
            return Ok(CitationLookup::unresolved());
        };

        let url = build_search_url(&self.config.base_url, &term)?;
        debug!(url = %url, "Querying Scholar");
        self.session.navigate(url.as_str()).await?;
        self.clear_challenges().await?;

        let lookup = self.read_first_result().await?;
        self.jitter.pause().await;
        Ok(lookup)
    }

    /// Refresh and solve until the challenge marker is gone
    async fn clear_challenges(&mut self) -> Result<()> {
        let mut rounds = 0;
        loop {
            let source = self.session.page_source().await?;
            if !self.solver.config().is_challenge(&source) {
                return Ok(());
            }

            rounds += 1;
            if rounds > self.config.max_challenge_rounds {
                return Err(HindexError::ChallengeFailed(format!(
                    "challenge reappeared after {} rounds",
                    self.config.max_challenge_rounds
                )));
            }

            self.session.refresh().await?;
            self.solver.solve(&mut self.session).await?;
        }
    }

    async fn read_first_result(&mut self) -> Result<CitationLookup> {
        let mut title_element = self.session.find_all(&RESULT_LINK).await?.into_iter().next();
        if title_element.is_none() {
            title_element = self.session.find_all(&RESULT_HEADING).await?.into_iter().next();
        }

        let Some(element) = title_element else {
            info!("Paper is not on Google Scholar");
            return Ok(CitationLookup::unresolved());
        };
        let title = clean_title(&self.session.text(&element).await?);

        let citations = match self.session.wait_for(&CITED_BY, self.config.cited_by_wait).await? {
            Some(link) => {
                let text = self.session.text(&link).await?;
                parse_cited_by(&text).unwrap_or_else(|| {
                    warn!(text = %text, "Unreadable citation link, recording 0");
                    0
                })
            }
            None => {
                debug!(title = %title, "No citations");
                0
            }
        };

        Ok(CitationLookup {
            citations: Citations::Count(citations),
            retrieved_at: Local::now(),
            scholar_title: Some(title),
        })
    }
}

/// Build Google Scholar search URL
fn build_search_url(base_url: &str, query: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url.trim_end_matches('/')))
        .map_err(|e| HindexError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("hl", "en"); // Force English so "Cited by" is matched

    Ok(url)
}

/// Parse the trailing integer of a "Cited by N" link
pub fn parse_cited_by(text: &str) -> Option<u32> {
    let re = Regex::new(r"(\d+)\s*$").ok()?;
    re.captures(text.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Strip `[PDF]`, `[CITATION]`, `[C]`-style markers from a result heading
fn clean_title(raw: &str) -> String {
    let cleaned = match Regex::new(r"^(?:\s*\[[^\]]*\])+") {
        Ok(re) => re.replace(raw, "").into_owned(),
        Err(_) => raw.to_string(),
    };
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
