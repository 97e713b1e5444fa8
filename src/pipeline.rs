//! Scrape driver.
//!
//! Resolves every configured volume on dblp, then walks the volumes in order:
//! extract papers, look up citations, append rows, flush. Volumes already in
//! the store are skipped so an interrupted run can be restarted.

use crate::dblp::{DblpClient, Identifier, VolumeLink};
use crate::error::Result;
use crate::scholar::{CitationFetcher, Citations};
use crate::session::Session;
use crate::settings::{IdentifierMode, ScrapeTarget};
use crate::store::{RawRecord, ResultStore};
use std::collections::HashSet;
use tracing::{info, warn};

/// Counters reported at the end of a scrape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Volumes scraped during this run
    pub volumes_scraped: usize,
    /// Volumes found in the store and left alone
    pub volumes_skipped: usize,
    pub papers: usize,
    /// Papers without a usable identifier
    pub unresolved: usize,
    /// Papers searched but not found
    pub not_indexed: usize,
    /// Volume labels listed more than once in the settings
    pub duplicates: usize,
}

/// Scrape pipeline over a dblp client, a citation fetcher and a store
pub struct Pipeline<S: Session> {
    dblp: DblpClient,
    fetcher: CitationFetcher<S>,
    store: ResultStore,
}

impl<S: Session> Pipeline<S> {
    pub fn new(dblp: DblpClient, fetcher: CitationFetcher<S>, store: ResultStore) -> Self {
        Self {
            dblp,
            fetcher,
            store,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Give the browser session back once the run is over
    pub fn into_session(self) -> S {
        self.fetcher.into_session()
    }

    /// Scrape every target.
    ///
    /// All volume links are resolved before the first citation query, so a
    /// misspelled volume label fails fast. The store is flushed after each
    /// completed volume.
    ///
    /// # Errors
    ///
    /// Any dblp or fatal challenge error stops the run; volumes flushed
    /// before the error stay on disk.
    pub async fn run(&mut self, targets: &[ScrapeTarget]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut plan: Vec<(VolumeLink, IdentifierMode)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for target in targets {
            for link in self.dblp.resolve_volumes(target).await? {
                if !seen.insert((link.venue.clone(), link.volume.clone())) {
                    warn!(venue = %link.venue, volume = %link.volume, "Volume listed more than once, scraping it once");
                    summary.duplicates += 1;
                    continue;
                }
                plan.push((link, target.mode));
            }
        }
        info!(volumes = plan.len(), "Resolved volume links");

        for (link, mode) in &plan {
            if self.store.contains_volume(&link.venue, &link.volume) {
                info!(venue = %link.venue, volume = %link.volume, "Already scraped, skipping");
                summary.volumes_skipped += 1;
                continue;
            }

            self.scrape_volume(link, *mode, &mut summary).await?;
            summary.volumes_scraped += 1;
        }

        info!(
            scraped = summary.volumes_scraped,
            skipped = summary.volumes_skipped,
            papers = summary.papers,
            unresolved = summary.unresolved,
            not_indexed = summary.not_indexed,
            duplicates = summary.duplicates,
            "Scrape finished"
        );
        Ok(summary)
    }

    async fn scrape_volume(
        &mut self,
        link: &VolumeLink,
        mode: IdentifierMode,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let papers = self.dblp.fetch_papers(link, mode).await?;
        if papers.is_empty() {
            warn!(
                venue = %link.venue,
                volume = %link.volume,
                "Volume listing has no papers; nothing is stored, so a resumed run fetches it again"
            );
        }

        let identifiers: Vec<Identifier> = papers.iter().map(|p| p.identifier.clone()).collect();
        let lookups = self.fetcher.fetch_all(&identifiers).await?;

        for (paper, lookup) in papers.iter().zip(&lookups) {
            summary.papers += 1;
            match (&paper.identifier, lookup.citations) {
                (Identifier::Unresolved, _) => summary.unresolved += 1,
                (_, Citations::Unresolved) => summary.not_indexed += 1,
                _ => {}
            }
            self.store.append(RawRecord::new(link, paper, lookup));
        }

        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{ChallengeConfig, ChallengeSolver};
    use crate::dblp::tests::{LISTING_PAGE, VENUE_PAGE};
    use crate::error::HindexError;
    use crate::pacing::Jitter;
    use crate::scholar::FetcherConfig;
    use crate::session::fake::{FakeChallenge, FakeFetcher, FakeResult, FakeSession, FakeTranscriber};
    use crate::store::read_records;
    use std::path::Path;
    use std::sync::Arc;

    const FINDINGS_PAGE: &str = r#"<html><body>
<ul class="publ-list">
  <li class="entry inproceedings">
    <nav class="publ"><ul><li><a href="https://doi.org/10.1/findings">electronic edition via DOI</a></li></ul></nav>
    <cite class="data"><span class="title" itemprop="name">Findings Paper.</span></cite>
  </li>
</ul>
</body></html>"#;

    const EMPTY_PAGE: &str = r#"<html><body><ul class="publ-list"></ul></body></html>"#;

    const MAIN: &str = "61st Annual Meeting";
    const FINDINGS: &str = "Findings of the Association";

    fn target() -> ScrapeTarget {
        ScrapeTarget {
            venue: "acl".to_string(),
            mode: IdentifierMode::Doi,
            volumes: vec![MAIN.to_string(), FINDINGS.to_string()],
        }
    }

    fn session() -> FakeSession {
        FakeSession::new()
            .with_result("10.18653/v1/2023.acl-long.1", FakeResult::cited("Paper With DOI", 12))
            .with_result("\"Paper Without DOI.\"", FakeResult::uncited("Paper Without DOI"))
    }

    fn pipeline(session: FakeSession, store_path: &Path) -> Result<Pipeline<FakeSession>> {
        let pages = FakeFetcher::new()
            .with_page("https://dblp.org/db/conf/acl/", VENUE_PAGE)
            .with_page("https://dblp.org/db/conf/acl/acl2023-1.html", LISTING_PAGE)
            .with_page("https://dblp.org/db/conf/acl/acl2023f.html", FINDINGS_PAGE)
            .with_page("https://dblp.org/db/conf/acl/acl2022-1.html", EMPTY_PAGE);
        let dblp = DblpClient::new(Arc::new(pages), "https://dblp.org/db/conf");

        let solver = ChallengeSolver::new(
            Arc::new(FakeFetcher::new()),
            Arc::new(FakeTranscriber::new(vec![])),
            ChallengeConfig::default(),
        )
        .with_jitter(Jitter::none());
        let fetcher = CitationFetcher::new(session, solver, FetcherConfig::default())
            .with_jitter(Jitter::none());

        Ok(Pipeline::new(dblp, fetcher, ResultStore::open(store_path.to_path_buf())?))
    }

    #[tokio::test]
    async fn test_run_scrapes_all_volumes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw_data.csv");
        let session = session().with_result("10.1/findings", FakeResult::cited("Findings Paper", 3));
        let mut pipeline = pipeline(session, &path)?;

        let summary = pipeline.run(&[target()]).await?;
        assert_eq!(
            summary,
            RunSummary {
                volumes_scraped: 2,
                volumes_skipped: 0,
                papers: 4,
                unresolved: 1,
                not_indexed: 0,
                duplicates: 0,
            }
        );

        let rows = read_records(&path)?;
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].citations, 12);
        assert_eq!(rows[0].year, "2023");
        assert_eq!(rows[1].doi, "\"Paper Without DOI.\"");
        assert_eq!(rows[1].citations, 0);
        assert_eq!(rows[2].doi, "-1");
        assert_eq!(rows[3].volume, FINDINGS);
        assert_eq!(rows[3].citations, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_skips_stored_volumes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw_data.csv");

        let mut first = pipeline(session(), &path)?;
        let main_only = ScrapeTarget {
            volumes: vec![MAIN.to_string()],
            ..target()
        };
        first.run(&[main_only]).await?;

        let session = FakeSession::new().with_result("10.1/findings", FakeResult::cited("F", 1));
        let mut second = pipeline(session, &path)?;
        let summary = second.run(&[target()]).await?;

        assert_eq!(summary.volumes_skipped, 1);
        assert_eq!(summary.volumes_scraped, 1);
        assert_eq!(second.into_session().queries(), vec!["10.1/findings"]);
        assert_eq!(read_records(&path)?.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_fatal_challenge_keeps_flushed_volumes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw_data.csv");
        let session = session().with_challenge_on("10.1/findings", FakeChallenge::blocked());
        let mut pipeline = pipeline(session, &path)?;

        let result = pipeline.run(&[target()]).await;
        assert!(matches!(result, Err(HindexError::ChallengeBlocked)));

        let rows = read_records(&path)?;
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.volume == MAIN));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_volume_fails_before_any_query() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw_data.csv");
        let mut pipeline = pipeline(session(), &path)?;

        let bad = ScrapeTarget {
            volumes: vec![MAIN.to_string(), "Workshop on Nothing".to_string()],
            ..target()
        };
        let result = pipeline.run(&[bad]).await;
        assert!(matches!(result, Err(HindexError::Parse(_))));
        assert!(pipeline.into_session().queries().is_empty());
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_volume_is_scraped_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw_data.csv");
        let mut pipeline = pipeline(session(), &path)?;

        let repeated = ScrapeTarget {
            volumes: vec![MAIN.to_string(), MAIN.to_string()],
            ..target()
        };
        let summary = pipeline.run(&[repeated]).await?;

        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.volumes_scraped, 1);
        assert_eq!(summary.volumes_skipped, 0);
        assert_eq!(
            pipeline.into_session().queries(),
            vec!["10.18653/v1/2023.acl-long.1", "\"Paper Without DOI.\""]
        );
        assert_eq!(read_records(&path)?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_volume_is_fetched_again_on_resume() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("raw_data.csv");
        let empty = ScrapeTarget {
            volumes: vec!["60th Annual Meeting".to_string()],
            ..target()
        };

        let summary = pipeline(session(), &path)?.run(&[empty.clone()]).await?;
        assert_eq!(summary.volumes_scraped, 1);
        assert_eq!(summary.papers, 0);
        assert!(read_records(&path)?.is_empty());

        let summary = pipeline(session(), &path)?.run(&[empty]).await?;
        assert_eq!(summary.volumes_scraped, 1);
        assert_eq!(summary.volumes_skipped, 0);
        Ok(())
    }
}
