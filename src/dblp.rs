//! dblp bibliographic index client.
//!
//! Resolves configured volume labels to their listing pages on a venue's dblp
//! page, and extracts per-paper titles and DOIs from a listing page.

use crate::error::{HindexError, OptionExt, Result};
use crate::session::PageFetcher;
use crate::settings::{IdentifierMode, ScrapeTarget};
use crate::store::SENTINEL;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Default dblp conference root
pub const DEFAULT_DBLP_URL: &str = "https://dblp.org/db/conf";

/// Search term used to look a paper up in the citation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// Bare DOI, e.g. `10.18653/v1/2023.acl-long.1`
    Doi(String),
    /// Paper title, searched as an exact phrase
    Title(String),
    /// Nothing usable could be extracted
    Unresolved,
}

impl Identifier {
    /// Query string for the search engine, `None` when unresolved
    pub fn search_term(&self) -> Option<String> {
        match self {
            Identifier::Doi(doi) => Some(doi.clone()),
            Identifier::Title(title) => Some(format!("\"{}\"", title)),
            Identifier::Unresolved => None,
        }
    }

    /// Value for the `DOI` column of the raw dataset
    pub fn column(&self) -> String {
        self.search_term().unwrap_or_else(|| SENTINEL.to_string())
    }
}

/// One paper entry of a volume listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paper {
    pub identifier: Identifier,
    /// Title as listed on dblp
    pub title: Option<String>,
}

/// Listing page of one configured volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLink {
    pub venue: String,
    pub volume: String,
    pub url: String,
    pub year: String,
}

/// dblp client resolving volumes and their papers
pub struct DblpClient {
    fetcher: Arc<dyn PageFetcher>,
    root_url: String,
}

impl DblpClient {
    /// Create a new DblpClient
    ///
    /// # Arguments
    ///
    /// * `fetcher` - HTTP page fetcher
    /// * `root_url` - Conference root, e.g. `https://dblp.org/db/conf`
    pub fn new(fetcher: Arc<dyn PageFetcher>, root_url: &str) -> Self {
        Self {
            fetcher,
            root_url: root_url.trim_end_matches('/').to_string(),
        }
    }

    /// URL of a venue's index page
    pub fn venue_url(&self, venue: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}/", self.root_url, venue))
            .map_err(|e| HindexError::Config(format!("Invalid dblp URL for '{}': {}", venue, e)))
    }

    /// Locate the listing page and year of every configured volume.
    ///
    /// # Errors
    ///
    /// Returns a parse error if a volume label does not appear on the venue page
    pub async fn resolve_volumes(&self, target: &ScrapeTarget) -> Result<Vec<VolumeLink>> {
        let venue_url = self.venue_url(&target.venue)?;
        info!(venue = %target.venue, url = %venue_url, "Fetching venue index");
        let html = self.fetcher.get_text(venue_url.as_str()).await?;

        target
            .volumes
            .iter()
            .map(|volume| {
                let (url, year) = find_volume_link(&html, &venue_url, volume)?;
                debug!(venue = %target.venue, volume = %volume, url = %url, year = %year, "Resolved volume");
                Ok(VolumeLink {
                    venue: target.venue.clone(),
                    volume: volume.clone(),
                    url,
                    year,
                })
            })
            .collect()
    }

    /// Download a volume listing and extract its papers
    pub async fn fetch_papers(&self, link: &VolumeLink, mode: IdentifierMode) -> Result<Vec<Paper>> {
        info!(venue = %link.venue, volume = %link.volume, "Getting data from volume");
        let html = self.fetcher.get_text(&link.url).await?;
        let papers = extract_papers(&html, mode)?;

        let unresolved = papers
            .iter()
            .filter(|p| p.identifier == Identifier::Unresolved)
            .count();
        info!(count = papers.len(), unresolved = unresolved, "Extracted papers");
        Ok(papers)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| HindexError::Parse(e.to_string()))
}

fn has_class(element: &ElementRef, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// Find the listing URL and year heading of a volume on a venue page.
///
/// The volume label is matched against the text of the spans inside each
/// entry's `<cite>`; the link is the first one in the entry's `nav.publ`, the
/// year is the id of the `<h2>` heading the entry's list.
pub fn find_volume_link(html: &str, page_url: &Url, volume: &str) -> Result<(String, String)> {
    let document = Html::parse_document(html);
    let cite_selector = selector("cite")?;
    let span_selector = selector("span")?;
    let link_selector = selector("a[href]")?;

    let cite = document
        .select(&cite_selector)
        .find(|cite| {
            cite.select(&span_selector)
                .any(|span| span.text().collect::<String>().contains(volume))
        })
        .ok_or_else(|| HindexError::Parse(format!("Volume '{}' not found on {}", volume, page_url)))?;

    let href = cite
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "nav" && has_class(e, "publ"))
        .find_map(|nav| nav.select(&link_selector).next())
        .and_then(|a| a.value().attr("href"))
        .ok_or_parse(&format!("No listing link for volume '{}'", volume))?;

    let url = page_url
        .join(href)
        .map_err(|e| HindexError::Parse(format!("Bad listing link '{}': {}", href, e)))?;

    let year = find_year(&cite).ok_or_parse(&format!("No year heading for volume '{}'", volume))?;

    Ok((url.to_string(), year))
}

/// Year of the `<header><h2>` preceding the list containing an entry
fn find_year(cite: &ElementRef) -> Option<String> {
    let h2_selector = selector("h2").ok()?;
    let year_regex = Regex::new(r"\b(19|20)\d{2}\b").ok()?;

    cite.ancestors()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "ul")
        .find_map(|list| {
            let header = list
                .prev_siblings()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == "header")?;
            let heading = header.select(&h2_selector).next();

            heading
                .and_then(|h| h.value().attr("id"))
                .or_else(|| header.value().attr("id"))
                .map(str::to_string)
                .or_else(|| {
                    let text = heading?.text().collect::<String>();
                    year_regex.find(&text).map(|m| m.as_str().to_string())
                })
        })
}

/// Extract every paper entry of a volume listing page.
///
/// In DOI mode a paper without a DOI link falls back to its title; a paper
/// with neither becomes [`Identifier::Unresolved`] without affecting the rest.
pub fn extract_papers(html: &str, mode: IdentifierMode) -> Result<Vec<Paper>> {
    let document = Html::parse_document(html);
    let entry_selector = selector("ul.publ-list > li:not(.no-pub)")?;
    let title_selector = selector("cite > span[itemprop=\"name\"]")?;
    let link_selector = selector("a[href]")?;

    let mut papers = Vec::new();

    for entry in document.select(&entry_selector) {
        let title = entry
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let identifier = match mode {
            IdentifierMode::Title => title
                .clone()
                .map(Identifier::Title)
                .unwrap_or(Identifier::Unresolved),
            IdentifierMode::Doi => {
                let doi = entry
                    .select(&link_selector)
                    .find(|a| a.text().collect::<String>().contains("DOI"))
                    .and_then(|a| a.value().attr("href"))
                    .map(strip_doi_prefix);

                match (doi, &title) {
                    (Some(doi), _) => Identifier::Doi(doi),
                    (None, Some(title)) => {
                        warn!(title = %title, "No DOI, using the title instead");
                        Identifier::Title(title.clone())
                    }
                    (None, None) => Identifier::Unresolved,
                }
            }
        };

        if identifier == Identifier::Unresolved {
            warn!("Could not extract an identifier for a listing entry");
        }

        papers.push(Paper { identifier, title });
    }

    Ok(papers)
}

/// Bare DOI from a resolver link
fn strip_doi_prefix(href: &str) -> String {
    let href = href.trim();
    ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/"]
        .iter()
        .find_map(|prefix| href.strip_prefix(prefix))
        .unwrap_or(href)
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session::fake::FakeFetcher;

    pub const VENUE_PAGE: &str = r#"<html><body>
<header class="h2"><h2 id="2023">2023: Toronto, Canada</h2></header>
<ul class="publ-list">
  <li class="entry editor">
    <nav class="publ"><ul><li><div class="head"><a href="https://dblp.org/db/conf/acl/acl2023-1.html"><img alt=""></a></div></li></ul></nav>
    <cite class="data"><span itemprop="name">Proceedings of the 61st Annual Meeting (Volume 1: Long Papers)</span></cite>
  </li>
  <li class="entry editor">
    <nav class="publ"><ul><li><div class="head"><a href="acl2023f.html"><img alt=""></a></div></li></ul></nav>
    <cite class="data"><span itemprop="name">Findings of the Association for Computational Linguistics: ACL 2023</span></cite>
  </li>
</ul>
<header class="h2"><h2 id="2022">2022: Dublin, Ireland</h2></header>
<ul class="publ-list">
  <li class="entry editor">
    <nav class="publ"><ul><li><div class="head"><a href="https://dblp.org/db/conf/acl/acl2022-1.html"><img alt=""></a></div></li></ul></nav>
    <cite class="data"><span itemprop="name">Proceedings of the 60th Annual Meeting (Volume 1: Long Papers)</span></cite>
  </li>
</ul>
</body></html>"#;

    pub const LISTING_PAGE: &str = r##"<html><body>
<ul class="publ-list">
  <li class="entry inproceedings">
    <nav class="publ"><ul><li class="drop-down"><div class="body"><ul>
      <li class="ee"><a href="https://doi.org/10.18653/v1/2023.acl-long.1">electronic edition via DOI</a></li>
    </ul></div></li></ul></nav>
    <cite class="data"><span itemprop="author"><a href="#"><span itemprop="name">Ada Lovelace</span></a></span>:
      <span class="title" itemprop="name">Paper With DOI.</span></cite>
  </li>
  <li class="entry inproceedings">
    <nav class="publ"><ul><li><a href="https://aclanthology.org/x">electronic edition @ aclanthology.org</a></li></ul></nav>
    <cite class="data"><span class="title" itemprop="name">Paper Without DOI.</span></cite>
  </li>
  <li class="no-pub">withdrawn</li>
  <li class="entry inproceedings">
    <cite class="data"><span class="title">Broken Entry</span></cite>
  </li>
</ul>
</body></html>"##;

    fn page_url() -> Url {
        Url::parse("https://dblp.org/db/conf/acl/").expect("valid url")
    }

    #[test]
    fn test_find_volume_link_absolute() -> Result<()> {
        let (url, year) = find_volume_link(VENUE_PAGE, &page_url(), "61st Annual Meeting")?;
        assert_eq!(url, "https://dblp.org/db/conf/acl/acl2023-1.html");
        assert_eq!(year, "2023");
        Ok(())
    }

    #[test]
    fn test_find_volume_link_relative_and_year() -> Result<()> {
        let (url, year) = find_volume_link(VENUE_PAGE, &page_url(), "60th Annual Meeting")?;
        assert_eq!(url, "https://dblp.org/db/conf/acl/acl2022-1.html");
        assert_eq!(year, "2022");

        let (url, _) = find_volume_link(VENUE_PAGE, &page_url(), "Findings of the Association")?;
        assert_eq!(url, "https://dblp.org/db/conf/acl/acl2023f.html");
        Ok(())
    }

    #[test]
    fn test_find_volume_link_missing() {
        let err = find_volume_link(VENUE_PAGE, &page_url(), "Workshop on Nothing")
            .expect_err("should fail");
        assert!(matches!(err, HindexError::Parse(_)));
    }

    #[test]
    fn test_extract_papers_doi_mode() -> Result<()> {
        let papers = extract_papers(LISTING_PAGE, IdentifierMode::Doi)?;
        assert_eq!(papers.len(), 3);
        assert_eq!(
            papers[0].identifier,
            Identifier::Doi("10.18653/v1/2023.acl-long.1".to_string())
        );
        assert_eq!(papers[0].title.as_deref(), Some("Paper With DOI."));
        assert_eq!(
            papers[1].identifier,
            Identifier::Title("Paper Without DOI.".to_string())
        );
        assert_eq!(papers[2].identifier, Identifier::Unresolved);
        assert_eq!(papers[2].title, None);
        Ok(())
    }

    #[test]
    fn test_extract_papers_title_mode() -> Result<()> {
        let papers = extract_papers(LISTING_PAGE, IdentifierMode::Title)?;
        assert_eq!(
            papers[0].identifier.search_term().as_deref(),
            Some("\"Paper With DOI.\"")
        );
        assert_eq!(papers[2].identifier.column(), SENTINEL);
        Ok(())
    }

    #[test]
    fn test_strip_doi_prefix() {
        assert_eq!(strip_doi_prefix("https://doi.org/10.1/x"), "10.1/x");
        assert_eq!(strip_doi_prefix("http://dx.doi.org/10.1/y "), "10.1/y");
        assert_eq!(strip_doi_prefix("10.1/z"), "10.1/z");
    }

    #[tokio::test]
    async fn test_resolve_volumes_keeps_order() -> Result<()> {
        let fetcher = Arc::new(FakeFetcher::new().with_page("https://dblp.org/db/conf/acl/", VENUE_PAGE));
        let client = DblpClient::new(fetcher, "https://dblp.org/db/conf/");
        let target = ScrapeTarget {
            venue: "acl".to_string(),
            mode: IdentifierMode::Doi,
            volumes: vec!["Findings".to_string(), "60th Annual".to_string()],
        };

        let links = client.resolve_volumes(&target).await?;
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].volume, "Findings");
        assert_eq!(links[0].year, "2023");
        assert_eq!(links[1].year, "2022");
        Ok(())
    }
}
