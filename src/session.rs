//! Page client capabilities.
//!
//! The retrieval core never talks to a browser or an HTTP stack directly. It
//! drives a [`Session`] (an interactive browser: navigate, click, type, wait
//! for elements, read the page source) and a [`PageFetcher`] (plain HTTP GET of
//! listing pages and binary resources). Production implementations live in
//! [`crate::chrome`] and [`crate::http`]; scripted fakes for tests live in
//! `session::fake`.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Interval between element lookups while waiting for an element to appear
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Key appended to typed text to press Enter
pub const ENTER: &str = "\u{E007}";

/// Element lookup strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    /// CSS selector
    Css(&'static str),
    /// XPath expression
    XPath(&'static str),
}

impl Locator {
    /// Strategy name
    pub fn strategy(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css selector",
            Locator::XPath(_) => "xpath",
        }
    }

    /// Selector expression
    pub fn value(&self) -> &'static str {
        match self {
            Locator::Css(v) | Locator::XPath(v) => v,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy(), self.value())
    }
}

/// Opaque reference to an element of the current browsing context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element(String);

impl Element {
    /// Wrap a session-specific element id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Session-specific element id
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// An interactive browser session.
///
/// All operations act on the current browsing context, which is the top-level
/// document unless [`Session::enter_frame`] switched into an iframe.
#[async_trait]
pub trait Session: Send {
    /// Load a URL in the current window
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Reload the current page
    async fn refresh(&mut self) -> Result<()>;

    /// Serialized source of the current browsing context
    async fn page_source(&mut self) -> Result<String>;

    /// All elements currently matching the locator, in document order
    async fn find_all(&mut self, locator: &Locator) -> Result<Vec<Element>>;

    /// Left-click an element
    async fn click(&mut self, element: &Element) -> Result<()>;

    /// Rendered text of an element
    async fn text(&mut self, element: &Element) -> Result<String>;

    /// Attribute (or property) value of an element
    async fn attribute(&mut self, element: &Element, name: &str) -> Result<Option<String>>;

    /// Type keys into an element
    async fn send_keys(&mut self, element: &Element, keys: &str) -> Result<()>;

    /// Switch the browsing context into an iframe element
    async fn enter_frame(&mut self, element: &Element) -> Result<()>;

    /// Switch back to the top-level document
    async fn leave_frame(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the first element matching the locator.
    ///
    /// Returns `Ok(None)` when the wait expires.
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<Option<Element>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find_all(locator).await?.into_iter().next() {
                return Ok(Some(element));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Plain HTTP retrieval of pages and binary resources
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET a URL and return the body as text
    async fn get_text(&self, url: &str) -> Result<String>;

    /// GET a URL and return the raw body
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}
