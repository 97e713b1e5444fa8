//! Chrome session over the DevTools protocol.
//!
//! Elements are addressed by (frame, locator, position) and resolved by a
//! script on every use. Frame contents are reached through
//! `contentDocument`, so a launched browser runs with site isolation and
//! same-origin checks off; a browser joined with `--connect` must have been
//! started with the same flags. Clicks and keystrokes are sent as CDP input
//! events.

use crate::error::{HindexError, Result};
use crate::session::{Element, Locator, Session, ENTER};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Flags that let scripts read into cross-origin iframes
const FRAME_ACCESS_ARGS: [&str; 3] = [
    "--disable-web-security",
    "--disable-site-isolation-trials",
    "--disable-features=IsolateOrigins,site-per-process",
];

const TEXT: &str = "return el.innerText ?? el.textContent ?? '';";
const FOCUS: &str = "el.focus(); return true;";
const CENTER: &str = "el.scrollIntoView({ block: 'center', inline: 'center' }); \
     const r = el.getBoundingClientRect(); const o = offset(); \
     return { x: o.x + r.left + r.width / 2, y: o.y + r.top + r.height / 2 };";
const FRAME_INDEX: &str = "return Array.from(document.querySelectorAll('iframe')).indexOf(el);";

/// Browser launch options
#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    pub user_agent: Option<String>,
    pub headless: bool,
    /// Chrome executable; autodetected when unset
    pub executable: Option<PathBuf>,
    /// DevTools websocket of an already running browser
    pub connect_url: Option<String>,
}

impl BrowserOptions {
    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = FRAME_ACCESS_ARGS.iter().map(|a| a.to_string()).collect();
        args.push("--disable-dev-shm-usage".to_string());
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={}", ua));
        }
        args
    }

    fn config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_secs(60))
            .window_size(1920, 1080)
            .args(self.args());
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| HindexError::Config(format!("Invalid browser config: {}", e)))
    }
}

/// Element address, re-resolved on every use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Handle {
    frame: Option<usize>,
    locator: Locator,
    index: usize,
}

/// Script result wrapper; `v` is absent when the element is gone
#[derive(Debug, Deserialize)]
struct Reply<T> {
    v: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Center {
    x: f64,
    y: f64,
}

fn cdp(e: CdpError) -> HindexError {
    HindexError::Browser(e.to_string())
}

/// Browser session driven through chromiumoxide
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    launched: bool,
    frame: Option<usize>,
    handles: Vec<Handle>,
}

impl ChromeSession {
    /// Launch Chrome, or join a running one, and open a blank tab
    pub async fn start(options: &BrowserOptions) -> Result<Self> {
        let (browser, mut handler) = match &options.connect_url {
            Some(url) => {
                info!(url = %url, "Connecting to running Chrome");
                Browser::connect(url.as_str()).await.map_err(cdp)?
            }
            None => Browser::launch(options.config()?).await.map_err(cdp)?,
        };

        // Chrome emits events chromiumoxide cannot decode; keep draining
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler error");
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(cdp)?;
        if let Some(ua) = &options.user_agent {
            page.set_user_agent(ua.as_str()).await.map_err(cdp)?;
        }
        info!(headless = options.headless, "Browser session started");

        Ok(Self {
            browser,
            page,
            handler,
            launched: options.connect_url.is_none(),
            frame: None,
            handles: Vec::new(),
        })
    }

    /// Close the tab, and the browser if this session launched it
    pub async fn quit(mut self) -> Result<()> {
        if self.launched {
            self.browser.close().await.map_err(cdp)?;
            if let Err(e) = self.browser.wait().await {
                debug!(error = %e, "Browser process did not exit cleanly");
            }
        } else {
            self.page.close().await.map_err(cdp)?;
        }
        self.handler.abort();
        info!("Browser session closed");
        Ok(())
    }

    fn reset(&mut self) {
        self.frame = None;
        self.handles.clear();
    }

    fn handle(&self, element: &Element) -> Result<Handle> {
        element
            .id()
            .parse::<usize>()
            .ok()
            .and_then(|i| self.handles.get(i).copied())
            .ok_or_else(|| HindexError::Browser(format!("Unknown element {}", element.id())))
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<Option<T>> {
        let result = self.page.evaluate(script).await.map_err(cdp)?;
        let reply: Reply<T> = result.into_value()?;
        Ok(reply.v)
    }

    async fn eval_element<T: DeserializeOwned>(&self, element: &Element, action: &str) -> Result<T> {
        let handle = self.handle(element)?;
        self.eval(element_script(&handle, action)?)
            .await?
            .ok_or_else(|| HindexError::Browser(format!("Element {} is no longer attached", element.id())))
    }

    async fn press_enter(&self) -> Result<()> {
        let down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .text("\r")
            .build()
            .map_err(HindexError::Browser)?;
        let up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .build()
            .map_err(HindexError::Browser)?;

        self.page.execute(down).await.map_err(cdp)?;
        self.page.execute(up).await.map_err(cdp)?;
        Ok(())
    }
}

/// Script resolving `found` (all matches of a locator) in the current frame,
/// then running `body`; the body's return value is wrapped as `{ v }`.
fn locate_script(frame: Option<usize>, locator: &Locator, body: &str) -> Result<String> {
    let selector = serde_json::to_string(locator.value())?;
    let query = match locator {
        Locator::Css(_) => format!("Array.from(doc.querySelectorAll({}))", selector),
        Locator::XPath(_) => format!(
            "(() => {{ const s = doc.evaluate({}, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
             const out = []; for (let i = 0; i < s.snapshotLength; i++) out.push(s.snapshotItem(i)); \
             return out; }})()",
            selector
        ),
    };
    let frame = frame.map_or_else(|| "null".to_string(), |i| i.to_string());

    Ok(format!(
        r#"(() => {{
    let doc = document, host = null;
    const frame = {frame};
    if (frame !== null) {{
        host = document.querySelectorAll('iframe')[frame];
        if (!host || !host.contentDocument) return {{ v: null }};
        doc = host.contentDocument;
    }}
    const offset = () => {{
        if (!host) return {{ x: 0, y: 0 }};
        const r = host.getBoundingClientRect();
        return {{ x: r.left + host.clientLeft, y: r.top + host.clientTop }};
    }};
    const found = {query};
    const result = (() => {{ {body} }})();
    return {{ v: result === undefined ? null : result }};
}})()"#
    ))
}

fn element_script(handle: &Handle, action: &str) -> Result<String> {
    let body = format!(
        "const el = found[{}]; if (!el) return null; {}",
        handle.index, action
    );
    locate_script(handle.frame, &handle.locator, &body)
}

fn frame_source_script(frame: usize) -> String {
    format!(
        "(() => {{ const host = document.querySelectorAll('iframe')[{}]; \
         const doc = host && host.contentDocument; \
         return {{ v: doc ? doc.documentElement.outerHTML : null }}; }})()",
        frame
    )
}

/// Split a trailing Enter key off typed text
fn split_enter(keys: &str) -> (&str, bool) {
    match keys.strip_suffix(ENTER) {
        Some(text) => (text, true),
        None => (keys, false),
    }
}

#[async_trait]
impl Session for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page.goto(url).await.map_err(cdp)?;
        self.reset();
        Ok(())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.page.reload().await.map_err(cdp)?;
        self.reset();
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String> {
        match self.frame {
            None => self.page.content().await.map_err(cdp),
            Some(frame) => self
                .eval::<String>(frame_source_script(frame))
                .await?
                .ok_or_else(|| HindexError::Browser(format!("Frame {} is gone", frame))),
        }
    }

    async fn find_all(&mut self, locator: &Locator) -> Result<Vec<Element>> {
        let script = locate_script(self.frame, locator, "return found.length;")?;
        let count = self.eval::<usize>(script).await?.unwrap_or(0);

        let mut elements = Vec::with_capacity(count);
        for index in 0..count {
            elements.push(Element::new(self.handles.len().to_string()));
            self.handles.push(Handle {
                frame: self.frame,
                locator: *locator,
                index,
            });
        }
        Ok(elements)
    }

    async fn click(&mut self, element: &Element) -> Result<()> {
        let center: Center = self.eval_element(element, CENTER).await?;
        self.page
            .click(Point::new(center.x, center.y))
            .await
            .map_err(cdp)?;
        Ok(())
    }

    async fn text(&mut self, element: &Element) -> Result<String> {
        self.eval_element(element, TEXT).await
    }

    async fn attribute(&mut self, element: &Element, name: &str) -> Result<Option<String>> {
        let handle = self.handle(element)?;
        let action = format!("return el.getAttribute({});", serde_json::to_string(name)?);
        self.eval(element_script(&handle, &action)?).await
    }

    async fn send_keys(&mut self, element: &Element, keys: &str) -> Result<()> {
        let _: bool = self.eval_element(element, FOCUS).await?;
        let (text, enter) = split_enter(keys);
        if !text.is_empty() {
            self.page
                .execute(InsertTextParams::new(text))
                .await
                .map_err(cdp)?;
        }
        if enter {
            self.press_enter().await?;
        }
        Ok(())
    }

    async fn enter_frame(&mut self, element: &Element) -> Result<()> {
        let handle = self.handle(element)?;
        if handle.frame.is_some() {
            return Err(HindexError::Browser("Nested frames are not supported".to_string()));
        }
        let index: i64 = self.eval_element(element, FRAME_INDEX).await?;
        let index = usize::try_from(index)
            .map_err(|_| HindexError::Browser(format!("Element {} is not an iframe", element.id())))?;
        self.frame = Some(index);
        Ok(())
    }

    async fn leave_frame(&mut self) -> Result<()> {
        self.frame = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_locator_is_escaped_into_query() -> Result<()> {
        let script = locate_script(None, &Locator::Css("a[title=\"x\"]"), "return found.length;")?;
        assert!(script.contains(r#"doc.querySelectorAll("a[title=\"x\"]")"#));
        assert!(script.contains("const frame = null;"));
        Ok(())
    }

    #[test]
    fn test_xpath_locator_uses_snapshot() -> Result<()> {
        let script = locate_script(Some(2), &Locator::XPath("//div[@data-rp='0']//h3"), "return 1;")?;
        assert!(script.contains("doc.evaluate(\"//div[@data-rp='0']//h3\""));
        assert!(script.contains("ORDERED_NODE_SNAPSHOT_TYPE"));
        assert!(script.contains("const frame = 2;"));
        Ok(())
    }

    #[test]
    fn test_element_script_picks_position() -> Result<()> {
        let handle = Handle {
            frame: Some(0),
            locator: Locator::Css("span.recaptcha-checkbox"),
            index: 3,
        };
        let script = element_script(&handle, TEXT)?;
        assert!(script.contains("const el = found[3]; if (!el) return null;"));
        assert!(script.contains("el.innerText"));
        Ok(())
    }

    #[test]
    fn test_split_enter() {
        assert_eq!(split_enter(&format!("seven blue{}", ENTER)), ("seven blue", true));
        assert_eq!(split_enter("seven"), ("seven", false));
        assert_eq!(split_enter(ENTER), ("", true));
    }

    #[test]
    fn test_launch_args_carry_options() {
        let options = BrowserOptions {
            user_agent: Some("UA/1.0".to_string()),
            ..Default::default()
        };
        let args = options.args();
        assert!(args.contains(&"--user-agent=UA/1.0".to_string()));
        assert!(args.contains(&"--disable-site-isolation-trials".to_string()));
    }

    #[test]
    fn test_reply_without_value_is_none() -> Result<()> {
        let reply: Reply<String> = serde_json::from_value(serde_json::json!({ "v": null }))?;
        assert!(reply.v.is_none());
        let reply: Reply<usize> = serde_json::from_value(serde_json::json!({ "v": 4 }))?;
        assert_eq!(reply.v, Some(4));
        Ok(())
    }
}
