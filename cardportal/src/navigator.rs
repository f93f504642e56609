//! Blocking HTTP session that tracks the "current page".

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use scraper::Html;
use url::Url;

use crate::sink::PageSink;
use crate::Error;

/// User agent sent to every portal.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A fetched response, kept as the navigator's current page.
#[derive(Debug, Clone)]
pub struct Page {
    url: Url,
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl Page {
    /// Final address of the page (after redirects).
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Parses the body into a fresh document tree.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.text())
    }
}

/// Cookie-carrying HTTP session plus the page it last fetched.
///
/// Every navigation replaces the current page; relative links are resolved
/// against the final URL of that page. Document views are reparsed on each
/// access, so they never outlive a navigation.
pub struct Navigator {
    http: Client,
    current: Option<Page>,
    sink: Option<Arc<dyn PageSink + Send + Sync>>,
}

impl Navigator {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            http: build_client()?,
            current: None,
            sink: None,
        })
    }

    /// Attaches a sink that sees every fetched page.
    pub fn with_sink(mut self, sink: Arc<dyn PageSink + Send + Sync>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_sink(&mut self, sink: Option<Arc<dyn PageSink + Send + Sync>>) {
        self.sink = sink;
    }

    pub fn page(&self) -> Option<&Page> {
        self.current.as_ref()
    }

    /// Parsed view of the current page.
    pub fn document(&self) -> Result<Html, Error> {
        self.current.as_ref().map(Page::document).ok_or(Error::NoPage)
    }

    /// Resolves `url` against the current page, or returns it unchanged when
    /// there is no current page (or it cannot be joined).
    pub fn resolve_url(&self, url: &str) -> String {
        match &self.current {
            Some(page) => match page.url.join(url) {
                Ok(joined) => joined.to_string(),
                Err(_) => url.to_string(),
            },
            None => url.to_string(),
        }
    }

    /// GETs `url` and makes the response the current page.
    pub fn navigate(&mut self, url: &str) -> Result<&Page, Error> {
        let target = parse_url(&self.resolve_url(url))?;
        tracing::debug!("GET {}", target);
        let resp = self.http.get(target).send()?;
        self.store("GET", resp)
    }

    /// POSTs an url-encoded payload and makes the response the current page.
    pub fn post_form(&mut self, url: &str, fields: &[(String, String)]) -> Result<&Page, Error> {
        let target = parse_url(&self.resolve_url(url))?;
        tracing::debug!("POST {} ({} fields)", target, fields.len());
        let resp = self.http.post(target).form(fields).send()?;
        self.store("POST", resp)
    }

    /// Drops the current page and starts over with an empty cookie jar.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.http = build_client()?;
        self.current = None;
        Ok(())
    }

    fn store(&mut self, method: &str, resp: Response) -> Result<&Page, Error> {
        let url = resp.url().clone();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes()?.to_vec();
        tracing::debug!("{} {} -> {}", method, url, status);

        if !status.is_success() {
            let snippet = truncate_body(&String::from_utf8_lossy(&body));
            tracing::error!("Request to {} failed with status {}: {}", url, status, snippet);
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body: snippet,
            });
        }

        let page = Page {
            url,
            status: status.as_u16(),
            content_type,
            body,
        };
        if let Some(sink) = &self.sink {
            sink.record(method, &page);
        }
        Ok(self.current.insert(page))
    }
}

fn build_client() -> Result<Client, Error> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .cookie_store(true)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|source| Error::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

/// Longest error-body excerpt kept in errors and logs, in bytes.
pub const BODY_SNIPPET: usize = 512;

/// `body` cut to [`BODY_SNIPPET`] bytes on a char boundary, `...` marking a cut.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= BODY_SNIPPET {
        return body.to_string();
    }
    let mut end = BODY_SNIPPET;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_without_page_is_verbatim() {
        let nav = Navigator::new().unwrap();
        assert_eq!(nav.resolve_url("dispatch.do?x=1"), "dispatch.do?x=1");
        assert_eq!(nav.resolve_url("https://a.example/x"), "https://a.example/x");
    }

    #[test]
    fn resolve_against_current_page() {
        let mut nav = Navigator::new().unwrap();
        nav.current = Some(Page {
            url: Url::parse("https://portal.example/cas/dispatch.do?bt_PRELON=do").unwrap(),
            status: 200,
            content_type: None,
            body: Vec::new(),
        });
        assert_eq!(
            nav.resolve_url("logout.do"),
            "https://portal.example/cas/logout.do"
        );
        assert_eq!(nav.resolve_url("/root"), "https://portal.example/root");
        assert_eq!(nav.resolve_url("?a=b"), "https://portal.example/cas/dispatch.do?a=b");
    }

    #[test]
    fn document_requires_page() {
        let nav = Navigator::new().unwrap();
        assert!(matches!(nav.document(), Err(Error::NoPage)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "ä".repeat(1500);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert!(out.len() <= BODY_SNIPPET + 3);
        assert_eq!(truncate_body("short"), "short");
    }
}
