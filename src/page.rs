//! Profile pages, fetched online or read from a saved copy.

use crate::{selectors::BASE_SELECTOR, Client};
use eyre::{eyre, Result, WrapErr};
use kuchiki::{traits::*, NodeRef};
use std::{fmt, path::PathBuf, str::FromStr};
use url::Url;

/// Where to read a profile page from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    /// Live page, fetched over HTTP.
    Url(Url),
    /// Page saved on disk.
    File(PathBuf),
}

/// A parsed profile page.
pub struct Page {
    /// Parsed document.
    document: NodeRef,
    /// URL to resolve relative links against, if known.
    base_url: Option<Url>,
}

impl PageSource {
    /// Loads and parses the page.
    pub fn load(&self, client: &Client) -> Result<Page> {
        match *self {
            Self::Url(ref url) => {
                let document = client
                    .get_html(url)
                    .with_context(|| format!("get profile page {url}"))?;
                Ok(Page::new(document, Some(url.clone())))
            },
            Self::File(ref path) => {
                let document = kuchiki::parse_html()
                    .from_utf8()
                    .from_file(path)
                    .with_context(|| format!("read {}", path.display()))?;
                // Relative `src` point next to the saved page.
                let url = std::fs::canonicalize(path)
                    .ok()
                    .and_then(|path| Url::from_file_path(path).ok());
                Ok(Page::new(document, url))
            },
        }
    }
}

impl FromStr for PageSource {
    type Err = eyre::Report;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                Self::Url(url)
            },
            Ok(url) if url.scheme() == "file" => Self::File(
                url.to_file_path()
                    .map_err(|()| eyre!("invalid file URL {url}"))?,
            ),
            _ => Self::File(value.into()),
        })
    }
}

impl fmt::Display for PageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Url(ref url) => write!(f, "{url}"),
            Self::File(ref path) => write!(f, "{}", path.display()),
        }
    }
}

impl Page {
    /// Wraps a parsed document.
    ///
    /// A `<base href>` in the document takes precedence over `url`.
    pub fn new(document: NodeRef, url: Option<Url>) -> Self {
        let base_href = BASE_SELECTOR
            .filter(document.descendants().elements())
            .find_map(|base| {
                let href = base.attributes.borrow().get("href").map(str::to_owned);
                href
            });
        let base_url = match base_href {
            Some(href) => match url {
                Some(ref url) => url.join(&href).ok(),
                None => Url::parse(&href).ok(),
            }
            .or(url),
            None => url,
        };

        Self { document, base_url }
    }

    /// Returns the document root.
    pub fn document(&self) -> &NodeRef {
        &self.document
    }

    /// Turns an `src` attribute into an absolute URL, the way browsers do.
    ///
    /// Returns `None` for empty values.
    pub fn resolve(&self, src: &str) -> Option<String> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }

        let protocol_relative = src.starts_with("//");
        let resolved = match self.base_url {
            Some(ref base) if !protocol_relative || base.scheme() != "file" => {
                base.join(src)
            },
            // Protocol-relative URLs are common on CDNs.
            _ if protocol_relative => Url::parse(&format!("https:{src}")),
            _ => Url::parse(src),
        };

        // Keep unresolvable values as-is, the download will fail loudly.
        Some(resolved.map_or_else(|_| src.to_owned(), String::from))
    }
}
