//! Scraped covers and download batches.

use serde::{Deserialize, Serialize};

/// Author name used when none could be extracted from the page.
pub const DEFAULT_USER_NAME: &str = "REDnote_User";

/// A cover image found on a profile page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedImage {
    /// Image URL, unique within a scan.
    pub url: String,
    /// Sanitized title, safe to use as a file name.
    pub title: String,
}

/// An item of a download batch.
///
/// Both wire shapes are accepted: `{"url": …, "title": …}` and a bare URL
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    /// Image with a title, saved as `<title>.<ext>`.
    Titled(ScrapedImage),
    /// Bare URL, saved under a generated name.
    RawUrl(String),
}

impl BatchItem {
    /// Returns the image URL.
    pub fn url(&self) -> &str {
        match *self {
            Self::Titled(ref image) => &image.url,
            Self::RawUrl(ref url) => url,
        }
    }
}

impl From<ScrapedImage> for BatchItem {
    fn from(value: ScrapedImage) -> Self {
        Self::Titled(value)
    }
}

/// Payload of a `download_images` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadBatch {
    /// Images to download, in page order.
    pub images: Vec<BatchItem>,
    /// Author name, used as destination folder.
    #[serde(default = "default_user_name")]
    pub user_name: String,
}

fn default_user_name() -> String {
    DEFAULT_USER_NAME.to_owned()
}
