//! Message envelope between the scanner and the dispatcher, and the download
//! requests issued by the latter.

use super::batch::DownloadBatch;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Action name of a download request.
pub const DOWNLOAD_IMAGES: &str = "download_images";

/// Raw message: an action name and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Requested action.
    pub action: String,
    /// Action-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A message understood by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Download every image of the batch.
    DownloadImages(DownloadBatch),
}

impl Envelope {
    /// Wraps a batch into a `download_images` message.
    pub fn download_images(batch: &DownloadBatch) -> Result<Self> {
        Ok(Self {
            action: DOWNLOAD_IMAGES.to_owned(),
            payload: serde_json::to_value(batch)
                .context("serialize download batch")?,
        })
    }

    /// Decodes the message.
    ///
    /// Returns `None` for actions nobody listens to.
    pub fn request(&self) -> Result<Option<Request>> {
        if self.action != DOWNLOAD_IMAGES {
            return Ok(None);
        }

        let batch = DownloadBatch::deserialize(&self.payload)
            .context("parse download_images payload")?;

        Ok(Some(Request::DownloadImages(batch)))
    }
}

/// Acknowledgment sent back upon reception of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Request status.
    pub status: Status,
}

/// Status of an acknowledged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Processing started, completion is not reported.
    Started,
}

impl Response {
    /// The `started` acknowledgment.
    pub const STARTED: Self = Self {
        status: Status::Started,
    };
}

/// A request to save a resource on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Resource location: original URL or `data:` URI.
    pub url: String,
    /// Destination, relative to the download directory.
    pub filename: String,
    /// Ask the user where to save the file?
    pub save_as: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::batch::BatchItem;

    #[test]
    fn decode_download_images() {
        let json = r#"{
            "action": "download_images",
            "payload": {"images": ["https://x/a.png"], "userName": "Bob"}
        }"#;
        let envelope = serde_json::from_str::<Envelope>(json).expect("envelope");

        let request = envelope.request().expect("valid").expect("known action");

        assert_eq!(
            request,
            Request::DownloadImages(DownloadBatch {
                images: vec![BatchItem::RawUrl("https://x/a.png".to_owned())],
                user_name: "Bob".to_owned(),
            })
        );
    }

    #[test]
    fn unknown_action_is_ignored() {
        let envelope = serde_json::from_str::<Envelope>(r#"{"action": "ping"}"#)
            .expect("envelope");

        assert_eq!(envelope.request().expect("valid"), None);
    }

    #[test]
    fn invalid_payload() {
        let envelope = serde_json::from_str::<Envelope>(
            r#"{"action": "download_images", "payload": {"images": 42}}"#,
        )
        .expect("envelope");

        assert!(envelope.request().is_err());
    }

    #[test]
    fn envelope_round_trip() {
        let batch = DownloadBatch {
            images: vec![BatchItem::RawUrl("https://x/a.png".to_owned())],
            user_name: "Bob".to_owned(),
        };

        let envelope = Envelope::download_images(&batch).expect("envelope");

        assert_eq!(envelope.action, DOWNLOAD_IMAGES);
        assert_eq!(
            envelope.request().expect("valid"),
            Some(Request::DownloadImages(batch))
        );
    }

    #[test]
    fn wire_shapes() {
        assert_eq!(
            serde_json::to_value(Response::STARTED).expect("serialize"),
            serde_json::json!({"status": "started"})
        );

        let request = DownloadRequest {
            url: "https://x/a.png".to_owned(),
            filename: "Bob/a.png".to_owned(),
            save_as: false,
        };
        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            serde_json::json!({
                "url": "https://x/a.png",
                "filename": "Bob/a.png",
                "saveAs": false,
            })
        );
    }
}
