pub mod fs;
pub mod termio;
pub mod watch;

mod client;
mod dispatcher;
mod media;
mod models;
mod page;
mod scanner;
mod selectors;
mod xpath;

pub use client::{Client, Fetcher};
pub use dispatcher::{
    BatchHandle, BatchReport, DiskDownloads, Dispatcher, Downloads, ItemOutcome,
};
pub use media::TargetFormat;
pub use models::{
    batch::{BatchItem, DownloadBatch, ScrapedImage, DEFAULT_USER_NAME},
    message::{DownloadRequest, Envelope, Request, Response, Status},
};
pub use page::{Page, PageSource};
pub use scanner::{
    DispatchGuard, Scanner, ScannerConfig, Snapshot, DEFAULT_AUTHOR_PATH,
    DEFAULT_CARDS_PATH, DEFAULT_TITLE_PATH, DISPATCH_COOLDOWN, SCAN_INTERVAL,
};
pub use xpath::StructuralPath;
