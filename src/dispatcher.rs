//! Download dispatcher: turns a batch into independent download requests.
//!
//! Every item is processed on its own thread: a failing item is logged and
//! never affects its siblings. The sender only gets an immediate `started`
//! acknowledgment, completion can be observed through the [`BatchHandle`].

use crate::{
    fs,
    media::{self, TargetFormat},
    models::{
        batch::{BatchItem, DownloadBatch, DEFAULT_USER_NAME},
        message::{DownloadRequest, Envelope, Request, Response},
    },
    termio, Fetcher,
};
use eyre::{ensure, eyre, Result, WrapErr};
use std::{
    path::{Component, Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread,
};
use url::Url;

/// Something able to save a resource on disk.
pub trait Downloads: Send + Sync {
    /// Saves the requested resource, returns where it has been written.
    fn download(&self, request: &DownloadRequest) -> Result<PathBuf>;
}

/// Dispatches download batches.
pub struct Dispatcher {
    /// Shared with the item workers.
    shared: Arc<Shared>,
}

struct Shared {
    fetcher: Arc<dyn Fetcher>,
    downloads: Arc<dyn Downloads>,
    /// Re-encode titled images to this format, if any.
    format: Option<TargetFormat>,
}

/// Everything a worker needs to process one item.
struct Job {
    shared: Arc<Shared>,
    user_name: Arc<str>,
    timestamp: u128,
    index: usize,
    item: BatchItem,
}

/// Result of a single batch item.
#[derive(Debug)]
pub struct ItemOutcome {
    /// Position of the item in the batch.
    pub index: usize,
    /// Image URL.
    pub url: String,
    /// Where the image has been saved, or why it failed.
    pub result: Result<PathBuf>,
}

/// Completion summary of a batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Files written, in completion order.
    pub saved: Vec<PathBuf>,
    /// Number of items that failed.
    pub failed: usize,
}

/// Tracks the items of a dispatched batch.
pub struct BatchHandle {
    receiver: mpsc::Receiver<ItemOutcome>,
    len: usize,
}

impl Dispatcher {
    /// Initializes a new dispatcher.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        downloads: Arc<dyn Downloads>,
        format: Option<TargetFormat>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                downloads,
                format,
            }),
        }
    }

    /// Handles an incoming message.
    ///
    /// Returns `None` (no response) for actions the dispatcher doesn't
    /// listen to.
    pub fn handle_message(
        &self,
        envelope: &Envelope,
    ) -> Result<Option<(Response, BatchHandle)>> {
        Ok(envelope.request()?.map(|request| match request {
            Request::DownloadImages(batch) => {
                (Response::STARTED, self.dispatch(batch))
            },
        }))
    }

    /// Starts downloading every item of the batch, without waiting.
    pub fn dispatch(&self, batch: DownloadBatch) -> BatchHandle {
        let user_name = match fs::sanitize_name(&batch.user_name) {
            name if name.is_empty() => DEFAULT_USER_NAME.into(),
            name => Arc::<str>::from(name),
        };
        let timestamp = fs::timestamp();
        let len = batch.images.len();
        let (sender, receiver) = mpsc::channel();

        for (index, item) in batch.images.into_iter().enumerate() {
            let url = item.url().to_owned();
            let job = Job {
                shared: Arc::clone(&self.shared),
                user_name: Arc::clone(&user_name),
                timestamp,
                index,
                item,
            };
            let worker_sender = sender.clone();

            let spawned = thread::Builder::new()
                .name(format!("download-{index}"))
                .spawn(move || {
                    let outcome = job.run();
                    // The handle may have been dropped: nobody's listening.
                    drop(worker_sender.send(outcome));
                });

            if let Err(err) = spawned {
                termio::print_err(&format!("download {url}: {err}"));
                drop(sender.send(ItemOutcome {
                    index,
                    url,
                    result: Err(eyre!(err).wrap_err("spawn download worker")),
                }));
            }
        }

        BatchHandle { receiver, len }
    }
}

impl Job {
    /// Processes the item, logging any error.
    fn run(self) -> ItemOutcome {
        let url = self.item.url().to_owned();
        let result = self
            .request()
            .and_then(|request| self.shared.downloads.download(&request))
            .with_context(|| format!("download {url}"));

        if let Err(ref err) = result {
            termio::print_err(&format!("{err:#}"));
        }

        ItemOutcome {
            index: self.index,
            url,
            result,
        }
    }

    /// Builds the download request for the item.
    fn request(&self) -> Result<DownloadRequest> {
        let (url, name, extension) = match self.item {
            BatchItem::Titled(ref image) => {
                let title = fs::sanitize_title(&image.title).unwrap_or_else(
                    || fs::cover_name(self.timestamp, self.index),
                );
                match self.shared.format {
                    Some(format) => {
                        let bytes =
                            retrieve(self.shared.fetcher.as_ref(), &image.url)
                                .context("fetch image")?;
                        let bytes = media::transcode(&bytes, format)?;
                        let uri = media::to_data_uri(&bytes, format.mime_type())?;
                        (uri, title, format.extension())
                    },
                    None => (
                        image.url.clone(),
                        title,
                        media::extension_from_url(&image.url),
                    ),
                }
            },
            BatchItem::RawUrl(ref url) => (
                url.clone(),
                fs::cover_name(self.timestamp, self.index),
                media::extension_from_url(url),
            ),
        };

        Ok(DownloadRequest {
            url,
            filename: format!("{}/{name}.{extension}", self.user_name),
            save_as: false,
        })
    }
}

impl BatchHandle {
    /// Returns the number of items in the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Tests if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Waits for every item to complete.
    pub fn wait(self) -> BatchReport {
        self.wait_with(|_| {})
    }

    /// Waits for every item to complete, calling `on_outcome` as they do.
    pub fn wait_with<F>(self, mut on_outcome: F) -> BatchReport
    where
        F: FnMut(&ItemOutcome),
    {
        let mut report = BatchReport::default();

        // Ends once every worker is done (and dropped its sender).
        for outcome in self.receiver {
            on_outcome(&outcome);
            if let Ok(path) = outcome.result {
                report.saved.push(path);
            }
        }
        // Workers that died without reporting count as failures too.
        report.failed = self.len - report.saved.len();

        report
    }
}

// -----------------------------------------------------------------------------

/// Saves downloads under a root directory.
pub struct DiskDownloads {
    /// Download directory.
    root: PathBuf,
    /// Used to retrieve remote resources.
    fetcher: Arc<dyn Fetcher>,
    /// Serializes the selection of free file names.
    write_lock: Mutex<()>,
}

impl DiskDownloads {
    /// Initializes a new downloader, writing under `root`.
    pub fn new(root: PathBuf, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            root,
            fetcher,
            write_lock: Mutex::new(()),
        }
    }
}

impl Downloads for DiskDownloads {
    fn download(&self, request: &DownloadRequest) -> Result<PathBuf> {
        // We never prompt: `save_as` is only relevant for interactive hosts.
        let relative = relative_path(&request.filename)?;
        let bytes = retrieve(self.fetcher.as_ref(), &request.url)?;

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::mkdir_p(parent)?;
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| eyre!("download lock poisoned"))?;
        // Never overwrite, like browsers do.
        let path = fs::unique_path(&path);
        fs::atomic_write(&path, &bytes)?;

        Ok(path)
    }
}

/// Validates a download file name.
fn relative_path(filename: &str) -> Result<PathBuf> {
    let path = Path::new(filename);

    ensure!(
        path.components().next().is_some()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_))),
        "invalid path `{filename}`"
    );

    Ok(path.to_path_buf())
}

/// Retrieves the bytes behind an URL, `data:` and `file:` URIs included.
fn retrieve(fetcher: &dyn Fetcher, url: &str) -> Result<Vec<u8>> {
    if url.starts_with("data:") {
        return media::from_data_uri(url);
    }

    let url = Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    // Images next to a saved page.
    if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|()| eyre!("invalid file URL {url}"))?;
        return std::fs::read(&path)
            .with_context(|| format!("read {}", path.display()));
    }

    let mut buf = Vec::new();
    fetcher.fetch(&url, &mut buf)?;

    Ok(buf)
}
