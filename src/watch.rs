//! Watch mode: keeps the snapshot fresh, dispatches on request.

use crate::{
    termio, BatchHandle, BatchReport, Dispatcher, Envelope, Page, Scanner,
    ScrapedImage,
};
use eyre::Result;
use std::{
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};

/// Rescans the page every `interval`, dispatches the snapshot whenever
/// something is received on `requests`.
///
/// Stops once `requests` is disconnected, after every started batch is done.
pub fn run<L>(
    scanner: &mut Scanner,
    dispatcher: &Dispatcher,
    requests: &Receiver<()>,
    interval: Duration,
    mut load: L,
) -> Vec<BatchReport>
where
    L: FnMut() -> Result<Page>,
{
    let mut batches = Vec::new();
    let mut next_scan = Instant::now();

    loop {
        let now = Instant::now();
        if now >= next_scan {
            rescan(scanner, &mut load);
            next_scan = now + interval;
        }

        match requests.recv_timeout(next_scan.saturating_duration_since(now)) {
            Ok(()) => batches.extend(request_download(scanner, dispatcher)),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    batches.into_iter().map(BatchHandle::wait).collect()
}

/// Refreshes the scanner's snapshot, reporting changes.
///
/// On load failure the tick is skipped and the snapshot kept.
fn rescan<L>(scanner: &mut Scanner, load: &mut L)
where
    L: FnMut() -> Result<Page>,
{
    let page = match load() {
        Ok(page) => page,
        Err(err) => {
            termio::print_warn(&format!("scan failed: {err:#}"));
            return;
        },
    };

    // Generated titles change on every scan, only look at the URLs.
    let urls = |images: &[ScrapedImage]| {
        images.iter().map(|image| image.url.clone()).collect::<Vec<_>>()
    };
    let before = scanner.snapshot();
    let (name, before) = (before.user_name.clone(), urls(&before.images));
    let after = scanner.scan(&page);
    if after.user_name != name || urls(&after.images) != before {
        termio::print_ok(&format!(
            "User: {}, {} covers found",
            after.user_name,
            after.images.len()
        ));
    }
}

/// Sends the current snapshot to the dispatcher.
fn request_download(
    scanner: &mut Scanner,
    dispatcher: &Dispatcher,
) -> Option<BatchHandle> {
    let batch = match scanner.prepare_dispatch(Instant::now()) {
        Some(batch) => batch,
        None if scanner.snapshot().images.is_empty() => {
            termio::print_warn("no cover found yet");
            return None;
        },
        None => {
            termio::print_warn("a download was just started, wait a bit");
            return None;
        },
    };

    let count = batch.images.len();
    let response = Envelope::download_images(&batch)
        .and_then(|envelope| dispatcher.handle_message(&envelope));
    match response {
        Ok(Some((_, handle))) => {
            scanner.dispatch_acknowledged(Instant::now());
            termio::print_ok(&format!("download of {count} covers started"));
            Some(handle)
        },
        Ok(None) => {
            scanner.dispatch_failed();
            None
        },
        Err(err) => {
            termio::print_err(&format!("send download request: {err:#}"));
            scanner.dispatch_failed();
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DownloadRequest, Downloads, Fetcher, ScannerConfig, DEFAULT_USER_NAME,
    };
    use eyre::bail;
    use kuchiki::traits::*;
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc,
        },
        thread,
    };
    use url::Url;

    struct NoFetch;

    impl Fetcher for NoFetch {
        fn fetch(&self, url: &Url, _buf: &mut Vec<u8>) -> Result<()> {
            bail!("unexpected fetch of {url}")
        }
    }

    /// Slow downloads, counting completions.
    #[derive(Default)]
    struct SlowDownloads {
        done: AtomicUsize,
    }

    impl Downloads for SlowDownloads {
        fn download(&self, request: &DownloadRequest) -> Result<PathBuf> {
            thread::sleep(Duration::from_millis(50));
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(&request.filename))
        }
    }

    fn profile(urls: &[&str]) -> Page {
        let cards = urls
            .iter()
            .map(|url| {
                format!(
                    r#"<section class="note-item"><img src="{url}">
                    <div class="footer"><a class="title"><span>Note</span></a></div>
                    </section>"#
                )
            })
            .collect::<String>();
        let html = format!("<html><body><div>{cards}</div></body></html>");

        Page::new(kuchiki::parse_html().one(html), None)
    }

    fn setup() -> (Scanner, Dispatcher, Arc<SlowDownloads>) {
        let downloads = Arc::new(SlowDownloads::default());
        let dispatcher = Dispatcher::new(
            Arc::new(NoFetch),
            Arc::clone(&downloads) as Arc<dyn Downloads>,
            None,
        );

        (Scanner::new(&ScannerConfig::default()), dispatcher, downloads)
    }

    #[test]
    fn failed_load_keeps_snapshot() {
        let (mut scanner, dispatcher, _) = setup();
        let (sender, requests) = mpsc::channel();
        let mut sender = Some(sender);
        let mut loads = 0;

        let reports = run(
            &mut scanner,
            &dispatcher,
            &requests,
            Duration::from_millis(1),
            || {
                loads += 1;
                match loads {
                    1 => Ok(profile(&["https://cdn/a.webp", "https://cdn/b.webp"])),
                    2 => bail!("connection reset"),
                    _ => {
                        // Stop after this tick.
                        drop(sender.take());
                        bail!("connection reset")
                    },
                }
            },
        );

        assert!(reports.is_empty());
        assert_eq!(loads, 3);
        let urls = scanner
            .snapshot()
            .images
            .iter()
            .map(|image| image.url.as_str())
            .collect::<Vec<_>>();
        assert_eq!(urls, vec!["https://cdn/a.webp", "https://cdn/b.webp"]);
        assert_eq!(scanner.snapshot().user_name, DEFAULT_USER_NAME);
    }

    #[test]
    fn request_during_cooldown_is_refused() {
        let (mut scanner, dispatcher, downloads) = setup();
        let (sender, requests) = mpsc::channel();
        sender.send(()).expect("send");
        sender.send(()).expect("send");
        drop(sender);

        let reports = run(
            &mut scanner,
            &dispatcher,
            &requests,
            Duration::from_secs(60),
            || Ok(profile(&["https://cdn/a.webp"])),
        );

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].saved.len(), 1);
        assert_eq!(downloads.done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_without_covers_is_ignored() {
        let (mut scanner, dispatcher, downloads) = setup();
        let (sender, requests) = mpsc::channel();
        sender.send(()).expect("send");
        drop(sender);

        let reports = run(
            &mut scanner,
            &dispatcher,
            &requests,
            Duration::from_secs(60),
            || Ok(profile(&[])),
        );

        assert!(reports.is_empty());
        assert_eq!(downloads.done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disconnect_waits_for_batches() {
        let (mut scanner, dispatcher, downloads) = setup();
        let (sender, requests) = mpsc::channel();
        sender.send(()).expect("send");
        drop(sender);

        let reports = run(
            &mut scanner,
            &dispatcher,
            &requests,
            Duration::from_secs(60),
            || Ok(profile(&["https://cdn/a.webp", "https://cdn/b.png"])),
        );

        // Every download completed before returning.
        assert_eq!(downloads.done.load(Ordering::SeqCst), 2);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].saved.len(), 2);
        assert_eq!(reports[0].failed, 0);
    }
}
