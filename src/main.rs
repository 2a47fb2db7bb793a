//! rednote-covers - Scrape and download cover images from RedNote/小红书

// Lints {{{

#![deny(
    nonstandard_style,
    rust_2018_idioms,
    future_incompatible,
    rustdoc::all,
    rustdoc::missing_crate_level_docs,
    missing_docs,
    unreachable_pub,
    unsafe_code,
    unused,
    unused_import_braces,
    unused_lifetimes,
    // unused_qualifications: not denied, clap 3 derive output trips it on newer rustc
    variant_size_differences,
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::clone_on_ref_ptr,
    clippy::exit,
    clippy::filetype_is_file,
    clippy::float_cmp_const,
    clippy::lossy_float_literal,
    clippy::mem_forget,
    clippy::panic,
    clippy::pattern_type_mismatch,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unneeded_field_pattern,
    clippy::verbose_file_reads,
    clippy::dbg_macro,
    clippy::let_underscore_must_use,
    clippy::todo,
    clippy::unwrap_used,
    clippy::use_debug
)]
#![allow(
    // The 90’s called and wanted their charset back :p
    clippy::non_ascii_literal,
)]

// }}}

use clap::{Args, Parser, Subcommand};
use eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use rednote_covers::{
    termio, watch, BatchHandle, BatchReport, Client, DiskDownloads, Dispatcher,
    Envelope, Fetcher, PageSource, Scanner, ScannerConfig, TargetFormat,
    DEFAULT_AUTHOR_PATH, DEFAULT_CARDS_PATH, DEFAULT_TITLE_PATH, SCAN_INTERVAL,
};
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

fn main() -> Result<()> {
    let opts = Opts::parse();
    let client = Client::new(opts.retry, Duration::from_millis(opts.delay_ms));
    let scanner_config = opts.paths.scanner_config();
    let dispatcher = make_dispatcher(&opts, &client);

    match opts.command {
        Command::Scan { ref source } => scan(&client, &scanner_config, source)
            .with_context(|| format!("scan {source}")),
        Command::Download { ref source } => {
            download(&client, &dispatcher, &scanner_config, source)
                .with_context(|| format!("download covers from {source}"))
        },
        Command::Watch {
            ref source,
            interval,
        } => watch(
            &client,
            &dispatcher,
            &scanner_config,
            source,
            Duration::from_secs(interval.max(1)),
        )
        .with_context(|| format!("watch {source}")),
        Command::Dispatch { ref file } => {
            dispatch(&dispatcher, file.clone()).context("dispatch message")
        },
    }
}

/// Builds the dispatcher, saving under the output directory.
fn make_dispatcher(opts: &Opts, client: &Client) -> Dispatcher {
    let fetcher: Arc<dyn Fetcher> = Arc::new(client.clone());
    let downloads =
        Arc::new(DiskDownloads::new(opts.output.clone(), Arc::clone(&fetcher)));
    let format = (!opts.keep_original).then(|| opts.format);

    Dispatcher::new(fetcher, downloads, format)
}

/// Scans a page once and prints the download request.
fn scan(
    client: &Client,
    config: &ScannerConfig,
    source: &PageSource,
) -> Result<()> {
    let page = source.load(client)?;
    let mut scanner = Scanner::new(config);
    scanner.scan(&page);

    let batch = match scanner.prepare_dispatch(Instant::now()) {
        Some(batch) => batch,
        None => {
            termio::print_warn("no cover found");
            return Ok(());
        },
    };

    let envelope = Envelope::download_images(&batch)?;
    let json = serde_json::to_string_pretty(&envelope)
        .context("serialize download request")?;
    println!("{json}");

    Ok(())
}

/// Scans a page once and downloads every cover.
fn download(
    client: &Client,
    dispatcher: &Dispatcher,
    config: &ScannerConfig,
    source: &PageSource,
) -> Result<()> {
    let page = source.load(client)?;
    let mut scanner = Scanner::new(config);
    scanner.scan(&page);

    let batch = match scanner.prepare_dispatch(Instant::now()) {
        Some(batch) => batch,
        None => {
            termio::print_ok("no cover found: nothing to do");
            return Ok(());
        },
    };

    println!(
        "Downloading {} covers from {}",
        batch.images.len(),
        batch.user_name
    );
    let envelope = Envelope::download_images(&batch)?;
    if let Some((_, handle)) = dispatcher.handle_message(&envelope)? {
        summarize(&wait_for(handle));
    }

    Ok(())
}

/// Rescans a page periodically, downloads the covers on user request.
fn watch(
    client: &Client,
    dispatcher: &Dispatcher,
    config: &ScannerConfig,
    source: &PageSource,
    interval: Duration,
) -> Result<()> {
    let mut scanner = Scanner::new(config);

    // Every line read on stdin is a download request, EOF stops the loop.
    let (sender, requests) = mpsc::channel();
    let _reader = thread::Builder::new()
        .name("stdin".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if line.is_err() || sender.send(()).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;

    println!("Watching {source}: press Enter to download, Ctrl-D to quit");
    let reports = watch::run(&mut scanner, dispatcher, &requests, interval, || {
        source.load(client)
    });
    for report in &reports {
        summarize(report);
    }

    Ok(())
}

/// Processes a message read from `file` (stdin if unset).
fn dispatch(dispatcher: &Dispatcher, file: Option<PathBuf>) -> Result<()> {
    let envelope: Envelope = match file {
        Some(path) => {
            let file = File::open(&path)
                .with_context(|| format!("open {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
        },
        None => serde_json::from_reader(io::stdin().lock()),
    }
    .context("parse message")?;

    match dispatcher.handle_message(&envelope)? {
        Some((response, handle)) => {
            let json = serde_json::to_string(&response)
                .context("serialize response")?;
            println!("{json}");
            summarize(&wait_for(handle));
        },
        None => termio::print_warn(&format!(
            "unknown action `{}`: ignored",
            envelope.action
        )),
    }

    Ok(())
}

/// Waits for a batch, with a progress bar.
fn wait_for(handle: BatchHandle) -> BatchReport {
    let progress_bar = ProgressBar::new(handle.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:10}    [{bar:40.cyan/blue}] {pos:>4}/{len:4} ETA: {eta_precise}")
            .progress_chars("##-"),
    );
    progress_bar.set_message("covers");

    let report = handle.wait_with(|_| progress_bar.inc(1));
    progress_bar.finish();

    report
}

/// Prints the outcome of a batch.
fn summarize(report: &BatchReport) {
    if report.failed == 0 {
        termio::print_ok(&format!("{} covers saved", report.saved.len()));
    } else {
        termio::print_warn(&format!(
            "{} covers saved, {} failed",
            report.saved.len(),
            report.failed
        ));
    }
}

/// CLI options.
#[derive(Parser)]
#[clap(author, version, about)]
struct Opts {
    #[clap(subcommand)]
    command: Command,

    /// Path to the output directory.
    #[clap(short, long, default_value = ".", global = true)]
    output: PathBuf,

    /// Format the covers are converted to.
    #[clap(short, long, value_enum, default_value = "png", global = true)]
    format: TargetFormat,

    /// Save the covers as-is, without conversion.
    #[clap(long, global = true)]
    keep_original: bool,

    /// Max number of retry for HTTP requests.
    #[clap(long, default_value_t = 0, global = true)]
    retry: u8,

    /// Delay between HTTP requests, in milliseconds.
    #[clap(long, default_value_t = 0, global = true)]
    delay_ms: u64,

    #[clap(flatten)]
    paths: PathOpts,
}

/// Structural paths of the page elements.
#[derive(Args)]
struct PathOpts {
    /// Path of the author name element.
    #[clap(long, default_value = DEFAULT_AUTHOR_PATH, global = true)]
    author_path: String,

    /// Path of the note cards.
    #[clap(long, default_value = DEFAULT_CARDS_PATH, global = true)]
    cards_path: String,

    /// Path of a card title, relative to the card.
    #[clap(long, default_value = DEFAULT_TITLE_PATH, global = true)]
    title_path: String,
}

impl PathOpts {
    /// Returns the scanner configuration.
    fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            author_path: self.author_path.clone(),
            cards_path: self.cards_path.clone(),
            title_path: self.title_path.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Scan a profile page and print the download request.
    Scan {
        /// Profile URL, or path to a saved HTML page.
        source: PageSource,
    },
    /// Scan a profile page and download every cover.
    Download {
        /// Profile URL, or path to a saved HTML page.
        source: PageSource,
    },
    /// Rescan a profile page periodically, download on demand.
    Watch {
        /// Profile URL, or path to a saved HTML page.
        source: PageSource,

        /// Delay between two scans, in seconds.
        #[clap(short, long, default_value_t = SCAN_INTERVAL.as_secs())]
        interval: u64,
    },
    /// Process a download request, read from a file or stdin.
    Dispatch {
        /// Path to the JSON message.
        file: Option<PathBuf>,
    },
}
