//! Page scanner: extracts the author name and the cover images of a profile
//! page.
//!
//! Cards are first located with a structural path (precise, but breaks as soon
//! as the markup changes), then with a CSS selector if nothing was found.

use crate::{
    fs,
    models::batch::{BatchItem, DownloadBatch, ScrapedImage, DEFAULT_USER_NAME},
    selectors::{IMG_SELECTOR, NOTE_ITEM_SELECTOR, TITLE_SELECTORS},
    termio,
    xpath::StructuralPath,
    Page,
};
use kuchiki::{traits::*, NodeRef};
use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

/// Author name element on a profile page.
pub const DEFAULT_AUTHOR_PATH: &str = "/html/body/div[2]/div[1]/div[2]/div[2]/div/div[1]/div/div[2]/div[1]/div[1]/div[2]/div[1]/div";
/// Note cards on a profile page.
pub const DEFAULT_CARDS_PATH: &str =
    "/html/body/div[2]/div[1]/div[2]/div[2]/div/div[3]/div/div[1]/div[1]/section";
/// Title of a note card, relative to the card.
pub const DEFAULT_TITLE_PATH: &str = "div/div/a/span";

/// Delay between two scans.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(2);
/// Delay before allowing another dispatch.
pub const DISPATCH_COOLDOWN: Duration = Duration::from_secs(2);

/// Structural paths used to locate the page elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Absolute path of the author name element.
    pub author_path: String,
    /// Absolute path of the note cards.
    pub cards_path: String,
    /// Path of the title element, relative to a card.
    pub title_path: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            author_path: DEFAULT_AUTHOR_PATH.to_owned(),
            cards_path: DEFAULT_CARDS_PATH.to_owned(),
            title_path: DEFAULT_TITLE_PATH.to_owned(),
        }
    }
}

/// What the scanner currently sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Sanitized author name.
    pub user_name: String,
    /// Cover images, in page order, without duplicates.
    pub images: Vec<ScrapedImage>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            user_name: DEFAULT_USER_NAME.to_owned(),
            images: Vec::new(),
        }
    }
}

/// Keeps an up-to-date snapshot of a profile page.
pub struct Scanner {
    /// `None` for paths that failed to parse: they never match.
    author_path: Option<StructuralPath>,
    cards_path: Option<StructuralPath>,
    title_path: Option<StructuralPath>,
    snapshot: Snapshot,
    guard: DispatchGuard,
}

/// Ways to locate the note cards, tried in order.
#[derive(Debug, Clone, Copy)]
enum Strategy {
    /// Structural paths.
    Structural,
    /// CSS selectors.
    Selectors,
}

const STRATEGIES: [Strategy; 2] = [Strategy::Structural, Strategy::Selectors];

impl Scanner {
    /// Initializes a new scanner.
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            author_path: parse_path(&config.author_path),
            cards_path: parse_path(&config.cards_path),
            title_path: parse_path(&config.title_path),
            snapshot: Snapshot::default(),
            guard: DispatchGuard::new(DISPATCH_COOLDOWN),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Re-reads the page and replaces the snapshot.
    pub fn scan(&mut self, page: &Page) -> &Snapshot {
        self.scan_at(page, fs::timestamp())
    }

    fn scan_at(&mut self, page: &Page, timestamp: u128) -> &Snapshot {
        let document = page.document();

        // Keep the previous name if the element is gone.
        let user_name = self
            .author_path
            .as_ref()
            .and_then(|path| path.find_first(document))
            .map(|element| fs::sanitize_name(&element.text_contents()))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.snapshot.user_name.clone());

        let images = STRATEGIES
            .iter()
            .map(|&strategy| self.extract(strategy, page, timestamp))
            .find(|images| !images.is_empty())
            .unwrap_or_default();

        self.snapshot = Snapshot {
            user_name,
            images: dedup(images),
        };

        &self.snapshot
    }

    /// Extracts the covers using the given strategy.
    fn extract(
        &self,
        strategy: Strategy,
        page: &Page,
        timestamp: u128,
    ) -> Vec<ScrapedImage> {
        let document = page.document();
        let cards = match strategy {
            Strategy::Structural => self
                .cards_path
                .as_ref()
                .map(|path| path.find_all(document))
                .unwrap_or_default(),
            Strategy::Selectors => NOTE_ITEM_SELECTOR
                .filter(document.descendants().elements())
                .map(|card| card.as_node().clone())
                .collect(),
        };

        cards
            .iter()
            .enumerate()
            .filter_map(|(index, card)| {
                let url = cover_url(card, page)?;
                let title = match strategy {
                    Strategy::Structural => self
                        .title_path
                        .as_ref()
                        .and_then(|path| path.find_first(card))
                        .and_then(|title| fs::sanitize_title(&title.text_contents())),
                    Strategy::Selectors => selected_title(card),
                }
                .unwrap_or_else(|| fs::cover_name(timestamp, index));

                Some(ScrapedImage { url, title })
            })
            .collect()
    }

    /// Tests if the snapshot can be dispatched right now.
    pub fn can_dispatch(&self, now: Instant) -> bool {
        !self.snapshot.images.is_empty() && self.guard.is_idle(now)
    }

    /// Packages the snapshot for the dispatcher.
    ///
    /// Returns `None` if there's nothing to download or a dispatch is already
    /// in progress. On success, the dispatch stays disabled until either
    /// [`Self::dispatch_acknowledged`] or [`Self::dispatch_failed`] is called.
    pub fn prepare_dispatch(&mut self, now: Instant) -> Option<DownloadBatch> {
        if self.snapshot.images.is_empty() || !self.guard.acquire(now) {
            return None;
        }

        Some(DownloadBatch {
            images: self
                .snapshot
                .images
                .iter()
                .cloned()
                .map(BatchItem::from)
                .collect(),
            user_name: self.snapshot.user_name.clone(),
        })
    }

    /// The dispatcher accepted the batch: re-enable after a cooldown.
    pub fn dispatch_acknowledged(&mut self, now: Instant) {
        self.guard.acknowledged(now);
    }

    /// The batch couldn't be sent: re-enable right away.
    pub fn dispatch_failed(&mut self) {
        self.guard.release();
    }
}

/// Parses a configured path, logging invalid ones.
fn parse_path(path: &str) -> Option<StructuralPath> {
    match path.parse() {
        Ok(path) => Some(path),
        Err(err) => {
            termio::print_warn(&format!("ignoring path `{path}`: {err:#}"));
            None
        },
    }
}

/// Returns the URL of the first image of the card, if any.
fn cover_url(card: &NodeRef, page: &Page) -> Option<String> {
    let img = IMG_SELECTOR.filter(card.descendants().elements()).next()?;
    let src = img.attributes.borrow().get("src").map(str::to_owned)?;

    page.resolve(&src)
}

/// Returns the first usable title found by the title selectors.
fn selected_title(card: &NodeRef) -> Option<String> {
    TITLE_SELECTORS.iter().find_map(|selector| {
        selector
            .filter(card.descendants().elements())
            .find_map(|element| fs::sanitize_title(&element.text_contents()))
    })
}

/// Removes duplicated URLs, keeping the first occurrence.
fn dedup(images: Vec<ScrapedImage>) -> Vec<ScrapedImage> {
    let mut seen = HashSet::new();

    images
        .into_iter()
        .filter(|image| seen.insert(image.url.clone()))
        .collect()
}

// -----------------------------------------------------------------------------

/// Prevents dispatching twice in a row.
#[derive(Debug, Clone, Copy)]
pub struct DispatchGuard {
    state: GuardState,
    cooldown: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Idle,
    InFlight,
    CoolingDown(Instant),
}

impl DispatchGuard {
    /// Initializes an idle guard.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: GuardState::Idle,
            cooldown,
        }
    }

    /// Tests if a dispatch is allowed at `now`.
    pub fn is_idle(&self, now: Instant) -> bool {
        match self.state {
            GuardState::Idle => true,
            GuardState::InFlight => false,
            GuardState::CoolingDown(until) => now >= until,
        }
    }

    /// Marks a dispatch as in flight, if allowed.
    pub fn acquire(&mut self, now: Instant) -> bool {
        let idle = self.is_idle(now);
        if idle {
            self.state = GuardState::InFlight;
        }
        idle
    }

    /// Re-enables after the cooldown.
    pub fn acknowledged(&mut self, now: Instant) {
        self.state = GuardState::CoolingDown(now + self.cooldown);
    }

    /// Re-enables immediately.
    pub fn release(&mut self) {
        self.state = GuardState::Idle;
    }
}
