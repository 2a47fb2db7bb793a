use once_cell::sync::Lazy;

/// Select `<section class="note-item">`, one per note card.
pub(crate) static NOTE_ITEM_SELECTOR: Lazy<kuchiki::Selectors> =
    Lazy::new(|| {
        kuchiki::Selectors::compile("section.note-item")
            .expect("invalid note card selector")
    });

/// Select `<img>`
pub(crate) static IMG_SELECTOR: Lazy<kuchiki::Selectors> = Lazy::new(|| {
    kuchiki::Selectors::compile("img").expect("invalid image selector")
});

/// Candidate selectors for a card title, most specific first.
pub(crate) static TITLE_SELECTORS: Lazy<Vec<kuchiki::Selectors>> =
    Lazy::new(|| {
        [".footer .title span", ".footer .title", "a.title", ".title"]
            .into_iter()
            .map(|selector| {
                kuchiki::Selectors::compile(selector)
                    .expect("invalid title selector")
            })
            .collect()
    });

/// Select `<base href="…">`
pub(crate) static BASE_SELECTOR: Lazy<kuchiki::Selectors> = Lazy::new(|| {
    kuchiki::Selectors::compile("base[href]").expect("invalid base selector")
});
