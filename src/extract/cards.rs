//! Listing card discovery on search-result pages.
//!
//! Strategies are tried in order until one yields a plausible set:
//! semantic `<article>` containers, class-name patterns, then listing links
//! walked up to their card-like ancestor.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use super::fields::build_regex;

static ARTICLE: Lazy<Selector> = Lazy::new(|| selector("article"));
static DIV: Lazy<Selector> = Lazy::new(|| selector("div"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static HEADINGS: Lazy<Vec<Selector>> = Lazy::new(|| ["h1", "h2", "h3", "h4"].into_iter().map(selector).collect());
static PRICE_ELEMENT: Lazy<Selector> = Lazy::new(|| selector("span, div, p"));

static CARD_CLASS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["listing", "card", "property", "annuncio", "item"]
        .into_iter()
        .map(build_regex)
        .collect()
});
static LISTING_HREF: Lazy<Regex> = Lazy::new(|| build_regex(r"/(vendita|immobile)/"));
static CARD_ANCESTOR_CLASS: Lazy<Regex> = Lazy::new(|| build_regex(r"(card|article|item)"));
static PRICE_CLASS: Lazy<Regex> = Lazy::new(|| build_regex(r"(price|prezzo)"));
static PRICE_TEXT: Lazy<Regex> = Lazy::new(|| build_regex(r"€\s*[\d.,]+"));
static SIZE_TEXT_MQ: Lazy<Regex> = Lazy::new(|| build_regex(r"\d+\s*mq"));
static SIZE_TEXT_M2: Lazy<Regex> = Lazy::new(|| build_regex(r"\d+\s*m[²2]"));

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector `{}`: {:?}", css, err))
}

/// Which discovery strategy produced the card set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStrategy {
    Semantic,
    ClassPattern,
    LinkFallback,
}

fn class_matches(element: &ElementRef<'_>, pattern: &Regex) -> bool {
    element
        .value()
        .attr("class")
        .is_some_and(|class| pattern.is_match(class))
}

/// Locate listing cards in `document`.
///
/// An empty vector means "no listings" for the page.
pub fn discover_cards<'a>(
    document: &'a Html,
    min_class_matches: usize,
    max_candidates: usize,
) -> (Vec<ElementRef<'a>>, Option<CardStrategy>) {
    let articles: Vec<_> = document.select(&ARTICLE).collect();
    if !articles.is_empty() && articles.len() <= max_candidates {
        log::debug!("found {} cards using <article> tags", articles.len());
        return (articles, Some(CardStrategy::Semantic));
    }

    if articles.is_empty() {
        for pattern in CARD_CLASS_PATTERNS.iter() {
            let cards: Vec<_> = document
                .select(&DIV)
                .filter(|div| class_matches(div, pattern))
                .collect();
            if cards.len() > min_class_matches && cards.len() <= max_candidates {
                log::debug!("found {} cards using class pattern {}", cards.len(), pattern.as_str());
                return (cards, Some(CardStrategy::ClassPattern));
            }
            if cards.len() > max_candidates {
                log::info!(
                    "class pattern {} matched {} containers, refining via links",
                    pattern.as_str(),
                    cards.len()
                );
                break;
            }
        }
    } else {
        log::info!("found too many <article> containers ({}), refining via links", articles.len());
    }

    let mut seen = HashSet::new();
    let mut containers = Vec::new();
    for link in document
        .select(&ANCHOR)
        .filter(|a| a.value().attr("href").is_some_and(|href| LISTING_HREF.is_match(href)))
    {
        let ancestor = link
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "div" && class_matches(el, &CARD_ANCESTOR_CLASS));
        let container = ancestor.or_else(|| link.parent().and_then(ElementRef::wrap));
        if let Some(container) = container
            && seen.insert(container.id())
        {
            containers.push(container);
        }
    }

    if containers.len() > max_candidates {
        log::warn!(
            "link fallback produced {} containers (ceiling {}), discarding page",
            containers.len(),
            max_candidates
        );
        return (Vec::new(), None);
    }
    if containers.is_empty() {
        return (containers, None);
    }
    log::debug!("found {} potential cards via listing links", containers.len());
    (containers, Some(CardStrategy::LinkFallback))
}

/// Whitespace-normalised text of an element.
pub(crate) fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First text node under `element` matching `pattern`.
pub(crate) fn find_text<'a>(element: &ElementRef<'a>, pattern: &Regex) -> Option<&'a str> {
    element.text().find(|chunk| pattern.is_match(chunk))
}

/// Listing link of a card: a listing-pattern href first, then any href.
pub fn card_link(card: &ElementRef<'_>) -> Option<String> {
    let mut anchors = card.select(&ANCHOR);
    let listing = card
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| LISTING_HREF.is_match(href));
    listing
        .or_else(|| anchors.find_map(|a| a.value().attr("href")))
        .map(str::to_string)
}

pub fn card_title(card: &ElementRef<'_>) -> Option<String> {
    for heading in HEADINGS.iter() {
        if let Some(element) = card.select(heading).next() {
            return Some(element_text(&element));
        }
    }
    card.select(&ANCHOR)
        .find(|a| a.value().attr("href").is_some_and(|href| LISTING_HREF.is_match(href)))
        .or_else(|| card.select(&ANCHOR).next())
        .map(|a| element_text(&a))
}

pub fn card_price_text(card: &ElementRef<'_>) -> (Option<String>, Option<String>) {
    let tagged = card
        .select(&PRICE_ELEMENT)
        .find(|el| class_matches(el, &PRICE_CLASS))
        .map(|el| element_text(&el));
    let free = find_text(card, &PRICE_TEXT).map(str::to_string);
    (tagged, free)
}

pub fn card_size_text(card: &ElementRef<'_>) -> Option<String> {
    find_text(card, &SIZE_TEXT_MQ)
        .or_else(|| find_text(card, &SIZE_TEXT_M2))
        .map(str::to_string)
}
