//! Listing extraction from fetched pages.
//!
//! Extraction never fails: a missing field degrades to `None`, a broken
//! card is dropped, and a page with no plausible cards yields an empty list.

pub mod cards;
pub mod dates;
pub mod detail;
pub mod fields;

use chrono::NaiveDate;
use rand::Rng;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{AntiDetectionSettings, ListingType, ScrapingSettings};

pub use cards::{CardStrategy, discover_cards};
pub use dates::parse_italian_date;
pub use detail::{ListingDetail, enrich_detail};
pub use fields::{PRICE_BOUNDS, SIZE_BOUNDS, external_id, parse_price, parse_size, price_per_sqm};

const FALLBACK_TITLE: &str = "Appartamento";
const MAX_TITLE_CHARS: usize = 200;

/// One listing preview parsed from a search-results card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedListing {
    pub external_id: String,
    pub platform: String,
    pub listing_type: ListingType,
    pub target_id: String,
    pub url: String,
    pub title: String,
    pub price: Option<f64>,
    pub size_sqm: Option<u32>,
    pub price_per_sqm: Option<f64>,
    pub date_posted: Option<NaiveDate>,
    pub views: Option<u32>,
}

/// Parses search-result and detail pages for one platform.
#[derive(Debug, Clone)]
pub struct ListingExtractor {
    base_url: Url,
    platform: String,
    listing_type: ListingType,
    min_class_matches: usize,
    max_card_candidates: usize,
    skip_probability: f64,
}

impl ListingExtractor {
    pub fn new(base_url: Url, platform: impl Into<String>, listing_type: ListingType) -> Self {
        Self {
            base_url,
            platform: platform.into(),
            listing_type,
            min_class_matches: 3,
            max_card_candidates: 200,
            skip_probability: 0.0,
        }
    }

    pub fn from_settings(
        scraping: &ScrapingSettings,
        anti_detection: &AntiDetectionSettings,
    ) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(&scraping.base_url)?;
        Ok(Self::new(base_url, scraping.platform.clone(), scraping.listing_type)
            .with_card_limits(scraping.min_class_matches, scraping.max_card_candidates)
            .with_skip_probability(anti_detection.skip_listing_probability))
    }

    pub fn with_card_limits(mut self, min_class_matches: usize, max_card_candidates: usize) -> Self {
        self.min_class_matches = min_class_matches;
        self.max_card_candidates = max_card_candidates;
        self
    }

    /// Fraction of valid cards deliberately dropped from each page.
    pub fn with_skip_probability(mut self, probability: f64) -> Self {
        self.skip_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn listing_type(&self) -> ListingType {
        self.listing_type
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/{vendita|affitto}/residenziale/{slug}/`, with `?page=N` past page one.
    pub fn search_url(&self, slug: &str, page: u32) -> Result<Url, url::ParseError> {
        let path = format!("/{}/residenziale/{}/", self.listing_type.path_segment(), slug);
        let mut url = self.base_url.join(&path)?;
        if page > 1 {
            url.set_query(Some(&format!("page={page}")));
        }
        Ok(url)
    }

    pub fn parse_search_results<R: Rng + ?Sized>(
        &self,
        html: &str,
        target_id: &str,
        rng: &mut R,
    ) -> Vec<ExtractedListing> {
        let document = Html::parse_document(html);
        let (cards, strategy) =
            discover_cards(&document, self.min_class_matches, self.max_card_candidates);
        if cards.is_empty() {
            log::warn!("no listing cards found for target {target_id}");
            return Vec::new();
        }
        log::debug!("{} cards via {:?}", cards.len(), strategy);

        let mut listings = Vec::with_capacity(cards.len());
        for card in cards {
            let Some(listing) = self.extract_card(&card, target_id) else {
                continue;
            };
            if self.skip_probability > 0.0 && rng.gen_bool(self.skip_probability) {
                log::debug!("randomly skipping listing {}", listing.external_id);
                continue;
            }
            listings.push(listing);
        }
        listings
    }

    fn extract_card(&self, card: &ElementRef<'_>, target_id: &str) -> Option<ExtractedListing> {
        let href = cards::card_link(card)?;
        let url = self.base_url.join(&href).ok()?.to_string();
        let external_id = external_id(&self.platform, &url);

        let title = cards::card_title(card)
            .filter(|title| title.chars().count() >= 5)
            .map(|title| fields::truncate_chars(&title, MAX_TITLE_CHARS))
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        let (tagged_price, free_price) = cards::card_price_text(card);
        let price = tagged_price
            .as_deref()
            .and_then(parse_price)
            .or_else(|| free_price.as_deref().and_then(parse_price));
        let size_sqm = cards::card_size_text(card).as_deref().and_then(parse_size);

        Some(ExtractedListing {
            external_id,
            platform: self.platform.clone(),
            listing_type: self.listing_type,
            target_id: target_id.to_string(),
            url,
            title,
            price,
            size_sqm,
            price_per_sqm: price_per_sqm(price, size_sqm),
            date_posted: None,
            views: None,
        })
    }

    /// Enrichment fields from a listing's detail page.
    pub fn enrich_detail(&self, html: &str, today: NaiveDate) -> ListingDetail {
        enrich_detail(html, today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const SEARCH_PAGE: &str = r#"
        <html><body>
        <article>
            <a href="/immobili/47123456/"><h2>Trilocale in Via Appia Nuova</h2></a>
            <div class="price">€ 245.000</div>
            <span>85 mq</span>
        </article>
        <article>
            <a href="/vendita/residenziale/roma/attico-parioli">Vedi</a>
            <p>Prezzo: € 1.250.000</p>
            <span>600 m²</span>
        </article>
        <article><p>Pubblicità</p></article>
        </body></html>
    "#;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new(Url::parse("https://www.casa.it").unwrap(), "casa_it", ListingType::Sale)
    }

    #[test]
    fn builds_paginated_search_urls() {
        let extractor = extractor();
        assert_eq!(
            extractor.search_url("reggio-emilia", 1).unwrap().as_str(),
            "https://www.casa.it/vendita/residenziale/reggio-emilia/"
        );
        let rent = ListingExtractor::new(Url::parse("https://www.casa.it").unwrap(), "casa_it", ListingType::Rent);
        assert_eq!(
            rent.search_url("roma", 3).unwrap().as_str(),
            "https://www.casa.it/affitto/residenziale/roma/?page=3"
        );
    }

    #[test]
    fn parses_cards_with_per_field_degradation() {
        let mut rng = StdRng::seed_from_u64(1);
        let listings = extractor().parse_search_results(SEARCH_PAGE, "058091", &mut rng);
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.external_id, "casa_it_47123456");
        assert_eq!(first.title, "Trilocale in Via Appia Nuova");
        assert_eq!(first.price, Some(245_000.0));
        assert_eq!(first.size_sqm, Some(85));
        assert_eq!(first.price_per_sqm, Some(2882.35));
        assert_eq!(first.target_id, "058091");

        let second = &listings[1];
        assert_eq!(second.title, "Appartamento");
        assert_eq!(second.price, Some(1_250_000.0));
        assert_eq!(second.size_sqm, None);
        assert_eq!(second.price_per_sqm, None);
        assert!(second.external_id.starts_with("casa_it_"));
    }

    #[test]
    fn skip_probability_one_drops_everything() {
        let mut rng = StdRng::seed_from_u64(1);
        let listings = extractor()
            .with_skip_probability(1.0)
            .parse_search_results(SEARCH_PAGE, "058091", &mut rng);
        assert!(listings.is_empty());
    }

    #[test]
    fn page_without_cards_is_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(extractor()
            .parse_search_results("<html><body><p>Nessun risultato</p></body></html>", "1", &mut rng)
            .is_empty());
    }
}
