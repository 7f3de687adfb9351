//! Per-target pagination loop.

use rand::Rng;
use rand::rngs::StdRng;

use super::HarvestResult;
use super::targets::Target;
use crate::config::HarvestConfig;
use crate::extract::{ExtractedListing, ListingExtractor};
use crate::fetch::PageFetcher;
use crate::modules::pacing::HumanDelay;

/// Pagination and mimicry knobs for one target.
#[derive(Debug, Clone)]
pub struct ScrapePlan {
    pub max_pages: u32,
    pub early_stop_after_page: u32,
    pub early_stop_probability: f64,
    pub browse_away_probability: f64,
    pub max_listings: usize,
    pub delay: HumanDelay,
}

impl ScrapePlan {
    pub fn from_config(config: &HarvestConfig, max_listings: usize) -> Self {
        Self {
            max_pages: config.scraping.max_pages_per_target,
            early_stop_after_page: config.scraping.early_stop_after_page,
            early_stop_probability: config.scraping.early_stop_probability,
            browse_away_probability: config.anti_detection.visit_about_page_probability,
            max_listings,
            delay: HumanDelay::from_settings(&config.rate_limits),
        }
    }

    /// No randomness and no waiting: every page is fetched until a stop condition.
    pub fn deterministic(max_pages: u32, max_listings: usize) -> Self {
        Self {
            max_pages,
            early_stop_after_page: max_pages,
            early_stop_probability: 0.0,
            browse_away_probability: 0.0,
            max_listings,
            delay: HumanDelay::none(),
        }
    }
}

/// Fetch search pages for `target` in order and collect their listings.
///
/// Stops at the first page with no cards, once `max_listings` is reached,
/// or on a random early stop. A terminal fetch error aborts the target.
pub async fn scrape_target(
    fetcher: &mut dyn PageFetcher,
    extractor: &ListingExtractor,
    target: &Target,
    plan: &ScrapePlan,
    rng: &mut StdRng,
) -> HarvestResult<Vec<ExtractedListing>> {
    let slug = target.slug();
    let mut listings: Vec<ExtractedListing> = Vec::new();
    log::info!("starting scrape for {} ({})", target.name, target.id);

    for page in 1..=plan.max_pages {
        if page > plan.early_stop_after_page && rng.gen_bool(plan.early_stop_probability.clamp(0.0, 1.0)) {
            log::info!("randomly stopping pagination at page {page}");
            break;
        }

        if plan.browse_away_probability > 0.0 && rng.gen_bool(plan.browse_away_probability.clamp(0.0, 1.0)) {
            log::debug!("browsing away before page {page}");
            plan.delay.wait(rng).await;
        }

        let url = extractor.search_url(&slug, page)?;
        log::info!("scraping page {page}: {url}");
        let outcome = fetcher.fetch(&url).await?;

        let found = extractor.parse_search_results(&outcome.text(), &target.id, rng);
        if found.is_empty() {
            log::info!("no listings found on page {page}, stopping");
            break;
        }
        log::info!("found {} listings on page {page}", found.len());
        listings.extend(found);

        if listings.len() >= plan.max_listings {
            log::info!("reached max listings ({})", plan.max_listings);
            break;
        }

        plan.delay.wait(rng).await;
    }

    listings.truncate(plan.max_listings);
    log::info!("total listings scraped for {}: {}", target.name, listings.len());
    Ok(listings)
}
