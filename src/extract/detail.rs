//! Detail-page enrichment.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::RangeInclusive;

use super::cards::{element_text, selector};
use super::dates::parse_italian_date;
use super::fields::{build_regex, truncate_chars};

static JSON_LD: Lazy<Selector> = Lazy::new(|| selector(r#"script[type="application/ld+json"]"#));
static DESCRIPTION_CANDIDATES: Lazy<Selector> = Lazy::new(|| selector("div, p"));
static DESCRIPTION_CLASS: Lazy<Regex> = Lazy::new(|| build_regex(r"description|descrizion"));

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"pubblicat[oa]\s*(?:il\s*)?(.+?)(?:$|\n|<)",
        r"inserit[oa]\s*(?:il\s*)?(.+?)(?:$|\n|<)",
        r"data\s*annuncio[:\s]*(.+?)(?:$|\n|<)",
    ]
    .into_iter()
    .map(build_regex)
    .collect()
});
static VIEWS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(\d+)\s*visualizzazion[ie]", r"visto\s*(\d+)\s*volt[ea]", r"(\d+)\s*views"]
        .into_iter()
        .map(build_regex)
        .collect()
});
static ROOMS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(\d+)\s*(?:local[ie]|stanz[ae]|vani)", r"(?:local[ie]|stanz[ae]|vani)[:\s]*(\d+)"]
        .into_iter()
        .map(build_regex)
        .collect()
});
static BATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(\d+)\s*bagn[io]", r"bagn[io][:\s]*(\d+)"]
        .into_iter()
        .map(build_regex)
        .collect()
});
static FLOOR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"piano[:\s]*(\d+|terra|ultimo|rialzato)", r"(\d+)[°º]?\s*piano"]
        .into_iter()
        .map(build_regex)
        .collect()
});
static ENERGY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"classe\s*energetica[:\s]*([a-g][+\d]*)",
        r"energia[:\s]*([a-g][+\d]*)",
        r"ape[:\s]*([a-g][+\d]*)",
    ]
    .into_iter()
    .map(build_regex)
    .collect()
});

const LD_LISTING_TYPES: [&str; 4] = ["Product", "RealEstateListing", "Apartment", "House"];

/// Fields recovered from a listing's detail page. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingDetail {
    pub date_posted: Option<NaiveDate>,
    pub views: Option<u32>,
    pub rooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub floor: Option<i32>,
    pub floor_text: Option<String>,
    pub energy_class: Option<String>,
    pub description: Option<String>,
}

impl ListingDetail {
    pub fn field_count(&self) -> usize {
        [
            self.date_posted.is_some(),
            self.views.is_some(),
            self.rooms.is_some(),
            self.bathrooms.is_some(),
            self.floor.is_some(),
            self.floor_text.is_some(),
            self.energy_class.is_some(),
            self.description.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }
}

/// First capture of the first pattern that matches any text node.
fn first_capture(text_nodes: &[&str], patterns: &[Regex]) -> Option<String> {
    for pattern in patterns {
        if let Some(node) = text_nodes.iter().find(|node| pattern.is_match(node))
            && let Some(value) = pattern.captures(node).and_then(|caps| caps.get(1))
        {
            return Some(value.as_str().trim().to_string());
        }
    }
    None
}

/// Like [`first_capture`], but a pattern only counts when its number lies in `bounds`.
fn bounded_number(text_nodes: &[&str], patterns: &[Regex], bounds: RangeInclusive<u32>) -> Option<u32> {
    for pattern in patterns {
        let Some(node) = text_nodes.iter().find(|node| pattern.is_match(node)) else {
            continue;
        };
        let value = pattern
            .captures(node)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        if let Some(value) = value
            && bounds.contains(&value)
        {
            return Some(value);
        }
    }
    None
}

const ROOM_BOUNDS: RangeInclusive<u32> = 1..=20;
const BATH_BOUNDS: RangeInclusive<u32> = 1..=10;

fn json_ld_counts(document: &Html) -> (Option<u32>, Option<u32>) {
    let Some(script) = document.select(&JSON_LD).next() else {
        return (None, None);
    };
    let raw: String = script.text().collect();
    let Ok(Value::Object(data)) = serde_json::from_str::<Value>(&raw) else {
        return (None, None);
    };
    let listing_type = data.get("@type").and_then(Value::as_str).unwrap_or_default();
    if !LD_LISTING_TYPES.contains(&listing_type) {
        return (None, None);
    }
    let number = |key: &str, bounds: RangeInclusive<u32>| {
        data.get(key)
            .and_then(|value| match value {
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .filter(|n| bounds.contains(n))
    };
    (
        number("numberOfRooms", ROOM_BOUNDS),
        number("numberOfBathroomsTotal", BATH_BOUNDS),
    )
}

fn description(document: &Html) -> Option<String> {
    let element: ElementRef<'_> = document.select(&DESCRIPTION_CANDIDATES).find(|el| {
        el.value()
            .attr("class")
            .is_some_and(|class| DESCRIPTION_CLASS.is_match(class))
    })?;
    let text = element_text(&element);
    (text.chars().count() > 50).then(|| truncate_chars(&text, 2000))
}

/// Extract enrichment fields from a detail page. Missing fields stay `None`.
pub fn enrich_detail(html: &str, today: NaiveDate) -> ListingDetail {
    let document = Html::parse_document(html);
    let text_nodes: Vec<&str> = document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .collect();

    let mut detail = ListingDetail {
        date_posted: first_capture(&text_nodes, &DATE_PATTERNS).map(|text| parse_italian_date(&text, today)),
        views: first_capture(&text_nodes, &VIEWS_PATTERNS).and_then(|views| views.parse().ok()),
        ..Default::default()
    };

    let (ld_rooms, ld_bathrooms) = json_ld_counts(&document);
    detail.rooms = ld_rooms.or_else(|| bounded_number(&text_nodes, &ROOMS_PATTERNS, ROOM_BOUNDS));
    detail.bathrooms = ld_bathrooms.or_else(|| bounded_number(&text_nodes, &BATH_PATTERNS, BATH_BOUNDS));

    if let Some(floor) = first_capture(&text_nodes, &FLOOR_PATTERNS) {
        match floor.to_lowercase().as_str() {
            "terra" => detail.floor = Some(0),
            text @ ("ultimo" | "rialzato") => detail.floor_text = Some(text.to_string()),
            number => detail.floor = number.parse().ok(),
        }
    }

    detail.energy_class = first_capture(&text_nodes, &ENERGY_PATTERNS).map(|class| class.to_uppercase());
    detail.description = description(&document);

    log::debug!("extracted {} detail fields", detail.field_count());
    detail
}
