//! Negotiation policy and reply post-processing

use crate::state::{Message, PropertySummary, Role, StateUpdate, MAX_DISPLAYED_RESULTS};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Replacement for redacted floor prices
pub const REDACTED_AMOUNT: &str = "un montant confidentiel";

const TERMS_CAPABILITY: &str = "get_property_negotiation_details";
const SEARCH_CAPABILITY: &str = "search_properties";

/// The only three responses permitted to an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum OfferDecision {
    /// Below the floor: decline and justify the price
    Decline,
    /// Between floor and listing price
    CounterOffer { price: u64 },
    Accept,
}

/// Decide how to answer an offer.
///
/// The counter-offer splits the difference between the offer and the
/// listing price, rounded half up.
pub fn evaluate_offer(offer: u64, floor_price: u64, listing_price: u64) -> OfferDecision {
    if offer >= listing_price {
        OfferDecision::Accept
    } else if offer >= floor_price {
        let price = offer + (listing_price - offer).div_ceil(2);
        OfferDecision::CounterOffer { price }
    } else {
        OfferDecision::Decline
    }
}

// An amount as a reply may write it: digit groups separated by space, dot,
// comma, no-break or narrow no-break space, or a decimal, optionally scaled
// by "mille", "k" or "million"/"M"
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(?P<grouped>\d{1,3}(?:[ .,\u{a0}\u{202f}]\d{3})+)|(?P<int>\d+)(?:[.,](?P<frac>\d{1,6}))?)(?:[ \u{a0}\u{202f}]?(?P<scale>[mM]illions?|[mM]ille|M|[kK])\b)?",
    )
    .expect("amount pattern is valid")
});

fn digits_of(written: &str) -> Option<u64> {
    written
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

/// Value of one match; `None` when it is not a whole number of units
fn amount_value(caps: &Captures<'_>) -> Option<u64> {
    let multiplier: u64 = match caps.name("scale").map(|m| m.as_str()) {
        None => 1,
        Some("k" | "K" | "mille" | "Mille") => 1_000,
        Some(_) => 1_000_000,
    };
    if let Some(grouped) = caps.name("grouped") {
        return digits_of(grouped.as_str())?.checked_mul(multiplier);
    }
    let int = digits_of(caps.name("int")?.as_str())?;
    let Some(frac) = caps.name("frac") else {
        return int.checked_mul(multiplier);
    };
    let unit = 10u64.checked_pow(u32::try_from(frac.as_str().len()).ok()?)?;
    let scaled = int
        .checked_mul(unit)?
        .checked_add(digits_of(frac.as_str())?)?
        .checked_mul(multiplier)?;
    (scaled % unit == 0).then_some(scaled / unit)
}

/// Every amount written in `text`, in units
pub fn amounts_in(text: &str) -> Vec<u64> {
    AMOUNT
        .captures_iter(text)
        .filter_map(|caps| amount_value(&caps))
        .collect()
}

/// Replace every written occurrence of a confidential amount
pub fn redact_amounts(text: &str, confidential: &HashSet<u64>) -> String {
    if !amounts_in(text).iter().any(|a| confidential.contains(a)) {
        return text.to_string();
    }
    AMOUNT
        .replace_all(text, |caps: &Captures<'_>| match amount_value(caps) {
            Some(v) if confidential.contains(&v) => REDACTED_AMOUNT.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Successful results of `capability`, parsed as JSON
fn results_of<'a>(transcript: &'a [Message], capability: &'a str) -> impl Iterator<Item = Value> + 'a {
    transcript
        .iter()
        .filter(move |m| {
            m.role == Role::CapabilityResult
                && !m.is_error
                && m.capability.as_deref() == Some(capability)
        })
        .filter_map(|m| m.content.as_deref())
        .filter_map(|c| serde_json::from_str(c).ok())
}

/// Floor prices disclosed to the negotiator anywhere in the transcript
pub fn floor_prices(transcript: &[Message]) -> HashSet<u64> {
    results_of(transcript, TERMS_CAPABILITY)
        .filter_map(|v| v["terms"]["floor_price"].as_u64())
        .collect()
}

/// Listings of the most recent successful search
pub fn latest_search_results(transcript: &[Message]) -> Option<Vec<PropertySummary>> {
    let latest = results_of(transcript, SEARCH_CAPABILITY).last()?;
    let mut results: Vec<PropertySummary> = serde_json::from_value(latest["results"].clone()).ok()?;
    results.truncate(MAX_DISPLAYED_RESULTS);
    Some(results)
}

/// Post-processing applied to a handler's text before it is appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcessor {
    /// Never let a floor price through
    RedactFloorPrice,
    /// Remember the listings shown, forget the active property
    CaptureSearchResults,
}

impl PostProcessor {
    /// Text sent alongside capability requests
    pub fn screen(self, transcript: &[Message], text: String) -> String {
        match self {
            PostProcessor::RedactFloorPrice => redact_amounts(&text, &floor_prices(transcript)),
            PostProcessor::CaptureSearchResults => text,
        }
    }

    /// Final reply; `run` holds the messages produced by this handler run
    pub fn process(self, transcript: &[Message], run: &[Message], reply: String) -> (String, StateUpdate) {
        match self {
            PostProcessor::RedactFloorPrice => (self.screen(transcript, reply), StateUpdate::new()),
            PostProcessor::CaptureSearchResults => {
                let mut update = StateUpdate::new().clear_active_entity();
                if let Some(results) = latest_search_results(run) {
                    update = update.set_search_results(results);
                }
                (reply, update)
            }
        }
    }
}
