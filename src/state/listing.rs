//! Property summaries shown to the user

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Maximum number of listings shown per search
pub const MAX_DISPLAYED_RESULTS: usize = 5;

/// Whether a listing is for rent or for sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transaction {
    Rent,
    Sale,
}

/// Compact listing as returned by `search_properties`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySummary {
    /// 24-character hex identifier, never shown to the user
    pub id: String,
    pub title: String,
    pub city: String,
    #[serde(default)]
    pub district: Option<String>,
    pub transaction: Transaction,
    #[serde(default)]
    pub property_type: Option<String>,
    /// Price in MAD
    pub price: u64,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub surface_m2: Option<u32>,
}

/// Numbered listing lines (1-based), ids included for the model's eyes only
pub fn ordinal_listing(results: &[PropertySummary]) -> String {
    let mut out = String::new();
    for (i, p) in results.iter().take(MAX_DISPLAYED_RESULTS).enumerate() {
        let place = match &p.district {
            Some(d) => format!("{d}, {}", p.city),
            None => p.city.clone(),
        };
        let _ = writeln!(
            out,
            "{}. {} ({place}) - {} MAD [id interne: {}]",
            i + 1,
            p.title,
            p.price,
            p.id
        );
    }
    out
}
