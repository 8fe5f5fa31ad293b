//! A product description fetched from the store.
//!
//! Products are created by a successful metadata fetch and never mutated
//! afterwards. A later fetch for the same identifier replaces the cached
//! entry with a fresh `Product`; see
//! [`MetadataCache`](crate::catalog::MetadataCache).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub identifier: String,
    pub title: String,
    pub description: String,
    /// Localized price string as reported by the store, e.g. `"$4.99"`.
    pub formatted_price: String,
    pub raw_price: Decimal,
}

impl Product {
    /// Builds a `Product` from the raw store fields for `identifier`.
    pub fn from_raw(identifier: impl Into<String>, raw: RawProduct) -> Self {
        Self {
            identifier: identifier.into(),
            title: raw.title,
            description: raw.description,
            formatted_price: raw.formatted_price,
            raw_price: raw.raw_price,
        }
    }

    /// Price string for display.
    ///
    /// With `show_currency_symbol = false` every character that is not part of
    /// the number itself is stripped, so `"$4.99"` becomes `"4.99"` and
    /// `"4,99 €"` becomes `"4,99"`.
    pub fn price_display(&self, show_currency_symbol: bool) -> String {
        if show_currency_symbol {
            return self.formatted_price.clone();
        }
        self.formatted_price
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | ' ' | '\u{a0}'))
            .collect::<String>()
            .trim()
            .to_string()
    }
}

/// Product fields exactly as the store transport returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProduct {
    pub title: String,
    pub description: String,
    pub formatted_price: String,
    pub raw_price: Decimal,
}

impl RawProduct {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        formatted_price: impl Into<String>,
        raw_price: Decimal,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            formatted_price: formatted_price.into(),
            raw_price,
        }
    }
}
