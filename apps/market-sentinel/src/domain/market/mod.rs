//! Market Observation Types
//!
//! A [`Snapshot`] is one timestamped price/volume observation for a symbol.
//! A [`Quote`] is what a market provider returns; it converts into a
//! snapshot on ingestion.

use serde::{Deserialize, Serialize};

// =============================================================================
// Snapshot
// =============================================================================

/// One timestamped price/volume observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Lowercase symbol, e.g. `sh600000`.
    pub symbol: String,
    /// Unix seconds. Zero means "now" and is filled on ingestion.
    #[serde(default)]
    pub ts: i64,
    /// Last traded price.
    pub price: f64,
    /// Percent change versus previous close.
    #[serde(default)]
    pub change_pct: f64,
    /// Cumulative or interval volume, as reported by the provider.
    #[serde(default)]
    pub volume: f64,
    /// Raw provider payload, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

impl Snapshot {
    /// Create a snapshot without a raw payload.
    #[must_use]
    pub fn new(symbol: impl Into<String>, ts: i64, price: f64, change_pct: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            ts,
            price,
            change_pct,
            volume,
            raw: String::new(),
        }
    }

    /// Normalize the symbol and default the timestamp.
    ///
    /// Returns `None` when the symbol is empty after trimming.
    #[must_use]
    pub fn normalized(mut self, now_unix: i64) -> Option<Self> {
        self.symbol = normalize_symbol(&self.symbol)?;
        if self.ts == 0 {
            self.ts = now_unix;
        }
        Some(self)
    }
}

/// Trim and lowercase a symbol. Empty input yields `None`.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_lowercase();
    if symbol.is_empty() { None } else { Some(symbol) }
}

/// Whether `symbol` is an A-share stock code (`sh`/`sz` + 6 digits),
/// excluding the configured index symbol.
#[must_use]
pub fn is_stock_symbol(symbol: &str, index_symbol: &str) -> bool {
    let s = symbol.to_lowercase();
    if s.len() != 8 {
        return false;
    }
    if !s.starts_with("sh") && !s.starts_with("sz") {
        return false;
    }
    if !s[2..].bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    s != index_symbol.to_lowercase()
}

// =============================================================================
// Quote
// =============================================================================

/// A quote as returned by a market provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Provider symbol.
    pub symbol: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Last price.
    pub price: f64,
    /// Percent change.
    #[serde(default)]
    pub change_pct: f64,
    /// Volume.
    #[serde(default)]
    pub volume: f64,
    /// Unix seconds.
    #[serde(default)]
    pub ts: i64,
    /// Raw provider payload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

impl From<Quote> for Snapshot {
    fn from(q: Quote) -> Self {
        Self {
            symbol: q.symbol,
            ts: q.ts,
            price: q.price,
            change_pct: q.change_pct,
            volume: q.volume,
            raw: q.raw,
        }
    }
}

impl From<&Snapshot> for Quote {
    fn from(s: &Snapshot) -> Self {
        Self {
            symbol: s.symbol.clone(),
            name: String::new(),
            price: s.price,
            change_pct: s.change_pct,
            volume: s.volume,
            ts: s.ts,
            raw: s.raw.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("sh600000", true ; "shanghai stock")]
    #[test_case("SZ000001", true ; "shenzhen stock uppercase")]
    #[test_case("sh000001", false ; "index symbol excluded")]
    #[test_case("sh60000", false ; "too short")]
    #[test_case("hk600000", false ; "wrong exchange")]
    #[test_case("sh60000a", false ; "non digit code")]
    fn stock_symbol_classification(symbol: &str, expected: bool) {
        assert_eq!(is_stock_symbol(symbol, "sh000001"), expected);
    }

    #[test]
    fn custom_index_symbol_is_excluded() {
        assert!(!is_stock_symbol("sz399001", "sz399001"));
        assert!(is_stock_symbol("sh000001", "sz399001"));
    }

    #[test]
    fn normalized_lowercases_and_defaults_ts() {
        let snap = Snapshot::new("  SH600000 ", 0, 10.0, 0.5, 100.0)
            .normalized(1_700_000_000)
            .unwrap();
        assert_eq!(snap.symbol, "sh600000");
        assert_eq!(snap.ts, 1_700_000_000);
    }

    #[test]
    fn normalized_keeps_explicit_ts() {
        let snap = Snapshot::new("sh600000", 42, 10.0, 0.0, 0.0)
            .normalized(1_700_000_000)
            .unwrap();
        assert_eq!(snap.ts, 42);
    }

    #[test]
    fn empty_symbol_is_rejected() {
        assert!(Snapshot::new("   ", 0, 10.0, 0.0, 0.0).normalized(1).is_none());
    }

    #[test]
    fn quote_converts_to_snapshot() {
        let quote = Quote {
            symbol: "sh600000".to_string(),
            name: "PFB".to_string(),
            price: 7.5,
            change_pct: -1.2,
            volume: 3000.0,
            ts: 10,
            raw: "{}".to_string(),
        };
        let snap = Snapshot::from(quote);
        assert_eq!(snap.symbol, "sh600000");
        assert_eq!(snap.raw, "{}");
    }
}
