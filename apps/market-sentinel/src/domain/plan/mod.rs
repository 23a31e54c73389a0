//! Daily Trading Plan
//!
//! A per-date plan document. Plans are produced by a deterministic
//! fallback, persisted by date, and confirmed by an operator.

use serde::{Deserialize, Serialize};

/// One candidate trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeItem {
    /// Symbol.
    #[serde(default)]
    pub symbol: String,
    /// Entry condition.
    #[serde(default)]
    pub trigger: String,
    /// Condition that cancels the idea.
    #[serde(default)]
    pub invalidate: String,
    /// Position size as a percent of capital.
    #[serde(default)]
    pub position_pct: f64,
    /// Stop-loss rule.
    #[serde(default)]
    pub stop_loss: String,
}

/// Plan content for one trading day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingPlan {
    /// `bullish`, `neutral` or `bearish`.
    #[serde(default)]
    pub market_bias: String,
    /// Exposure cap, 0 to 100.
    #[serde(default)]
    pub max_exposure_pct: f64,
    /// Actionable trades.
    #[serde(default)]
    pub trade_pool: Vec<TradeItem>,
    /// Symbols to watch.
    #[serde(default)]
    pub watch_pool: Vec<String>,
    /// Setups to avoid.
    #[serde(default)]
    pub ban_list: Vec<String>,
}

/// A persisted plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Plan content.
    pub plan: TradingPlan,
    /// Rendered markdown.
    pub content_md: String,
    /// Operator confirmation.
    pub confirmed: bool,
    /// Unix seconds of the last write.
    pub created_at: i64,
}

/// The plan used when nothing better is available.
#[must_use]
pub fn fallback_plan() -> TradingPlan {
    TradingPlan {
        market_bias: "neutral".to_string(),
        max_exposure_pct: 30.0,
        trade_pool: Vec::new(),
        watch_pool: Vec::new(),
        ban_list: vec!["high-volatility news-driven setups".to_string()],
    }
}

impl TradingPlan {
    /// Default the bias and clamp exposure into 0..=100.
    #[must_use]
    pub fn sanitize(mut self) -> Self {
        if self.market_bias.trim().is_empty() {
            self.market_bias = "neutral".to_string();
        }
        self.max_exposure_pct = self.max_exposure_pct.clamp(0.0, 100.0);
        self
    }

    /// Markdown summary stored alongside the JSON content.
    #[must_use]
    pub fn to_markdown(&self, date: &str) -> String {
        let mut out = format!(
            "**Plan {date}**\n- bias: {}\n- max exposure: {:.0}%\n",
            self.market_bias, self.max_exposure_pct
        );
        if !self.trade_pool.is_empty() {
            out.push_str("**Trades**:\n");
            for t in &self.trade_pool {
                out.push_str(&format!(
                    "- {} trigger={} invalidate={} position={:.0}% stop={}\n",
                    t.symbol, t.trigger, t.invalidate, t.position_pct, t.stop_loss
                ));
            }
        }
        if !self.watch_pool.is_empty() {
            out.push_str(&format!("**Watch**: {}\n", self.watch_pool.join(", ")));
        }
        if !self.ban_list.is_empty() {
            out.push_str(&format!("**Avoid**: {}\n", self.ban_list.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_conservative() {
        let plan = fallback_plan();
        assert_eq!(plan.market_bias, "neutral");
        assert!((plan.max_exposure_pct - 30.0).abs() < f64::EPSILON);
        assert!(plan.trade_pool.is_empty());
        assert_eq!(plan.ban_list.len(), 1);
    }

    #[test]
    fn sanitize_clamps_exposure() {
        let plan = TradingPlan {
            max_exposure_pct: 140.0,
            ..TradingPlan::default()
        }
        .sanitize();
        assert_eq!(plan.market_bias, "neutral");
        assert!((plan.max_exposure_pct - 100.0).abs() < f64::EPSILON);

        let plan = TradingPlan {
            market_bias: "bearish".to_string(),
            max_exposure_pct: -5.0,
            ..TradingPlan::default()
        }
        .sanitize();
        assert_eq!(plan.market_bias, "bearish");
        assert!(plan.max_exposure_pct.abs() < f64::EPSILON);
    }

    #[test]
    fn missing_fields_deserialize_empty() {
        let plan: TradingPlan = serde_json::from_str(r#"{"market_bias":"bullish"}"#).unwrap();
        assert!(plan.watch_pool.is_empty());
    }

    #[test]
    fn markdown_lists_sections() {
        let md = fallback_plan().to_markdown("2026-01-05");
        assert!(md.starts_with("**Plan 2026-01-05**\n- bias: neutral\n- max exposure: 30%\n"));
        assert!(md.contains("**Avoid**: high-volatility news-driven setups"));
        assert!(!md.contains("**Trades**"));
    }
}
