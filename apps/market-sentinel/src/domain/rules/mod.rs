//! Risk Rules
//!
//! Four independent rules evaluated against a symbol's sliding window:
//!
//! | Rule             | Applies to       | Severity      | Evidence      |
//! |------------------|------------------|---------------|---------------|
//! | `INDEX_RISK`     | index symbol     | med / high    | `Threshold`   |
//! | `PANIC_DROP`     | stock symbols    | med / high    | `Drawdown`    |
//! | `VOLUME_SPIKE`   | stock symbols    | med           | `VolumeRatio` |
//! | `KEY_BREAK_DOWN` | configured level | configured    | `Level`       |
//!
//! Evaluators are pure; cooldown gating and emission live in the event
//! engine service.

mod evaluators;
mod evidence;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use evaluators::{index_risk, key_break_down, panic_drop, volume_spike};
pub use evidence::Evidence;

use super::market::Snapshot;

// =============================================================================
// Severity
// =============================================================================

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs attention.
    Med,
    /// Act now.
    High,
}

impl Severity {
    /// Parse case-insensitively; anything unrecognized is `Low`.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "high" => Self::High,
            "med" => Self::Med,
            _ => Self::Low,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rule Kind
// =============================================================================

/// The four rule types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    /// Index drop versus previous close.
    IndexRisk,
    /// Stock drawdown inside a trailing time window.
    PanicDrop,
    /// Stock volume versus its moving average.
    VolumeSpike,
    /// Stock price below a configured level.
    KeyBreakDown,
}

impl RuleKind {
    /// Event type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IndexRisk => "INDEX_RISK",
            Self::PanicDrop => "PANIC_DROP",
            Self::VolumeSpike => "VOLUME_SPIKE",
            Self::KeyBreakDown => "KEY_BREAK_DOWN",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rule Hit
// =============================================================================

/// A rule firing before cooldown gating.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    /// Which rule fired.
    pub rule: RuleKind,
    /// Severity of the firing.
    pub severity: Severity,
    /// Evidence for the firing.
    pub evidence: Evidence,
}

impl RuleHit {
    /// Dedup key for this firing on `symbol`.
    #[must_use]
    pub fn dedup_key(&self, symbol: &str) -> String {
        dedup_key(self.rule, symbol, &self.evidence, self.severity)
    }

    /// Event title for this firing.
    #[must_use]
    pub fn title(&self, snapshot: &Snapshot) -> String {
        event_title(self.rule, snapshot, &self.evidence)
    }
}

/// `"{RULE}:{symbol}:{discriminator}:{severity}"`.
#[must_use]
pub fn dedup_key(rule: RuleKind, symbol: &str, evidence: &Evidence, severity: Severity) -> String {
    format!("{rule}:{symbol}:{}:{severity}", evidence.discriminator())
}

/// All risk events for one symbol merge together.
#[must_use]
pub fn merge_key(symbol: &str) -> String {
    format!("risk:{symbol}")
}

/// Human-readable event title.
#[must_use]
pub fn event_title(rule: RuleKind, snapshot: &Snapshot, evidence: &Evidence) -> String {
    match (rule, evidence) {
        (RuleKind::IndexRisk, _) => {
            format!("{} INDEX_RISK change_pct={:.2}", snapshot.symbol, snapshot.change_pct)
        }
        (
            RuleKind::PanicDrop,
            Evidence::Drawdown {
                drawdown_pct,
                window_sec,
                ..
            },
        ) => format!(
            "{} PANIC_DROP drawdown={drawdown_pct:.2} window_sec={window_sec}",
            snapshot.symbol
        ),
        _ => format!("{} {rule}", snapshot.symbol),
    }
}

// =============================================================================
// Rule Configuration
// =============================================================================

/// INDEX_RISK thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRiskParams {
    /// Index symbol the rule watches.
    #[serde(default = "default_index_symbol")]
    pub symbol: String,
    /// Drop (positive percent) for `med`.
    #[serde(default = "default_index_med")]
    pub med_pct: f64,
    /// Drop (positive percent) for `high`.
    #[serde(default = "default_index_high")]
    pub high_pct: f64,
}

impl Default for IndexRiskParams {
    fn default() -> Self {
        Self {
            symbol: default_index_symbol(),
            med_pct: default_index_med(),
            high_pct: default_index_high(),
        }
    }
}

/// PANIC_DROP thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicDropParams {
    /// Trailing window in seconds.
    #[serde(default = "default_panic_window")]
    pub window_sec: i64,
    /// Drawdown (positive percent) for `med`.
    #[serde(default = "default_panic_med")]
    pub med_pct: f64,
    /// Drawdown (positive percent) for `high`.
    #[serde(default = "default_panic_high")]
    pub high_pct: f64,
}

impl Default for PanicDropParams {
    fn default() -> Self {
        Self {
            window_sec: default_panic_window(),
            med_pct: default_panic_med(),
            high_pct: default_panic_high(),
        }
    }
}

/// VOLUME_SPIKE parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpikeParams {
    /// Points in the moving average, including the current one.
    #[serde(default = "default_ma_points")]
    pub ma_points: usize,
    /// Minimum current/average ratio.
    #[serde(default = "default_volume_ratio")]
    pub ratio: f64,
}

impl Default for VolumeSpikeParams {
    fn default() -> Self {
        Self {
            ma_points: default_ma_points(),
            ratio: default_volume_ratio(),
        }
    }
}

/// KEY_BREAK_DOWN levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBreakDownParams {
    /// Support level per lowercase symbol.
    #[serde(default = "default_levels")]
    pub levels: HashMap<String, f64>,
    /// Severity of a break: `high`, anything else means `med`.
    #[serde(default = "default_break_priority")]
    pub priority: String,
}

impl Default for KeyBreakDownParams {
    fn default() -> Self {
        Self {
            levels: default_levels(),
            priority: default_break_priority(),
        }
    }
}

impl KeyBreakDownParams {
    /// Severity emitted on a break.
    #[must_use]
    pub fn severity(&self) -> Severity {
        if self.priority.trim().eq_ignore_ascii_case("high") {
            Severity::High
        } else {
            Severity::Med
        }
    }
}

/// Cooldown seconds per rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownParams {
    /// INDEX_RISK cooldown.
    #[serde(default = "default_cd_index")]
    pub index_risk: i64,
    /// PANIC_DROP cooldown.
    #[serde(default = "default_cd_panic")]
    pub panic_drop: i64,
    /// VOLUME_SPIKE cooldown.
    #[serde(default = "default_cd_volume")]
    pub volume_spike: i64,
    /// KEY_BREAK_DOWN cooldown.
    #[serde(default = "default_cd_break")]
    pub key_break_down: i64,
}

impl Default for CooldownParams {
    fn default() -> Self {
        Self {
            index_risk: default_cd_index(),
            panic_drop: default_cd_panic(),
            volume_spike: default_cd_volume(),
            key_break_down: default_cd_break(),
        }
    }
}

impl CooldownParams {
    /// Cooldown for a rule.
    #[must_use]
    pub const fn for_rule(&self, rule: RuleKind) -> i64 {
        match rule {
            RuleKind::IndexRisk => self.index_risk,
            RuleKind::PanicDrop => self.panic_drop,
            RuleKind::VolumeSpike => self.volume_spike,
            RuleKind::KeyBreakDown => self.key_break_down,
        }
    }
}

/// Full rule set configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// INDEX_RISK.
    #[serde(default)]
    pub index_risk: IndexRiskParams,
    /// PANIC_DROP.
    #[serde(default)]
    pub panic_drop: PanicDropParams,
    /// VOLUME_SPIKE.
    #[serde(default)]
    pub volume_spike: VolumeSpikeParams,
    /// KEY_BREAK_DOWN.
    #[serde(default)]
    pub key_break_down: KeyBreakDownParams,
    /// Maximum snapshots kept per symbol.
    #[serde(default = "default_window_max_keep")]
    pub window_max_keep: usize,
    /// Cooldown seconds per rule.
    #[serde(default)]
    pub cooldown_sec: CooldownParams,
}

impl RuleConfig {
    /// Replace unusable values with defaults.
    ///
    /// Non-positive windows, cooldowns and ratios fall back to their
    /// defaults; symbols and level keys are lowercased.
    #[must_use]
    pub fn with_defaults_applied(mut self) -> Self {
        self.index_risk.symbol = self.index_risk.symbol.trim().to_lowercase();
        if self.index_risk.symbol.is_empty() {
            self.index_risk.symbol = default_index_symbol();
        }
        if self.panic_drop.window_sec <= 0 {
            self.panic_drop.window_sec = default_panic_window();
        }
        if self.volume_spike.ma_points <= 1 {
            self.volume_spike.ma_points = default_ma_points();
        }
        if self.volume_spike.ratio <= 0.0 {
            self.volume_spike.ratio = default_volume_ratio();
        }
        if self.key_break_down.priority.trim().is_empty() {
            self.key_break_down.priority = default_break_priority();
        }
        self.key_break_down.levels = self
            .key_break_down
            .levels
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        if self.window_max_keep == 0 {
            self.window_max_keep = default_window_max_keep();
        }
        let cd = &mut self.cooldown_sec;
        if cd.index_risk <= 0 {
            cd.index_risk = default_cd_index();
        }
        if cd.panic_drop <= 0 {
            cd.panic_drop = default_cd_panic();
        }
        if cd.volume_spike <= 0 {
            cd.volume_spike = default_cd_volume();
        }
        if cd.key_break_down <= 0 {
            cd.key_break_down = default_cd_break();
        }
        self
    }

    /// Evaluate all four rules, in a fixed order, against an updated window.
    ///
    /// `window` must end with `snapshot`.
    #[must_use]
    pub fn evaluate(&self, snapshot: &Snapshot, window: &[Snapshot]) -> Vec<RuleHit> {
        let index = self.index_risk.symbol.as_str();
        [
            index_risk(&self.index_risk, snapshot),
            panic_drop(&self.panic_drop, index, snapshot, window),
            volume_spike(&self.volume_spike, index, snapshot, window),
            key_break_down(&self.key_break_down, index, snapshot),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn default_index_symbol() -> String {
    "sh000001".to_string()
}

const fn default_index_med() -> f64 {
    1.5
}

const fn default_index_high() -> f64 {
    3.0
}

const fn default_panic_window() -> i64 {
    300
}

const fn default_panic_med() -> f64 {
    2.0
}

const fn default_panic_high() -> f64 {
    4.0
}

const fn default_ma_points() -> usize {
    5
}

const fn default_volume_ratio() -> f64 {
    3.0
}

/// Shipped default. The index never matches KEY_BREAK_DOWN, so stock
/// levels such as `sh600000: 10.0` must come from config.
fn default_levels() -> HashMap<String, f64> {
    HashMap::from([("sh000001".to_string(), 2800.0)])
}

fn default_break_priority() -> String {
    "med".to_string()
}

const fn default_window_max_keep() -> usize {
    super::window::DEFAULT_WINDOW_CAP
}

const fn default_cd_index() -> i64 {
    300
}

const fn default_cd_panic() -> i64 {
    180
}

const fn default_cd_volume() -> i64 {
    180
}

const fn default_cd_break() -> i64 {
    600
}

// =============================================================================
// Tests
// =============================================================================
