//! Typed rule evidence.
//!
//! Each rule produces exactly one evidence shape. The shape drives the
//! dedup-key discriminator and the numeric fields handed to the decision
//! advisor, so adding a variant forces both to be revisited.

use serde::{Deserialize, Serialize};

/// Evidence attached to a rule firing.
///
/// Serialized as a flat JSON object (no tag), matching what is persisted
/// in `events.evidence_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evidence {
    /// Trailing-window drawdown (PANIC_DROP).
    Drawdown {
        /// Percent drop from the window high (negative).
        drawdown_pct: f64,
        /// Trailing window length in seconds.
        window_sec: i64,
        /// Threshold that was crossed (positive).
        threshold: f64,
    },
    /// Change versus previous close (INDEX_RISK).
    Threshold {
        /// Observed change percent.
        change_pct: f64,
        /// Threshold that was crossed (positive).
        threshold: f64,
    },
    /// Volume versus moving average (VOLUME_SPIKE).
    VolumeRatio {
        /// Current volume divided by the average.
        ratio: f64,
        /// Average of the preceding points.
        avg: f64,
    },
    /// Configured support level (KEY_BREAK_DOWN).
    Level {
        /// Price level that was broken.
        level: f64,
    },
}

impl Evidence {
    /// Window length, when the evidence is window-based.
    #[must_use]
    pub const fn window_sec(&self) -> Option<i64> {
        match self {
            Self::Drawdown { window_sec, .. } => Some(*window_sec),
            _ => None,
        }
    }

    /// Broken level, when the evidence is level-based.
    #[must_use]
    pub const fn level(&self) -> Option<f64> {
        match self {
            Self::Level { level } => Some(*level),
            _ => None,
        }
    }

    /// Crossed threshold, when the evidence carries one.
    #[must_use]
    pub const fn threshold(&self) -> Option<f64> {
        match self {
            Self::Drawdown { threshold, .. } | Self::Threshold { threshold, .. } => {
                Some(*threshold)
            }
            _ => None,
        }
    }

    /// Drawdown percent, when present.
    #[must_use]
    pub const fn drawdown_pct(&self) -> Option<f64> {
        match self {
            Self::Drawdown { drawdown_pct, .. } => Some(*drawdown_pct),
            _ => None,
        }
    }

    /// Change percent, when present.
    #[must_use]
    pub const fn change_pct(&self) -> Option<f64> {
        match self {
            Self::Threshold { change_pct, .. } => Some(*change_pct),
            _ => None,
        }
    }

    /// Dedup discriminator: window tag, else level tag, else threshold tag,
    /// else `base`.
    #[must_use]
    pub fn discriminator(&self) -> String {
        if let Some(w) = self.window_sec() {
            return format!("w{w}");
        }
        if let Some(level) = self.level() {
            return format!("lvl{level}");
        }
        if let Some(thr) = self.threshold() {
            return format!("thr{thr}");
        }
        "base".to_string()
    }

    /// Serialize to the persisted JSON form.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a persisted evidence payload. Unknown shapes yield `None`.
    #[must_use]
    pub fn from_json(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        serde_json::from_str(raw).ok()
    }
}
