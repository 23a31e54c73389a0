//! Risk Decision
//!
//! The structured assessment attached to every risk event, its
//! deterministic fallback, and parsing/sanitizing of advisor output.
//!
//! # Fallback
//!
//! The fallback is a pure function of the event's severity and numeric
//! evidence, so evaluating the same event twice yields the same decision.
//!
//! | Severity | risk_level | confidence |
//! |----------|------------|------------|
//! | high     | 5          | 0.7        |
//! | med      | 3          | 0.5        |
//! | other    | 1          | 0.4        |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rules::{RuleHit, RuleKind, Severity};

const MAX_ITEMS: usize = 3;
const DEFAULT_ACTION: &str = "monitor and reduce exposure risk";

// =============================================================================
// Types
// =============================================================================

/// What the advisor sees for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    /// Persisted event id, zero when not persisted.
    pub event_id: i64,
    /// Event type, e.g. `PANIC_DROP`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event severity.
    pub severity: Severity,
    /// Lowercase symbol.
    pub symbol: String,
    /// Change versus previous close.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub change_pct: f64,
    /// Drawdown inside the rule window.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub drawdown_pct: f64,
    /// Rule window length.
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub window_sec: i64,
    /// Threshold crossed, when the evidence names one.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub threshold: f64,
    /// Raw evidence JSON.
    #[serde(default, rename = "evidence_json", skip_serializing_if = "String::is_empty")]
    pub evidence_json: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

impl EventInput {
    /// Build the advisor input for a rule firing.
    #[must_use]
    pub fn from_hit(event_id: i64, symbol: &str, change_pct: f64, hit: &RuleHit) -> Self {
        Self {
            event_id,
            event_type: hit.rule.to_string(),
            severity: hit.severity,
            symbol: symbol.to_string(),
            change_pct,
            drawdown_pct: hit.evidence.drawdown_pct().unwrap_or_default(),
            window_sec: hit.evidence.window_sec().unwrap_or_default(),
            threshold: hit.evidence.threshold().unwrap_or_default(),
            evidence_json: hit.evidence.to_json(),
        }
    }

    /// Attach raw evidence JSON, lifting the numeric fields it carries.
    ///
    /// Fields already set are kept.
    #[must_use]
    pub fn with_evidence_json(mut self, raw: &str) -> Self {
        self.evidence_json = raw.to_string();
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw)
        else {
            return self;
        };
        let num = |key: &str| map.get(key).and_then(serde_json::Value::as_f64);
        if self.threshold == 0.0 {
            self.threshold = num("threshold").unwrap_or_default();
        }
        if self.drawdown_pct == 0.0 {
            self.drawdown_pct = num("drawdown_pct").unwrap_or_default();
        }
        if self.change_pct == 0.0 {
            self.change_pct = num("change_pct").unwrap_or_default();
        }
        if self.window_sec == 0 {
            #[allow(clippy::cast_possible_truncation)]
            let window = num("window_sec").unwrap_or_default() as i64;
            self.window_sec = window;
        }
        self
    }

    fn rule(&self) -> Option<RuleKind> {
        match self.event_type.to_uppercase().as_str() {
            "INDEX_RISK" => Some(RuleKind::IndexRisk),
            "PANIC_DROP" => Some(RuleKind::PanicDrop),
            "VOLUME_SPIKE" => Some(RuleKind::VolumeSpike),
            "KEY_BREAK_DOWN" => Some(RuleKind::KeyBreakDown),
            _ => None,
        }
    }
}

/// A structured risk assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    /// 1 (benign) to 5 (severe).
    pub risk_level: u8,
    /// Severity driving alert priority.
    pub severity: Severity,
    /// One short sentence.
    pub one_liner: String,
    /// One to three evidence items.
    pub why: Vec<String>,
    /// One to three suggested actions.
    pub action_hint: Vec<String>,
    /// 0.0 to 1.0.
    pub confidence: f64,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Unvalidated advisor output, as parsed from text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DecisionDraft {
    /// Proposed risk level.
    #[serde(default)]
    pub risk_level: i64,
    /// Proposed severity, any case.
    #[serde(default)]
    pub severity: String,
    /// Proposed summary.
    #[serde(default)]
    pub one_liner: String,
    /// Proposed evidence items.
    #[serde(default)]
    pub why: Vec<String>,
    /// Proposed actions.
    #[serde(default)]
    pub action_hint: Vec<String>,
    /// Proposed confidence.
    #[serde(default)]
    pub confidence: f64,
    /// Proposed tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Failure to find a decision in advisor output.
#[derive(Debug, Error)]
pub enum DecisionParseError {
    /// No `{...}` object anywhere in the text.
    #[error("no json object found")]
    NoJsonObject,

    /// An object was found but did not decode.
    #[error("parse risk decision: {0}")]
    Invalid(#[from] serde_json::Error),
}

// =============================================================================
// Fallback
// =============================================================================

/// Deterministic decision derived from severity and numeric evidence.
#[must_use]
pub fn fallback_decision(input: &EventInput) -> RiskDecision {
    let (risk_level, confidence) = match input.severity {
        Severity::High => (5, 0.7),
        Severity::Med => (3, 0.5),
        Severity::Low => (1, 0.4),
    };
    let (mut why, mut action_hint) = why_and_actions(input);
    if why.is_empty() {
        why.push("evidence provided in event payload".to_string());
    }
    if action_hint.is_empty() {
        action_hint.push(DEFAULT_ACTION.to_string());
    }
    why.truncate(MAX_ITEMS);
    action_hint.truncate(MAX_ITEMS);

    RiskDecision {
        risk_level,
        severity: input.severity,
        one_liner: format!("{} risk assessment based on event severity", input.severity),
        why,
        action_hint,
        confidence,
        tags: vec![input.event_type.to_lowercase(), "fallback".to_string()],
    }
}

fn why_and_actions(input: &EventInput) -> (Vec<String>, Vec<String>) {
    let threshold = input.threshold;
    match input.rule() {
        Some(RuleKind::PanicDrop) => {
            let drawdown = -input.drawdown_pct.abs();
            let mins = match input.window_sec / 60 {
                m if m <= 0 => 5,
                m => m,
            };
            if drawdown != 0.0 && threshold != 0.0 {
                return (
                    vec![format!(
                        "{mins}-minute drawdown {drawdown:.1}% (threshold -{threshold:.1}%)"
                    )],
                    vec![
                        "cut position or tighten stop-loss, do not add into the move".to_string(),
                        "wait for the decline to stabilize".to_string(),
                    ],
                );
            }
        }
        Some(RuleKind::IndexRisk) => {
            let change = -input.change_pct.abs();
            if change != 0.0 && threshold != 0.0 {
                return (
                    vec![format!(
                        "index change {change:.1}% (threshold -{threshold:.1}%), short-term sentiment weak"
                    )],
                    vec![
                        "lower the overall position cap".to_string(),
                        "avoid chasing highs, stay defensive".to_string(),
                    ],
                );
            }
        }
        _ => {}
    }
    (generic_why(input), actions_for(input.severity))
}

fn generic_why(input: &EventInput) -> Vec<String> {
    let mut out = Vec::new();
    if input.change_pct != 0.0 {
        out.push(format!("change_pct={:.2}", input.change_pct));
    }
    if input.drawdown_pct != 0.0 {
        out.push(format!("drawdown_pct={:.2}", input.drawdown_pct));
    }
    if input.window_sec > 0 {
        out.push(format!("window_sec={}", input.window_sec));
    }
    if !input.evidence_json.is_empty() && out.len() < MAX_ITEMS {
        out.push("evidence_json present".to_string());
    }
    out
}

fn actions_for(severity: Severity) -> Vec<String> {
    let items: &[&str] = match severity {
        Severity::High => &[
            "reduce exposure",
            "tighten risk limits",
            "increase monitoring frequency",
        ],
        Severity::Med => &[
            "monitor closely",
            "review positions",
            "tighten stop-loss rules",
        ],
        Severity::Low => &["monitor and collect more signals"],
    };
    items.iter().map(|s| (*s).to_string()).collect()
}

// =============================================================================
// Parsing / Sanitizing
// =============================================================================

impl DecisionDraft {
    /// Clamp and fill a draft into a valid decision.
    #[must_use]
    pub fn sanitize(self) -> RiskDecision {
        let mut why = self.why;
        let mut action_hint = self.action_hint;
        if why.is_empty() {
            why.push("insufficient evidence".to_string());
        }
        if action_hint.is_empty() {
            action_hint.push(DEFAULT_ACTION.to_string());
        }
        why.truncate(MAX_ITEMS);
        action_hint.truncate(MAX_ITEMS);

        let one_liner = if self.one_liner.is_empty() {
            "risk assessment updated".to_string()
        } else {
            self.one_liner
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let risk_level = self.risk_level.clamp(1, 5) as u8;

        RiskDecision {
            risk_level,
            severity: Severity::parse_lenient(&self.severity),
            one_liner,
            why,
            action_hint,
            confidence: self.confidence.clamp(0.0, 1.0),
            tags: self.tags,
        }
    }
}

/// Parse advisor text: the whole text as JSON, else the first balanced
/// `{...}` object inside it.
///
/// # Errors
///
/// Returns an error when no object is found or the object does not decode.
pub fn parse_decision(text: &str) -> Result<DecisionDraft, DecisionParseError> {
    if let Ok(draft) = serde_json::from_str(text) {
        return Ok(draft);
    }
    let object = extract_first_json_object(text).ok_or(DecisionParseError::NoJsonObject)?;
    Ok(serde_json::from_str(object)?)
}

/// First brace-balanced `{...}` slice of `text`.
///
/// Braces inside string literals are counted too.
#[must_use]
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0_usize;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

// =============================================================================
// Rendering
// =============================================================================

/// Render a decision as a notification body.
#[must_use]
pub fn format_markdown(title: &str, decision: &RiskDecision) -> String {
    let title = if title.is_empty() {
        "Risk Decision"
    } else {
        title
    };
    let mut lines = vec![
        format!("**{title}**"),
        format!(
            "**Verdict**: {} (risk_level={}, severity={})",
            decision.one_liner, decision.risk_level, decision.severity
        ),
        "**Evidence**:".to_string(),
    ];
    lines.extend(decision.why.iter().map(|w| format!("- {w}")));
    lines.push("**Suggested actions**:".to_string());
    lines.extend(decision.action_hint.iter().map(|a| format!("- {a}")));
    lines.push(format!("**Confidence**: {:.2}", decision.confidence));
    lines.join("\n")
}

// =============================================================================
// Tests
// =============================================================================
