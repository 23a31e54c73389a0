//! Rule evaluators.
//!
//! Each evaluator returns at most one hit. When both thresholds are crossed
//! only the `high` firing is produced.

use super::{
    Evidence, IndexRiskParams, KeyBreakDownParams, PanicDropParams, RuleHit, RuleKind, Severity,
    VolumeSpikeParams,
};
use crate::domain::market::{Snapshot, is_stock_symbol};

/// Pick `high` or `med` for a negative move against two positive thresholds.
fn grade_drop(move_pct: f64, med_pct: f64, high_pct: f64) -> Option<(Severity, f64)> {
    if move_pct <= -high_pct {
        Some((Severity::High, high_pct))
    } else if move_pct <= -med_pct {
        Some((Severity::Med, med_pct))
    } else {
        None
    }
}

/// INDEX_RISK: the index is down versus previous close.
///
/// A zero change is treated as "no data" and never fires.
#[must_use]
pub fn index_risk(params: &IndexRiskParams, snapshot: &Snapshot) -> Option<RuleHit> {
    if snapshot.symbol != params.symbol.to_lowercase() {
        return None;
    }
    if snapshot.change_pct == 0.0 {
        return None;
    }
    let (severity, threshold) = grade_drop(snapshot.change_pct, params.med_pct, params.high_pct)?;
    Some(RuleHit {
        rule: RuleKind::IndexRisk,
        severity,
        evidence: Evidence::Threshold {
            change_pct: snapshot.change_pct,
            threshold,
        },
    })
}

/// PANIC_DROP: drawdown from the highest price inside the trailing window.
///
/// Scans backwards from the newest point and stops at the first snapshot
/// older than `ts - window_sec`.
#[must_use]
pub fn panic_drop(
    params: &PanicDropParams,
    index_symbol: &str,
    snapshot: &Snapshot,
    window: &[Snapshot],
) -> Option<RuleHit> {
    if !is_stock_symbol(&snapshot.symbol, index_symbol) {
        return None;
    }
    if params.window_sec <= 0 || window.len() < 2 {
        return None;
    }
    let cutoff = snapshot.ts - params.window_sec;
    let max_price = window
        .iter()
        .rev()
        .take_while(|s| s.ts >= cutoff)
        .map(|s| s.price)
        .fold(0.0_f64, f64::max);
    if max_price <= 0.0 {
        return None;
    }
    let drawdown_pct = (snapshot.price - max_price) / max_price * 100.0;
    let (severity, threshold) = grade_drop(drawdown_pct, params.med_pct, params.high_pct)?;
    Some(RuleHit {
        rule: RuleKind::PanicDrop,
        severity,
        evidence: Evidence::Drawdown {
            drawdown_pct,
            window_sec: params.window_sec,
            threshold,
        },
    })
}

/// VOLUME_SPIKE: current volume against the average of the preceding
/// `ma_points - 1` snapshots.
///
/// Zero-volume points are left out of the average. The rule stays silent
/// until the window holds `ma_points` snapshots.
#[must_use]
pub fn volume_spike(
    params: &VolumeSpikeParams,
    index_symbol: &str,
    snapshot: &Snapshot,
    window: &[Snapshot],
) -> Option<RuleHit> {
    if !is_stock_symbol(&snapshot.symbol, index_symbol) {
        return None;
    }
    if params.ma_points <= 1 || window.len() < params.ma_points {
        return None;
    }
    let start = window.len() - params.ma_points;
    let (sum, count) = window[start..window.len() - 1]
        .iter()
        .filter(|s| s.volume > 0.0)
        .fold((0.0_f64, 0_u32), |(sum, count), s| (sum + s.volume, count + 1));
    if count == 0 {
        return None;
    }
    let avg = sum / f64::from(count);
    if avg <= 0.0 {
        return None;
    }
    let ratio = snapshot.volume / avg;
    if ratio < params.ratio {
        return None;
    }
    Some(RuleHit {
        rule: RuleKind::VolumeSpike,
        severity: Severity::Med,
        evidence: Evidence::VolumeRatio { ratio, avg },
    })
}

/// KEY_BREAK_DOWN: price below the configured support level.
#[must_use]
pub fn key_break_down(
    params: &KeyBreakDownParams,
    index_symbol: &str,
    snapshot: &Snapshot,
) -> Option<RuleHit> {
    if !is_stock_symbol(&snapshot.symbol, index_symbol) {
        return None;
    }
    let level = *params.levels.get(&snapshot.symbol)?;
    if snapshot.price <= 0.0 || snapshot.price >= level {
        return None;
    }
    Some(RuleHit {
        rule: RuleKind::KeyBreakDown,
        severity: params.severity(),
        evidence: Evidence::Level { level },
    })
}
