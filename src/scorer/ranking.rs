use std::collections::{HashMap, HashSet};

use crate::types::PriceObservation;

/// One asset's place in the evaluation-day ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedAsset {
    pub symbol: String,
    /// Fractional change (0.05 = +5%).
    pub pct_change: f64,
    /// 1-based. Exact ties still get distinct sequential ranks.
    pub rank: u32,
    pub is_winner: bool,
}

/// Rank every evaluation-day symbol by percent change, best first.
///
/// The evaluation record's own daily change wins when present; otherwise the change
/// is computed against its own previous close, then the stored baseline close. The
/// close it is measured against must be strictly positive. Symbols with no usable
/// change are left out. Sorting is stable, so equal changes keep the order in
/// which their evaluation records were supplied.
pub fn rank(
    baseline: &[PriceObservation],
    evaluation: &[PriceObservation],
    allow_ties: bool,
) -> Vec<RankedAsset> {
    if evaluation.is_empty() {
        return Vec::new();
    }

    let base_close: HashMap<&str, f64> = baseline
        .iter()
        .map(|o| (o.symbol.as_str(), o.close))
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let mut changes: Vec<(&str, f64)> = Vec::with_capacity(evaluation.len());
    let mut best_pct = f64::NEG_INFINITY;

    for obs in evaluation {
        if !seen.insert(obs.symbol.as_str()) {
            continue;
        }
        let Some(pct) = percent_change(obs, base_close.get(obs.symbol.as_str()).copied()) else {
            continue;
        };
        if pct > best_pct {
            best_pct = pct;
        }
        changes.push((obs.symbol.as_str(), pct));
    }

    changes.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut winner_flagged = false;
    changes
        .into_iter()
        .enumerate()
        .map(|(i, (symbol, pct))| {
            let top = pct == best_pct;
            let is_winner = top && (allow_ties || !winner_flagged);
            winner_flagged |= is_winner;
            RankedAsset {
                symbol: symbol.to_string(),
                pct_change: pct,
                rank: (i + 1) as u32,
                is_winner,
            }
        })
        .collect()
}

/// Fractional change for one evaluation record, or None if it cannot be ranked.
pub fn percent_change(eval: &PriceObservation, baseline_close: Option<f64>) -> Option<f64> {
    if let Some(pct) = eval.change_pct.filter(|p| p.is_finite()) {
        return Some(pct / 100.0);
    }
    let usable = |b: &f64| b.is_finite() && *b > 0.0;
    let base = eval.previous_close.filter(usable).or(baseline_close.filter(usable))?;
    if !eval.close.is_finite() {
        return None;
    }
    Some((eval.close - base) / base)
}
