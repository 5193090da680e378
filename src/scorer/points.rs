use std::collections::HashMap;

use serde_json::json;

use crate::registry::CompetitionConfig;
use crate::scorer::ranking::RankedAsset;
use crate::types::{CompetitionOption, Guess, RankedResult, Score};

/// Attach ranked assets to their option rows. Assets with no matching option are dropped.
pub fn to_results(
    competition_id: i64,
    ranked: &[RankedAsset],
    options: &[CompetitionOption],
) -> Vec<RankedResult> {
    let by_symbol: HashMap<&str, i64> = options
        .iter()
        .map(|o| (o.symbol.as_str(), o.id))
        .collect();

    ranked
        .iter()
        .filter_map(|r| {
            let option_id = *by_symbol.get(r.symbol.as_str())?;
            Some(RankedResult {
                competition_id,
                option_id,
                pct_change: r.pct_change,
                is_winner: r.is_winner,
                rank: r.rank,
            })
        })
        .collect()
}

/// One score per guess. A guess on an option with no result earns 0.
pub fn score_guesses(
    config: &CompetitionConfig,
    competition_id: i64,
    guesses: &[Guess],
    results: &[RankedResult],
    options: &[CompetitionOption],
) -> Vec<Score> {
    let by_option: HashMap<i64, &RankedResult> =
        results.iter().map(|r| (r.option_id, r)).collect();
    let symbols: HashMap<i64, &str> = options.iter().map(|o| (o.id, o.symbol.as_str())).collect();
    let total_ranked = results.len();

    guesses
        .iter()
        .filter(|g| g.competition_id == competition_id)
        .map(|g| {
            let result = by_option.get(&g.option_id);
            let rank = result.map(|r| r.rank);
            let points = config.points_for_rank(rank);
            Score {
                user_id: g.user_id.clone(),
                competition_id,
                points,
                metadata: json!({
                    "rank": rank,
                    "symbol": symbols.get(&g.option_id),
                    "percent_change": result.map(|r| r.pct_change * 100.0),
                    "total_ranked": total_ranked,
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EQUITY;

    fn option(id: i64, symbol: &str) -> CompetitionOption {
        CompetitionOption {
            id,
            competition_id: 7,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            external_key: symbol.to_string(),
        }
    }

    fn ranked(symbol: &str, rank: u32, pct: f64) -> RankedAsset {
        RankedAsset { symbol: symbol.to_string(), pct_change: pct, rank, is_winner: rank == 1 }
    }

    fn guess(user: &str, option_id: i64) -> Guess {
        Guess { user_id: user.to_string(), competition_id: 7, option_id }
    }

    #[test]
    fn results_map_symbols_to_option_ids() {
        let options = vec![option(1, "AAPL"), option(2, "MSFT")];
        let results = to_results(7, &[ranked("MSFT", 1, 0.02), ranked("AAPL", 2, 0.01)], &options);
        assert_eq!(results.len(), 2);
        assert_eq!((results[0].option_id, results[0].rank), (2, 1));
        assert!(results[0].is_winner);
        assert_eq!((results[1].option_id, results[1].rank), (1, 2));
    }

    #[test]
    fn scores_follow_points_table() {
        let options = vec![option(1, "AAPL"), option(2, "MSFT")];
        let results = to_results(7, &[ranked("MSFT", 1, 0.02), ranked("AAPL", 2, 0.01)], &options);
        let scores = score_guesses(&EQUITY, 7, &[guess("u1", 2), guess("u2", 1)], &results, &options);
        assert_eq!(scores[0].points, 100);
        assert_eq!(scores[1].points, 80);
        assert_eq!(scores[0].metadata["symbol"], "MSFT");
        assert_eq!(scores[0].metadata["rank"], 1);
        assert_eq!(scores[0].metadata["total_ranked"], 2);
    }

    #[test]
    fn unranked_pick_scores_zero() {
        let options = vec![option(1, "AAPL"), option(3, "NODATA")];
        let results = to_results(7, &[ranked("AAPL", 1, 0.02)], &options);
        let scores = score_guesses(&EQUITY, 7, &[guess("u1", 3)], &results, &options);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].points, 0);
        assert!(scores[0].metadata["rank"].is_null());
        assert_eq!(scores[0].metadata["symbol"], "NODATA");
    }

    #[test]
    fn rank_seventeen_scores_zero() {
        let options: Vec<_> = (1..=17).map(|i| option(i, &format!("S{i}"))).collect();
        let ranked_assets: Vec<_> = (1..=17).map(|i| ranked(&format!("S{i}"), i as u32, 0.0)).collect();
        let results = to_results(7, &ranked_assets, &options);
        let scores = score_guesses(&EQUITY, 7, &[guess("u16", 16), guess("u17", 17)], &results, &options);
        assert_eq!(scores[0].points, 1);
        assert_eq!(scores[1].points, 0);
    }
}
