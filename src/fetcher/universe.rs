//! Static option universes compiled into the binary from `data/*.csv`.

use std::collections::HashSet;

use tracing::warn;

use crate::types::{Asset, Category};

const SP500_CSV: &str = include_str!("../../data/sp500.csv");
const CRYPTO_CSV: &str = include_str!("../../data/crypto.csv");

pub fn universe(category: Category) -> Vec<Asset> {
    match category {
        Category::Equity => parse_csv(SP500_CSV),
        Category::Crypto => parse_csv(CRYPTO_CSV),
    }
}

/// `symbol,name,external_key` rows. Blank lines, `#` comments and the header are
/// skipped; malformed rows are logged and dropped. The first row per symbol wins.
pub fn parse_csv(text: &str) -> Vec<Asset> {
    let mut seen = HashSet::new();
    let mut assets = Vec::new();

    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.eq_ignore_ascii_case("symbol,name,external_key") {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [symbol, name, external_key] = fields[..] else {
            warn!("universe line {}: expected 3 fields, got {}", n + 1, fields.len());
            continue;
        };
        if symbol.is_empty() || external_key.is_empty() {
            warn!("universe line {}: empty symbol or key", n + 1);
            continue;
        }
        let symbol = symbol.to_ascii_uppercase();
        if !seen.insert(symbol.clone()) {
            continue;
        }
        assets.push(Asset {
            symbol,
            name: if name.is_empty() { external_key.to_string() } else { name.to_string() },
            external_key: external_key.to_string(),
        });
    }

    assets
}
