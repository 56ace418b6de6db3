//! Stage 3, first half: the region-totals side table and the per-record join.
//!
//! The side table is built once, in full, before the first record is
//! joined; the join itself is a pure function against that immutable
//! snapshot.

use crate::aggregate::{GroupKey, SalesTotals, KEY_SEPARATOR};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Region → total volume lookup, fully materialized before any join.
#[derive(Debug, Clone, Default)]
pub struct RegionTotalsTable {
    totals: FxHashMap<String, i64>,
}

impl RegionTotalsTable {
    /// Builds the table from stage-2 output lines.
    ///
    /// Malformed lines (fewer than two tab fields, unparsable total) are
    /// skipped silently. An empty or absent source yields an empty table;
    /// every join then takes the zero-share branch.
    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut totals = FxHashMap::default();
        for line in lines {
            let fields: Vec<&str> = line.split(KEY_SEPARATOR).collect();
            if fields.len() < 2 {
                continue;
            }
            if let Ok(total) = fields[1].parse::<i64>() {
                totals.insert(fields[0].to_string(), total);
            }
        }
        Self { totals }
    }

    pub fn get(&self, region: &str) -> Option<i64> {
        self.totals.get(region).copied()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// One aggregate joined against its region total.
///
/// The percentage fields are rendered with a fixed decimal-point
/// convention: share with four fractional digits, average price and high
/// share with two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSale {
    pub region: String,
    pub model: String,
    pub sum_volume: i64,
    pub share_pct: f64,
    pub avg_price: f64,
    pub high_share_pct: f64,
}

/// Joins one (region, model) aggregate against the totals table.
///
/// A missing or non-positive region total yields a zero share; a zero
/// count yields zero average price and zero high share. Neither case is
/// an error.
pub fn enrich(key: &GroupKey, totals: &SalesTotals, table: &RegionTotalsTable) -> EnrichedSale {
    let share_pct = match table.get(&key.region) {
        Some(total) if total > 0 => 100.0 * totals.sum_volume as f64 / total as f64,
        _ => 0.0,
    };
    let (avg_price, high_share_pct) = if totals.count > 0 {
        (
            totals.sum_price as f64 / totals.count as f64,
            100.0 * totals.high_count as f64 / totals.count as f64,
        )
    } else {
        (0.0, 0.0)
    };

    EnrichedSale {
        region: key.region.clone(),
        model: key.model.clone(),
        sum_volume: totals.sum_volume,
        share_pct,
        avg_price,
        high_share_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(count: i64, volume: i64, price: i64, high: i64) -> SalesTotals {
        SalesTotals {
            count,
            sum_volume: volume,
            sum_price: price,
            high_count: high,
        }
    }

    #[test]
    fn test_table_from_lines() {
        let table = RegionTotalsTable::from_lines(["europe\t500", "asia\t40"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("europe"), Some(500));
        assert_eq!(table.get("unknown"), None);
    }

    #[test]
    fn test_malformed_totals_lines_skipped() {
        let table = RegionTotalsTable::from_lines(["europe", "asia\toops", "", "eu\t9"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("eu"), Some(9));
    }

    #[test]
    fn test_empty_source_yields_empty_table() {
        let table = RegionTotalsTable::from_lines(std::iter::empty::<&str>());
        assert!(table.is_empty());
    }

    #[test]
    fn test_enrich_computes_shares() {
        let table = RegionTotalsTable::from_lines(["europe\t500"]);
        let sale = enrich(&GroupKey::new("europe", "x5"), &totals(2, 300, 150, 1), &table);
        assert_eq!(sale.sum_volume, 300);
        assert!((sale.share_pct - 60.0).abs() < 1e-9);
        assert!((sale.avg_price - 75.0).abs() < 1e-9);
        assert!((sale.high_share_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_region_total_is_zero_share() {
        let table = RegionTotalsTable::default();
        let sale = enrich(&GroupKey::new("europe", "x5"), &totals(2, 300, 150, 1), &table);
        assert_eq!(sale.share_pct, 0.0);
        // the other metrics are untouched by the missing total
        assert!((sale.avg_price - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_total_is_zero_share() {
        let table = RegionTotalsTable::from_lines(["europe\t0", "asia\t-5"]);
        let eu = enrich(&GroupKey::new("europe", "x5"), &totals(1, 10, 5, 0), &table);
        let asia = enrich(&GroupKey::new("asia", "x5"), &totals(1, 10, 5, 0), &table);
        assert_eq!(eu.share_pct, 0.0);
        assert_eq!(asia.share_pct, 0.0);
    }

    #[test]
    fn test_zero_count_yields_zero_derived_metrics() {
        let table = RegionTotalsTable::from_lines(["europe\t500"]);
        let sale = enrich(&GroupKey::new("europe", "x5"), &totals(0, 0, 0, 0), &table);
        assert_eq!(sale.avg_price, 0.0);
        assert_eq!(sale.high_share_pct, 0.0);
        assert_eq!(sale.share_pct, 0.0);
    }
}
