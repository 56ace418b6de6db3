//! Stage 1: fold normalized records into per-(region, model) totals.

use crate::record::{parse_count, parse_sales_line, SalesRecord};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Separator between key fields and payload on intermediate lines.
pub const KEY_SEPARATOR: char = '\t';
/// Separator between the four counters of a serialized payload.
pub const PAYLOAD_SEPARATOR: char = '|';

/// Aggregation key: one entry per (region, model) pair observed in the input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub region: String,
    pub model: String,
}

impl GroupKey {
    pub fn new(region: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            model: model.into(),
        }
    }
}

/// Mergeable per-key sales counters.
///
/// Forms a commutative monoid under component-wise addition with the
/// default value as identity, so any sequence of partial merges followed
/// by a final merge equals merging all inputs directly. That property is
/// what lets the fold run hierarchically over arbitrary partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesTotals {
    pub count: i64,
    pub sum_volume: i64,
    pub sum_price: i64,
    pub high_count: i64,
}

impl SalesTotals {
    /// Counters contributed by a single record.
    pub fn from_record(record: &SalesRecord) -> Self {
        Self {
            count: 1,
            sum_volume: record.volume,
            sum_price: record.price,
            high_count: record.high_sales as i64,
        }
    }

    /// Component-wise addition.
    pub fn merge(&mut self, other: &SalesTotals) {
        self.count += other.count;
        self.sum_volume += other.sum_volume;
        self.sum_price += other.sum_price;
        self.high_count += other.high_count;
    }

    /// Parses a `count|sumVolume|sumPrice|highCount` payload.
    ///
    /// Fragments with fewer than four components contribute zeros to
    /// every counter instead of aborting the surrounding fold; individual
    /// unparsable components also fall back to zero.
    pub fn parse_payload(payload: &str) -> SalesTotals {
        let parts: Vec<&str> = payload.split(PAYLOAD_SEPARATOR).collect();
        if parts.len() < 4 {
            return SalesTotals::default();
        }
        SalesTotals {
            count: parse_count(parts[0]),
            sum_volume: parse_count(parts[1]),
            sum_price: parse_count(parts[2]),
            high_count: parse_count(parts[3]),
        }
    }

    /// Serializes the four counters as `count|sumVolume|sumPrice|highCount`.
    pub fn payload(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.count,
            self.sum_volume,
            self.sum_price,
            self.high_count,
            sep = PAYLOAD_SEPARATOR,
        )
    }
}

/// Final aggregates per (region, model).
pub type AggregateMap = FxHashMap<GroupKey, SalesTotals>;

/// Folds records into per-key totals on a single thread.
pub fn aggregate_records<I>(records: I) -> AggregateMap
where
    I: IntoIterator<Item = SalesRecord>,
{
    let mut groups = AggregateMap::default();
    for record in records {
        let totals = SalesTotals::from_record(&record);
        groups
            .entry(GroupKey::new(record.region, record.model))
            .or_default()
            .merge(&totals);
    }
    groups
}

/// Merges one partial aggregation into another (the combiner step).
pub fn merge_partials(mut left: AggregateMap, right: AggregateMap) -> AggregateMap {
    for (key, totals) in right {
        left.entry(key).or_default().merge(&totals);
    }
    left
}

/// Parses and folds raw dataset lines across rayon partitions.
///
/// Each partition folds independently into its own map, then partial maps
/// are merged pairwise. The monoid property of [`SalesTotals`] guarantees
/// the result equals a single sequential fold regardless of how rayon
/// splits and joins the partitions.
pub fn aggregate_lines_parallel(lines: &[String], partition_size: usize) -> AggregateMap {
    lines
        .par_chunks(partition_size.max(1))
        .map(|chunk| aggregate_records(chunk.iter().filter_map(|line| parse_sales_line(line))))
        .reduce(AggregateMap::default, merge_partials)
}

/// Formats one stage-1 output line:
/// `region<TAB>model<TAB>count|sumVolume|sumPrice|highCount`.
pub fn aggregate_line(key: &GroupKey, totals: &SalesTotals) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        key.region,
        key.model,
        totals.payload(),
        sep = KEY_SEPARATOR,
    )
}

/// Parses one stage-1 line back into a keyed aggregate.
///
/// Lines with fewer than three tab fields or fewer than four payload
/// components are skipped.
pub fn parse_aggregate_line(line: &str) -> Option<(GroupKey, SalesTotals)> {
    let fields: Vec<&str> = line.split(KEY_SEPARATOR).collect();
    if fields.len() < 3 {
        return None;
    }
    if fields[2].split(PAYLOAD_SEPARATOR).count() < 4 {
        return None;
    }
    Some((
        GroupKey::new(fields[0].trim(), fields[1].trim()),
        SalesTotals::parse_payload(fields[2]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(region: &str, model: &str, price: i64, volume: i64, high: bool) -> SalesRecord {
        SalesRecord {
            model: model.to_string(),
            region: region.to_string(),
            price,
            volume,
            high_sales: high,
        }
    }

    #[test]
    fn test_single_record_counters() {
        let totals = SalesTotals::from_record(&record("eu", "x5", 100, 200, true));
        assert_eq!(totals, SalesTotals { count: 1, sum_volume: 200, sum_price: 100, high_count: 1 });
    }

    #[test]
    fn test_merge_is_component_wise() {
        let mut a = SalesTotals { count: 1, sum_volume: 200, sum_price: 100, high_count: 1 };
        let b = SalesTotals { count: 2, sum_volume: 50, sum_price: 30, high_count: 0 };
        a.merge(&b);
        assert_eq!(a, SalesTotals { count: 3, sum_volume: 250, sum_price: 130, high_count: 1 });
    }

    #[test]
    fn test_identity_element() {
        let mut totals = SalesTotals { count: 5, sum_volume: 7, sum_price: 9, high_count: 2 };
        let before = totals;
        totals.merge(&SalesTotals::default());
        assert_eq!(totals, before);
    }

    #[test]
    fn test_aggregate_groups_by_region_and_model() {
        let groups = aggregate_records(vec![
            record("eu", "x5", 100, 200, true),
            record("eu", "x5", 50, 100, false),
            record("eu", "m3", 80, 10, false),
            record("asia", "x5", 70, 5, true),
        ]);

        assert_eq!(groups.len(), 3);
        let eu_x5 = &groups[&GroupKey::new("eu", "x5")];
        assert_eq!(eu_x5.count, 2);
        assert_eq!(eu_x5.sum_volume, 300);
        assert_eq!(eu_x5.sum_price, 150);
        assert_eq!(eu_x5.high_count, 1);
        assert_eq!(groups[&GroupKey::new("asia", "x5")].sum_volume, 5);
    }

    #[test]
    fn test_partial_merge_equals_direct_fold() {
        let records: Vec<SalesRecord> = (0..20)
            .map(|i| record("eu", "x5", i, i * 2, i % 3 == 0))
            .collect();

        let direct = aggregate_records(records.clone());
        let left = aggregate_records(records[..7].to_vec());
        let right = aggregate_records(records[7..].to_vec());
        assert_eq!(merge_partials(left, right), direct);
    }

    #[test]
    fn test_payload_round_trip() {
        let totals = SalesTotals { count: 3, sum_volume: 250, sum_price: 130, high_count: 1 };
        assert_eq!(totals.payload(), "3|250|130|1");
        assert_eq!(SalesTotals::parse_payload(&totals.payload()), totals);
    }

    #[test]
    fn test_short_payload_contributes_zeros() {
        assert_eq!(SalesTotals::parse_payload("1|2"), SalesTotals::default());
        assert_eq!(SalesTotals::parse_payload(""), SalesTotals::default());
        let partial = SalesTotals::parse_payload("1|x|3|1");
        assert_eq!(partial, SalesTotals { count: 1, sum_volume: 0, sum_price: 3, high_count: 1 });
    }

    #[test]
    fn test_aggregate_line_round_trip() {
        let key = GroupKey::new("europe", "x5");
        let totals = SalesTotals { count: 2, sum_volume: 300, sum_price: 150, high_count: 1 };
        let line = aggregate_line(&key, &totals);
        assert_eq!(line, "europe\tx5\t2|300|150|1");
        assert_eq!(parse_aggregate_line(&line), Some((key, totals)));
    }

    #[test]
    fn test_malformed_aggregate_lines_skipped() {
        assert_eq!(parse_aggregate_line(""), None);
        assert_eq!(parse_aggregate_line("europe\tx5"), None);
        assert_eq!(parse_aggregate_line("europe\tx5\t1|2"), None);
    }

    #[test]
    fn test_parallel_fold_matches_sequential() {
        let lines: Vec<String> = (0..200)
            .map(|i| {
                format!(
                    "m{},2020,r{},Blue,Petrol,Manual,2.0,1,{},{},{}",
                    i % 7,
                    i % 3,
                    i,
                    i * 2,
                    if i % 2 == 0 { "High" } else { "Low" }
                )
            })
            .collect();

        let sequential = aggregate_records(lines.iter().filter_map(|l| parse_sales_line(l)));
        for partition_size in [1, 3, 64, 1000] {
            assert_eq!(aggregate_lines_parallel(&lines, partition_size), sequential);
        }
    }
}
