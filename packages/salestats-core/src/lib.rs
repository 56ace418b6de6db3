//! Core computation for the regional sales statistics pipeline.
//!
//! The pipeline runs in three batch stages over a flat CSV dataset:
//!
//! 1. **Aggregate** — fold raw rows into per-(region, model) counters
//!    ([`aggregate`]). The counter tuple is a commutative monoid, so
//!    partial folds may be merged hierarchically in any order.
//! 2. **Rollup** — re-key the aggregates by region and sum volume
//!    ([`rollup`]).
//! 3. **Join/Enrich/Rank** — load the region totals as an in-memory side
//!    table, join every aggregate against it to derive percentage metrics
//!    ([`enrich`]), then keep the top-K models per region ([`rank`]).
//!
//! Everything in this crate is pure: no I/O, no logging, no panics on
//! dirty input. Malformed rows are skipped, malformed numbers default to
//! zero, and a missing side-table entry yields a zero share. Stage
//! sequencing, persistence, and failure handling live in
//! `salestats-orchestration`.

pub mod aggregate;
pub mod enrich;
pub mod rank;
pub mod record;
pub mod rollup;

pub use aggregate::{
    aggregate_line, aggregate_lines_parallel, aggregate_records, merge_partials,
    parse_aggregate_line, AggregateMap, GroupKey, SalesTotals,
};
pub use enrich::{enrich, EnrichedSale, RegionTotalsTable};
pub use rank::{rank_regions, ranked_line, RankedRegion, DEFAULT_TOP_K};
pub use record::{parse_count, parse_sales_line, SalesRecord};
pub use rollup::{region_total_line, rollup_totals, rollup_volume_line, RegionTotal, TotalsMap};
