//! Stage 3, second half: per-region ranking and top-K truncation.

use crate::aggregate::KEY_SEPARATOR;
use crate::enrich::EnrichedSale;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Rows emitted per region when no explicit K is configured.
pub const DEFAULT_TOP_K: i32 = 5;

/// Ranked, truncated rows for one region, ordered by volume descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRegion {
    pub region: String,
    pub rows: Vec<EnrichedSale>,
}

/// Groups enriched rows by region, sorts each group by `sum_volume`
/// descending and keeps the first `top_k` rows.
///
/// The sort is stable: rows with equal volume keep their arrival order.
/// `top_k <= 0` yields empty groups rather than an error. Regions come
/// out sorted by name so repeated runs emit identical output.
pub fn rank_regions(rows: Vec<EnrichedSale>, top_k: i32) -> Vec<RankedRegion> {
    let mut by_region: FxHashMap<String, Vec<EnrichedSale>> = FxHashMap::default();
    for row in rows {
        by_region.entry(row.region.clone()).or_default().push(row);
    }

    let keep = top_k.max(0) as usize;
    let mut regions: Vec<RankedRegion> = by_region
        .into_iter()
        .map(|(region, mut rows)| {
            rows.sort_by(|a, b| b.sum_volume.cmp(&a.sum_volume));
            rows.truncate(keep);
            RankedRegion { region, rows }
        })
        .collect();
    regions.sort_by(|a, b| a.region.cmp(&b.region));
    regions
}

/// Formats one stage-3 output line:
/// `region<TAB>model<TAB>sumVolume<TAB>sharePct<TAB>avgPrice<TAB>highSharePct`,
/// share with four fractional digits, price and high share with two.
pub fn ranked_line(row: &EnrichedSale) -> String {
    format!(
        "{}{sep}{}{sep}{}{sep}{:.4}{sep}{:.2}{sep}{:.2}",
        row.region,
        row.model,
        row.sum_volume,
        row.share_pct,
        row.avg_price,
        row.high_share_pct,
        sep = KEY_SEPARATOR,
    )
}
