//! Stage 2: roll stage-1 aggregates up into per-region volume totals.

use crate::aggregate::{KEY_SEPARATOR, PAYLOAD_SEPARATOR};
use crate::record::parse_count;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Region-level total volume, one per region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionTotal {
    pub region: String,
    pub total_volume: i64,
}

/// Region → summed volume.
pub type TotalsMap = FxHashMap<String, i64>;

/// Extracts (region, sumVolume) from one stage-1 line, discarding the model.
///
/// Lines with fewer than three tab fields or fewer than two payload
/// components are skipped; an unparsable volume contributes 0.
pub fn rollup_volume_line(line: &str) -> Option<(String, i64)> {
    let fields: Vec<&str> = line.split(KEY_SEPARATOR).collect();
    if fields.len() < 3 {
        return None;
    }
    let parts: Vec<&str> = fields[2].trim().split(PAYLOAD_SEPARATOR).collect();
    if parts.len() < 2 {
        return None;
    }
    Some((fields[0].trim().to_string(), parse_count(parts[1])))
}

/// Sums volume per region across stage-1 output lines.
pub fn rollup_totals<'a, I>(lines: I) -> TotalsMap
where
    I: IntoIterator<Item = &'a str>,
{
    let mut totals = TotalsMap::default();
    for line in lines {
        if let Some((region, volume)) = rollup_volume_line(line) {
            *totals.entry(region).or_insert(0) += volume;
        }
    }
    totals
}

/// Flattens a totals map into records sorted by region.
pub fn sorted_totals(totals: TotalsMap) -> Vec<RegionTotal> {
    let mut regions: Vec<RegionTotal> = totals
        .into_iter()
        .map(|(region, total_volume)| RegionTotal { region, total_volume })
        .collect();
    regions.sort_by(|a, b| a.region.cmp(&b.region));
    regions
}

/// Formats one stage-2 output line: `region<TAB>totalVolume`.
pub fn region_total_line(region: &str, total_volume: i64) -> String {
    format!("{}{}{}", region, KEY_SEPARATOR, total_volume)
}
