use crate::error::{PipelineError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::store::decode_lines;
use async_trait::async_trait;
use rayon::prelude::*;
use salestats_core::{enrich, parse_aggregate_line, rank_regions, ranked_line, RegionTotalsTable};
use std::time::Instant;
use tracing::{info, warn};

/// Stage 3: join the aggregates against the region totals, derive the
/// percentage metrics, and keep the top-K models per region.
///
/// The totals table is loaded in full before the first record is joined
/// (load-before-use); a missing totals output is a normal case that
/// yields zero shares, not a failure.
pub struct TopKStage;

#[async_trait]
impl StageHandler for TopKStage {
    fn stage_id(&self) -> StageId {
        StageId::TopK
    }

    async fn execute(&self, input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let start = Instant::now();

        // Load phase: the whole side table is resident before any join runs.
        let rollup_key = ctx.keys.rollup_key();
        let table = match input.upstream.get(&rollup_key) {
            Some(data) => {
                let lines = decode_lines(data);
                RegionTotalsTable::from_lines(lines.iter().map(String::as_str))
            }
            None => {
                warn!(
                    "TopKStage: no totals published under {}; all shares fall back to 0",
                    rollup_key
                );
                RegionTotalsTable::default()
            }
        };

        let aggregate_key = ctx.keys.aggregate_key();
        let data = input.upstream.get(&aggregate_key).ok_or_else(|| {
            PipelineError::MissingDependency(format!("aggregate output not published: {}", aggregate_key))
        })?;
        let lines = decode_lines(data);

        info!(
            "TopKStage: joining {} aggregate lines against {} region totals (top_k = {})",
            lines.len(),
            table.len(),
            ctx.top_k
        );

        // Join/enrich phase: pure per-record join against the loaded table.
        let aggregates: Vec<_> = lines
            .iter()
            .filter_map(|line| parse_aggregate_line(line))
            .collect();
        let records_skipped = lines.len() - aggregates.len();
        let enriched: Vec<_> = aggregates
            .par_iter()
            .map(|(key, totals)| enrich(key, totals, &table))
            .collect();

        // Rank/truncate phase.
        let out: Vec<String> = rank_regions(enriched, ctx.top_k)
            .iter()
            .flat_map(|region| region.rows.iter().map(ranked_line))
            .collect();

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "TopKStage: {} ranked rows from {} lines ({} skipped) in {}ms",
            out.len(),
            lines.len(),
            records_skipped,
            duration_ms
        );

        Ok(StageOutput {
            metrics: StageMetrics {
                records_read: lines.len(),
                records_skipped,
                rows_emitted: out.len(),
                duration_ms,
            },
            lines: out,
        })
    }

    fn required_keys(&self, ctx: &StageContext) -> Vec<String> {
        vec![ctx.keys.aggregate_key(), ctx.keys.rollup_key()]
    }

    fn output_key(&self, ctx: &StageContext) -> String {
        ctx.keys.topk_key()
    }
}
