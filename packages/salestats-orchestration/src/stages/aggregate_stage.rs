use crate::error::Result;
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use async_trait::async_trait;
use salestats_core::{aggregate_line, aggregate_lines_parallel};
use std::time::Instant;
use tracing::info;

/// Stage 1: fold raw dataset rows into one output line per
/// (region, model) pair.
///
/// Rows are folded per rayon partition and the partial maps merged, so
/// the fold is the combiner and the final reduce at once; the counter
/// monoid makes the two equivalent. Output lines are emitted sorted by
/// key so a rerun over the same input is byte-identical.
pub struct AggregateStage;

#[async_trait]
impl StageHandler for AggregateStage {
    fn stage_id(&self) -> StageId {
        StageId::Aggregate
    }

    async fn execute(&self, input: StageInput, _ctx: &mut StageContext) -> Result<StageOutput> {
        let start = Instant::now();

        info!(
            "AggregateStage: folding {} raw lines ({} workers, partition size {})",
            input.records.len(),
            input.config.parallel_workers,
            input.config.partition_size
        );

        let groups = aggregate_lines_parallel(&input.records, input.config.partition_size);

        let mut entries: Vec<_> = groups.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let lines: Vec<String> = entries
            .iter()
            .map(|(key, totals)| aggregate_line(key, totals))
            .collect();

        // every accepted record contributed exactly one count
        let accepted: i64 = entries.iter().map(|(_, totals)| totals.count).sum();
        let records_read = input.records.len();
        let records_skipped = records_read.saturating_sub(accepted as usize);
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "AggregateStage: {} groups from {} records ({} skipped) in {}ms",
            lines.len(),
            records_read,
            records_skipped,
            duration_ms
        );

        Ok(StageOutput {
            metrics: StageMetrics {
                records_read,
                records_skipped,
                rows_emitted: lines.len(),
                duration_ms,
            },
            lines,
        })
    }

    fn output_key(&self, ctx: &StageContext) -> String {
        ctx.keys.aggregate_key()
    }
}
