use crate::error::{PipelineError, Result};
use crate::job::StageId;
use crate::pipeline::{StageContext, StageHandler, StageInput, StageMetrics, StageOutput};
use crate::store::decode_lines;
use async_trait::async_trait;
use salestats_core::rollup::{region_total_line, rollup_volume_line, sorted_totals, TotalsMap};
use std::time::Instant;
use tracing::info;

/// Stage 2: re-key the published aggregates by region and sum volume.
pub struct RollupStage;

#[async_trait]
impl StageHandler for RollupStage {
    fn stage_id(&self) -> StageId {
        StageId::Rollup
    }

    async fn execute(&self, input: StageInput, ctx: &mut StageContext) -> Result<StageOutput> {
        let start = Instant::now();

        let aggregate_key = ctx.keys.aggregate_key();
        let data = input.upstream.get(&aggregate_key).ok_or_else(|| {
            PipelineError::MissingDependency(format!("aggregate output not published: {}", aggregate_key))
        })?;
        let lines = decode_lines(data);

        info!("RollupStage: totalizing {} aggregate lines", lines.len());

        let mut totals = TotalsMap::default();
        let mut records_skipped = 0;
        for line in &lines {
            match rollup_volume_line(line) {
                Some((region, volume)) => *totals.entry(region).or_insert(0) += volume,
                None => records_skipped += 1,
            }
        }

        let out: Vec<String> = sorted_totals(totals)
            .iter()
            .map(|total| region_total_line(&total.region, total.total_volume))
            .collect();

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "RollupStage: {} regions from {} lines ({} skipped) in {}ms",
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
        vec![ctx.keys.aggregate_key()]
    }

    fn output_key(&self, ctx: &StageContext) -> String {
        ctx.keys.rollup_key()
    }
}
