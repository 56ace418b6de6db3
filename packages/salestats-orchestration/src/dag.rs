use crate::error::{PipelineError, Result};
use crate::job::StageId;
use std::collections::{HashMap, HashSet};

/// Names the published output of each stage for one (dataset, run) pair.
#[derive(Debug, Clone)]
pub struct StageKeys {
    dataset_id: String,
    run_id: String,
}

impl StageKeys {
    pub fn new(dataset_id: String, run_id: String) -> Self {
        Self { dataset_id, run_id }
    }

    pub fn aggregate_key(&self) -> String {
        format!("aggregate:{}:{}", self.dataset_id, self.run_id)
    }

    pub fn rollup_key(&self) -> String {
        format!("rollup:{}:{}", self.dataset_id, self.run_id)
    }

    pub fn topk_key(&self) -> String {
        format!("topk:{}:{}", self.dataset_id, self.run_id)
    }

    /// Get the output key for a stage
    pub fn key_for_stage(&self, stage: StageId) -> String {
        match stage {
            StageId::Aggregate => self.aggregate_key(),
            StageId::Rollup => self.rollup_key(),
            StageId::TopK => self.topk_key(),
        }
    }
}

/// Stage node in DAG
#[derive(Debug, Clone)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub dependencies: Vec<StageId>,
    pub timeout_ms: u64,
}

impl StageNode {
    pub fn new(id: StageId, name: &'static str, dependencies: Vec<StageId>, timeout_ms: u64) -> Self {
        Self {
            id,
            name,
            dependencies,
            timeout_ms,
        }
    }
}

/// Pipeline DAG with topological sort
#[derive(Debug, Clone)]
pub struct PipelineDAG {
    stages: HashMap<StageId, StageNode>,
    execution_order: Vec<Vec<StageId>>, // Vec of parallel groups
}

impl PipelineDAG {
    /// Create a new DAG from stage definitions
    pub fn new(stages: Vec<StageNode>) -> Result<Self> {
        let mut stage_map = HashMap::new();
        for stage in stages {
            stage_map.insert(stage.id, stage);
        }

        // Validate dependencies exist
        for stage in stage_map.values() {
            for dep in &stage.dependencies {
                if !stage_map.contains_key(dep) {
                    return Err(PipelineError::MissingDependency(format!(
                        "Stage {:?} depends on non-existent stage {:?}",
                        stage.id, dep
                    )));
                }
            }
        }

        // Compute execution order via topological sort
        let execution_order = Self::topological_sort(&stage_map)?;

        Ok(Self {
            stages: stage_map,
            execution_order,
        })
    }

    /// The sales pipeline: Aggregate → Rollup → TopK.
    ///
    /// TopK reads both the aggregates and the rollup totals, so it depends
    /// on both; the rollup barrier guarantees the totals are fully
    /// published before the TopK load phase begins.
    pub fn sales_pipeline() -> Result<Self> {
        let stages = vec![
            StageNode::new(
                StageId::Aggregate,
                "Region/Model Aggregate",
                vec![],
                300_000, // 5 minutes
            ),
            StageNode::new(
                StageId::Rollup,
                "Region Totals",
                vec![StageId::Aggregate],
                180_000, // 3 minutes
            ),
            StageNode::new(
                StageId::TopK,
                "Top-K per Region",
                vec![StageId::Aggregate, StageId::Rollup],
                300_000, // 5 minutes
            ),
        ];

        Self::new(stages)
    }

    /// Topological sort with parallel group detection
    fn topological_sort(stages: &HashMap<StageId, StageNode>) -> Result<Vec<Vec<StageId>>> {
        let mut in_degree: HashMap<StageId, usize> = stages
            .values()
            .map(|stage| (stage.id, stage.dependencies.len()))
            .collect();

        let mut result = Vec::new();
        let mut processed = HashSet::new();

        while processed.len() < stages.len() {
            // Find all stages with in-degree 0 (can run in parallel)
            let mut ready: Vec<StageId> = in_degree
                .iter()
                .filter(|(id, &degree)| degree == 0 && !processed.contains(*id))
                .map(|(&id, _)| id)
                .collect();

            if ready.is_empty() {
                return Err(PipelineError::DagCycleDetected);
            }

            ready.sort_by_key(|id| id.as_str());
            result.push(ready.clone());

            // Mark as processed and decrement dependents
            for &stage_id in &ready {
                processed.insert(stage_id);
                in_degree.remove(&stage_id);

                for dependent in stages.values() {
                    if dependent.dependencies.contains(&stage_id) {
                        if let Some(degree) = in_degree.get_mut(&dependent.id) {
                            *degree -= 1;
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    /// Get execution order
    pub fn execution_order(&self) -> &[Vec<StageId>] {
        &self.execution_order
    }

    /// Get stage node
    pub fn get_stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(&id)
    }

    /// Get execution plan as string (for logging)
    pub fn execution_plan(&self) -> String {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let stage_names: Vec<_> = group.iter().map(|id| self.stages[id].name).collect();

                if group.len() > 1 {
                    format!("Phase {}: {} (parallel)", i + 1, stage_names.join(" + "))
                } else {
                    format!("Phase {}: {}", i + 1, stage_names[0])
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Get required output keys for a stage's dependencies
    pub fn required_keys(&self, stage_id: StageId, keys: &StageKeys) -> Vec<String> {
        let stage = match self.stages.get(&stage_id) {
            Some(s) => s,
            None => return vec![],
        };

        stage
            .dependencies
            .iter()
            .map(|dep_id| keys.key_for_stage(*dep_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_key_generation() {
        let keys = StageKeys::new("bmw".to_string(), "run7".to_string());
        assert_eq!(keys.aggregate_key(), "aggregate:bmw:run7");
        assert_eq!(keys.rollup_key(), "rollup:bmw:run7");
        assert_eq!(keys.topk_key(), "topk:bmw:run7");
    }

    #[test]
    fn test_key_for_stage() {
        let keys = StageKeys::new("bmw".to_string(), "run1".to_string());
        assert_eq!(keys.key_for_stage(StageId::Aggregate), "aggregate:bmw:run1");
        assert_eq!(keys.key_for_stage(StageId::Rollup), "rollup:bmw:run1");
        assert_eq!(keys.key_for_stage(StageId::TopK), "topk:bmw:run1");
    }

    #[test]
    fn test_dag_topological_sort_simple() {
        let stages = vec![
            StageNode::new(StageId::Aggregate, "Aggregate", vec![], 1000),
            StageNode::new(StageId::Rollup, "Rollup", vec![StageId::Aggregate], 1000),
        ];

        let dag = PipelineDAG::new(stages).unwrap();
        let order = dag.execution_order();

        assert_eq!(order.len(), 2);
        assert_eq!(order[0], vec![StageId::Aggregate]);
        assert_eq!(order[1], vec![StageId::Rollup]);
    }

    #[test]
    fn test_dag_parallel_detection() {
        let stages = vec![
            StageNode::new(StageId::Aggregate, "Aggregate", vec![], 1000),
            StageNode::new(StageId::Rollup, "Rollup", vec![], 1000),
        ];

        let dag = PipelineDAG::new(stages).unwrap();
        let order = dag.execution_order();

        assert_eq!(order.len(), 1);
        assert_eq!(order[0].len(), 2); // Both in same parallel group
        assert!(order[0].contains(&StageId::Aggregate));
        assert!(order[0].contains(&StageId::Rollup));
    }

    #[test]
    fn test_sales_pipeline_is_three_sequential_phases() {
        let dag = PipelineDAG::sales_pipeline().unwrap();
        let order = dag.execution_order();

        assert_eq!(order.len(), 3);
        assert_eq!(order[0], vec![StageId::Aggregate]);
        assert_eq!(order[1], vec![StageId::Rollup]);
        assert_eq!(order[2], vec![StageId::TopK]);
    }

    #[test]
    fn test_dag_missing_dependency() {
        let stages = vec![StageNode::new(
            StageId::Rollup,
            "Rollup",
            vec![StageId::Aggregate], // Aggregate not in stages
            1000,
        )];

        let result = PipelineDAG::new(stages);
        assert!(result.is_err());
    }

    #[test]
    fn test_dag_execution_plan_string() {
        let dag = PipelineDAG::sales_pipeline().unwrap();
        let plan = dag.execution_plan();

        assert!(plan.contains("Phase 1: Region/Model Aggregate"));
        assert!(plan.contains("Phase 2: Region Totals"));
        assert!(plan.contains("Phase 3: Top-K per Region"));
    }

    #[test]
    fn test_dag_required_keys() {
        let dag = PipelineDAG::sales_pipeline().unwrap();
        let keys = StageKeys::new("bmw".to_string(), "run1".to_string());

        // Aggregate has no dependencies
        assert!(dag.required_keys(StageId::Aggregate, &keys).is_empty());

        // Rollup depends on Aggregate
        let rollup_keys = dag.required_keys(StageId::Rollup, &keys);
        assert_eq!(rollup_keys, vec!["aggregate:bmw:run1".to_string()]);

        // TopK depends on both upstream outputs
        let topk_keys = dag.required_keys(StageId::TopK, &keys);
        assert_eq!(
            topk_keys,
            vec![
                "aggregate:bmw:run1".to_string(),
                "rollup:bmw:run1".to_string()
            ]
        );
    }
}
