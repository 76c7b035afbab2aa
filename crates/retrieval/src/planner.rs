//! Retrieval plan building
//!
//! Derives an adaptive plan from mode baselines, then adjusts for scope and
//! vertical count, and finally applies caller overrides. QA mode is forced to
//! a single rewrite and a single hop.

use policy_engine_core::{CustomPlan, Mode, PlanMode, QueryScope, QueryType, RetrievalPlan};

/// Baseline plan values per mode
struct ModeBaseline {
    num_rewrites: usize,
    num_hops: u8,
    top_k_per_vertical: usize,
    top_k_total: usize,
    rerank_top_k: usize,
    diversity_weight: f32,
}

fn baseline(mode: PlanMode) -> ModeBaseline {
    match mode {
        PlanMode::Qa => ModeBaseline {
            num_rewrites: 2,
            num_hops: 1,
            top_k_per_vertical: 20,
            top_k_total: 40,
            rerank_top_k: 10,
            diversity_weight: 0.2,
        },
        PlanMode::Policy => ModeBaseline {
            num_rewrites: 3,
            num_hops: 2,
            top_k_per_vertical: 30,
            top_k_total: 60,
            rerank_top_k: 15,
            diversity_weight: 0.4,
        },
        PlanMode::Framework => ModeBaseline {
            num_rewrites: 5,
            num_hops: 2,
            top_k_per_vertical: 40,
            top_k_total: 100,
            rerank_top_k: 20,
            diversity_weight: 0.5,
        },
        PlanMode::DeepThink => ModeBaseline {
            num_rewrites: 5,
            num_hops: 2,
            top_k_per_vertical: 50,
            top_k_total: 120,
            rerank_top_k: 25,
            diversity_weight: 0.6,
        },
        PlanMode::Compliance => ModeBaseline {
            num_rewrites: 2,
            num_hops: 1,
            top_k_per_vertical: 15,
            top_k_total: 30,
            rerank_top_k: 10,
            diversity_weight: 0.1,
        },
        PlanMode::Brainstorm => ModeBaseline {
            num_rewrites: 5,
            num_hops: 2,
            top_k_per_vertical: 40,
            top_k_total: 100,
            rerank_top_k: 20,
            diversity_weight: 0.7,
        },
        // Fast-path plans are synthesized directly by the clause handler
        PlanMode::FastClauseLookup => ModeBaseline {
            num_rewrites: 1,
            num_hops: 1,
            top_k_per_vertical: 10,
            top_k_total: 10,
            rerank_top_k: 10,
            diversity_weight: 0.0,
        },
    }
}

fn map_type_to_mode(query_type: QueryType) -> PlanMode {
    match query_type {
        QueryType::Qa | QueryType::List | QueryType::Hr => PlanMode::Qa,
        QueryType::Policy | QueryType::Comparison | QueryType::History => PlanMode::Policy,
        QueryType::Framework => PlanMode::Framework,
        QueryType::Compliance => PlanMode::Compliance,
        QueryType::Brainstorm => PlanMode::Brainstorm,
    }
}

/// Retrieval plan builder
#[derive(Debug, Default)]
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a plan from query characteristics and caller overrides
    pub fn build(
        &self,
        query_type: QueryType,
        scope: QueryScope,
        needs_internet: bool,
        num_verticals: usize,
        request_mode: Mode,
        custom: Option<&CustomPlan>,
        top_k_override: Option<usize>,
    ) -> RetrievalPlan {
        // Deep request modes lift the plan regardless of classified type
        let plan_mode = match request_mode {
            Mode::DeepThink | Mode::PolicyBrief | Mode::PolicyDraft => {
                if query_type == QueryType::Framework {
                    PlanMode::Framework
                } else if query_type == QueryType::Brainstorm {
                    PlanMode::Brainstorm
                } else {
                    PlanMode::DeepThink
                }
            }
            Mode::Brainstorm => PlanMode::Brainstorm,
            Mode::Qa => map_type_to_mode(query_type),
        };

        let base = baseline(plan_mode);
        let mut num_rewrites = base.num_rewrites;
        let mut num_hops = base.num_hops;
        let mut top_k_per_vertical = base.top_k_per_vertical;
        let mut top_k_total = base.top_k_total;
        let mut rerank_top_k = base.rerank_top_k;
        let mut diversity_weight = base.diversity_weight;

        // Scope adjustment
        match scope {
            QueryScope::Narrow => {
                num_rewrites = num_rewrites.saturating_sub(1).max(1);
                top_k_per_vertical = scale(top_k_per_vertical, 0.7);
                top_k_total = scale(top_k_total, 0.7);
                diversity_weight *= 0.5;
            }
            QueryScope::Broad => {
                num_rewrites = (num_rewrites + 1).min(5);
                top_k_per_vertical = scale(top_k_per_vertical, 1.3);
                top_k_total = scale(top_k_total, 1.3);
                diversity_weight = (diversity_weight * 1.3).min(0.9);
            }
            QueryScope::Medium => {}
        }

        // Vertical-count adjustment
        if num_verticals == 1 {
            top_k_per_vertical = scale(top_k_per_vertical, 1.5);
        } else if num_verticals >= 4 {
            top_k_per_vertical = scale(top_k_per_vertical, 0.8);
            top_k_total = scale(top_k_total, 1.2);
        }

        let mut use_internet = needs_internet;
        let mut use_hybrid = true;

        // Caller overrides replace exactly the overridden fields
        if let Some(custom) = custom {
            if let Some(v) = custom.num_rewrites {
                num_rewrites = v;
            }
            if let Some(v) = custom.num_hops {
                num_hops = v;
            }
            if let Some(v) = custom.top_k_per_vertical {
                top_k_per_vertical = v;
            }
            if let Some(v) = custom.top_k_total {
                top_k_total = v;
            }
            if let Some(v) = custom.rerank_top_k {
                rerank_top_k = v;
            }
            if let Some(v) = custom.diversity_weight {
                diversity_weight = v;
            }
            if let Some(v) = custom.use_hybrid {
                use_hybrid = v;
            }
            if let Some(v) = custom.internet_enabled {
                use_internet = v;
            }
        }

        if let Some(top_k) = top_k_override {
            top_k_total = top_k;
        }

        // QA requests stay lightweight regardless of classified type
        if request_mode == Mode::Qa {
            num_rewrites = 1;
            num_hops = 1;
        }

        RetrievalPlan {
            num_rewrites,
            num_hops,
            top_k_per_vertical,
            top_k_total,
            use_internet,
            use_hybrid,
            rerank_top_k,
            diversity_weight,
            mode: plan_mode,
        }
    }
}

fn scale(value: usize, factor: f32) -> usize {
    ((value as f32) * factor) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(
        query_type: QueryType,
        scope: QueryScope,
        num_verticals: usize,
        mode: Mode,
    ) -> RetrievalPlan {
        PlanBuilder::new().build(query_type, scope, false, num_verticals, mode, None, None)
    }

    #[test]
    fn test_qa_mode_is_lightweight() {
        let plan = build(QueryType::Qa, QueryScope::Narrow, 2, Mode::Qa);
        assert_eq!(plan.num_rewrites, 1);
        assert_eq!(plan.num_hops, 1);
        assert_eq!(plan.mode, PlanMode::Qa);
    }

    #[test]
    fn test_narrow_scope_scales_down() {
        let plan = build(QueryType::Policy, QueryScope::Narrow, 2, Mode::DeepThink);
        let base = build(QueryType::Policy, QueryScope::Medium, 2, Mode::DeepThink);
        assert!(plan.top_k_total < base.top_k_total);
        assert!(plan.diversity_weight < base.diversity_weight);
    }

    #[test]
    fn test_broad_scope_scales_up() {
        let plan = build(QueryType::Framework, QueryScope::Broad, 5, Mode::DeepThink);
        assert!(plan.num_rewrites >= 3);
        assert_eq!(plan.num_hops, 2);
        assert!(plan.diversity_weight <= 0.9);
        // >= 4 verticals grow the total budget
        assert!(plan.top_k_total > 100);
    }

    #[test]
    fn test_single_vertical_boosts_per_vertical() {
        let single = build(QueryType::Qa, QueryScope::Medium, 1, Mode::DeepThink);
        let multi = build(QueryType::Qa, QueryScope::Medium, 2, Mode::DeepThink);
        assert!(single.top_k_per_vertical > multi.top_k_per_vertical);
    }

    #[test]
    fn test_custom_plan_replaces_only_overridden_fields() {
        let custom = CustomPlan {
            rerank_top_k: Some(7),
            diversity_weight: Some(0.33),
            ..Default::default()
        };
        let with = PlanBuilder::new().build(
            QueryType::Policy,
            QueryScope::Medium,
            false,
            2,
            Mode::DeepThink,
            Some(&custom),
            None,
        );
        let without = build(QueryType::Policy, QueryScope::Medium, 2, Mode::DeepThink);

        assert_eq!(with.rerank_top_k, 7);
        assert!((with.diversity_weight - 0.33).abs() < 1e-6);
        assert_eq!(with.num_rewrites, without.num_rewrites);
        assert_eq!(with.top_k_total, without.top_k_total);
        assert_eq!(with.num_hops, without.num_hops);
    }

    #[test]
    fn test_top_k_override() {
        let plan = PlanBuilder::new().build(
            QueryType::Qa,
            QueryScope::Medium,
            false,
            2,
            Mode::Qa,
            None,
            Some(5),
        );
        assert_eq!(plan.top_k_total, 5);
    }

    #[test]
    fn test_internet_flag_flows_from_interpretation() {
        let plan = PlanBuilder::new().build(
            QueryType::Qa,
            QueryScope::Medium,
            true,
            2,
            Mode::Qa,
            None,
            None,
        );
        assert!(plan.use_internet);
    }

    #[test]
    fn test_compliance_high_precision() {
        let plan = build(QueryType::Compliance, QueryScope::Medium, 2, Mode::Qa);
        assert_eq!(plan.mode, PlanMode::Compliance);
        assert!(plan.diversity_weight <= 0.1 + 1e-6);
    }
}
