//! Candidate ordering for handoffs.

use std::cmp::Ordering;

use crate::models::agent::Agent;

/// Order candidates for `service_type`, best first.
///
/// Keys: skill proficiency descending, workload ratio ascending, average
/// satisfaction descending. The sort is stable, so equal candidates keep
/// roster order.
#[must_use]
pub fn rank_candidates(mut candidates: Vec<Agent>, service_type: &str) -> Vec<Agent> {
    candidates.sort_by(|a, b| compare(a, b, service_type));
    candidates
}

fn compare(a: &Agent, b: &Agent, service_type: &str) -> Ordering {
    b.skill_match(service_type)
        .cmp(&a.skill_match(service_type))
        .then_with(|| a.workload_ratio().total_cmp(&b.workload_ratio()))
        .then_with(|| b.avg_satisfaction.total_cmp(&a.avg_satisfaction))
}
