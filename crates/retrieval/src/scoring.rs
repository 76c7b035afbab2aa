//! Time-based and relation-based scoring utilities

use policy_engine_core::Metadata;

/// Per-relation-type score weights (capped, deduped)
pub const RELATION_WEIGHTS: &[(&str, f32)] = &[
    ("amends", 0.7),
    ("implements", 0.4),
    ("cites", 0.2),
    ("supersedes", -1.0),
    ("governed_by", 0.3),
];

/// Recency score with operational-validity penalties
///
/// Returns a value in [-1, 1]: fresh active docs land around 0.7-0.9, old
/// active ones around 0.2-0.4, superseded or expired ones go negative.
pub fn time_score(payload: &Metadata, now_ts: i64) -> f32 {
    let Some(issued_ts) = payload.get("date_issued_ts").and_then(|v| v.as_i64()) else {
        return 0.0;
    };

    let days_old = (((now_ts - issued_ts) as f64) / 86_400.0).max(1.0);
    let mut recency = (1.0 / (1.0 + days_old.log10())) as f32;

    if payload.get("is_superseded").and_then(|v| v.as_bool()).unwrap_or(false) {
        recency -= 0.9;
    }

    if let Some(effective_to) = payload.get("effective_to_ts").and_then(|v| v.as_i64()) {
        if effective_to < now_ts {
            recency -= 0.7;
        }
    }

    recency.clamp(-1.0, 1.0)
}

/// Relation bonus over a deduped set of relation types, capped to [-1, 0.9]
pub fn relation_bonus(relation_types: &[String]) -> f32 {
    let mut seen: Vec<&str> = Vec::new();
    let mut bonus = 0.0;

    for rel_type in relation_types {
        if seen.contains(&rel_type.as_str()) {
            continue;
        }
        seen.push(rel_type);
        if let Some((_, weight)) = RELATION_WEIGHTS.iter().find(|(t, _)| t == rel_type) {
            bonus += weight;
        }
    }

    bonus.clamp(-1.0, 0.9)
}

/// Multiplicative boost by section type (orders > content > annexure > preamble)
pub fn section_type_boost(section_type: Option<&str>) -> f32 {
    match section_type.map(|s| s.to_lowercase()).as_deref() {
        Some("orders") | Some("order") => 1.3,
        Some("content") => 1.2,
        Some("annexure") => 1.0,
        Some("preamble") => 0.85,
        Some("table") => 0.95,
        _ => 1.0,
    }
}
