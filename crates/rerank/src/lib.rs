//! Scoring and ranking of duplicate candidates.
//!
//! Combines exact-field matches and name similarity into a single
//! 0.0 - 1.0 match score per candidate, recording which fields contributed.

use runna_features::{days_between, names_equal, similarity};
use runna_model::{CandidateRecord, MatchField, MatchResult, PartialIdentity};
use std::collections::BTreeSet;

/// Weights and thresholds for the scorer.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Weight for an exact first-name match
    pub nombre_weight: f64,
    /// Weight for an exact surname match
    pub apellido_weight: f64,
    /// Weight for an exact birthdate match
    pub fecha_nacimiento_weight: f64,
    /// Partial credit for birthdates within `fecha_cercana_dias`
    pub fecha_cercana_weight: f64,
    pub fecha_cercana_dias: i64,
    pub genero_weight: f64,
    /// Maximum weight for a similar (not exact) first name
    pub nombre_similar_weight: f64,
    /// Maximum weight for a similar (not exact) surname
    pub apellido_similar_weight: f64,
    pub nombre_autopercibido_weight: f64,
    /// Similarity (0 - 100) below which names earn no credit.
    ///
    /// Departs from plain scaled credit (`weight * similarity / 100` for any
    /// similarity): unrelated names sharing a few letters would otherwise
    /// score above zero. Set to 0.0 for the unfloored rule.
    pub min_similarity: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            nombre_weight: 0.30,
            apellido_weight: 0.30,
            fecha_nacimiento_weight: 0.20,
            fecha_cercana_weight: 0.10,
            fecha_cercana_dias: 365,
            genero_weight: 0.10,
            nombre_similar_weight: 0.20,
            apellido_similar_weight: 0.20,
            nombre_autopercibido_weight: 0.05,
            min_similarity: 70.0,
        }
    }
}

/// A pluggable scoring strategy.
///
/// The backend is the source of truth in production; local strategies
/// mirror it for tests and offline evaluation.
pub trait ScoringStrategy: Send + Sync {
    fn score(&self, query: &PartialIdentity, candidate: &CandidateRecord) -> MatchResult;
}

/// The default weighted-sum scorer.
#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    pub config: ScoringConfig,
}

impl WeightedScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }
}

impl ScoringStrategy for WeightedScorer {
    fn score(&self, query: &PartialIdentity, candidate: &CandidateRecord) -> MatchResult {
        score(query, candidate, &self.config)
    }
}

/// Score one candidate against the query.
pub fn score(
    query: &PartialIdentity,
    candidate: &CandidateRecord,
    config: &ScoringConfig,
) -> MatchResult {
    let record = &candidate.identity;

    // DNI is authoritative
    if let (Some(q), Some(c)) = (query.dni, record.dni) {
        if q == c {
            return MatchResult::new(candidate.id, 1.0).with_fields([MatchField::Dni]);
        }
    }

    let mut fields = BTreeSet::new();
    let mut score = 0.0_f64;

    let names = [
        (
            MatchField::Nombre,
            query.nombre.as_str(),
            record.nombre.as_str(),
            config.nombre_weight,
            config.nombre_similar_weight,
        ),
        (
            MatchField::Apellido,
            query.apellido.as_str(),
            record.apellido.as_str(),
            config.apellido_weight,
            config.apellido_similar_weight,
        ),
    ];

    for (field, q, c, exact_weight, similar_weight) in names {
        let contribution = name_contribution(q, c, exact_weight, similar_weight, config.min_similarity);
        if contribution > 0.0 {
            fields.insert(field);
            score += contribution;
        }
    }

    if let (Some(q), Some(c)) = (query.fecha_nacimiento, record.fecha_nacimiento) {
        if q == c {
            fields.insert(MatchField::FechaNacimiento);
            score += config.fecha_nacimiento_weight;
        } else if days_between(q, c) <= config.fecha_cercana_dias {
            fields.insert(MatchField::FechaNacimiento);
            score += config.fecha_cercana_weight;
        }
    }

    if let (Some(q), Some(c)) = (query.genero, record.genero) {
        if q == c {
            fields.insert(MatchField::Genero);
            score += config.genero_weight;
        }
    }

    if let (Some(q), Some(c)) = (
        query.nombre_autopercibido.as_deref(),
        record.nombre_autopercibido.as_deref(),
    ) {
        if !q.trim().is_empty() && names_equal(q, c) {
            fields.insert(MatchField::NombreAutopercibido);
            score += config.nombre_autopercibido_weight;
        }
    }

    MatchResult {
        candidate_id: candidate.id,
        score: score.clamp(0.0, 1.0),
        matched_fields: fields,
        candidate: None,
    }
}

/// Credit for one name field: exact or similar, never both.
fn name_contribution(
    query: &str,
    candidate: &str,
    exact_weight: f64,
    similar_weight: f64,
    min_similarity: f64,
) -> f64 {
    // Blank on either side means the field is not comparable
    if query.trim().is_empty() || candidate.trim().is_empty() {
        return 0.0;
    }

    if names_equal(query, candidate) {
        return exact_weight;
    }

    let sim = similarity(query, candidate);
    if sim >= min_similarity {
        similar_weight * sim / 100.0
    } else {
        0.0
    }
}

/// Score all candidates with the given strategy and rank them.
///
/// Records are attached to their results; ties keep ascending id order.
pub fn rank_with(
    strategy: &dyn ScoringStrategy,
    query: &PartialIdentity,
    candidates: &[CandidateRecord],
) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = candidates
        .iter()
        .map(|candidate| {
            let mut result = strategy.score(query, candidate);
            result.candidate = Some(candidate.clone());
            result
        })
        .collect();

    sort_by_score(&mut results);

    tracing::debug!(candidates = candidates.len(), "Ranked duplicate candidates");

    results
}

/// Rank candidates with the default weighted scorer.
pub fn rank(
    query: &PartialIdentity,
    candidates: &[CandidateRecord],
    config: &ScoringConfig,
) -> Vec<MatchResult> {
    rank_with(&WeightedScorer::new(config.clone()), query, candidates)
}

/// Sort by score descending, then by candidate id.
pub fn sort_by_score(results: &mut [MatchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.candidate_id.cmp(&b.candidate_id))
    });
}
