//! Hybrid ranking for diary search.
//!
//! Each candidate gets three component scores in `[0, 1]`:
//!
//! - **relevance**: cosine similarity to the query embedding when both
//!   vectors exist with the same dimensions, otherwise the fraction of query
//!   terms found in the title, content or tags; 0 without a query
//! - **recency**: `0.5^(age_days / half_life_days)`
//! - **importance**: `importance / 10`
//!
//! The final score is their weighted sum.

use serde::{Deserialize, Serialize};

use quire_types::{Entry, MAX_IMPORTANCE, Timestamp};

use crate::repo::EntryFilter;

/// Weights for the three score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankWeights {
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            relevance: 1.0,
            recency: 0.1,
            importance: 0.1,
        }
    }
}

/// A ranked search request.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub filter: EntryFilter,
    /// Raw query text, used for lexical scoring.
    pub query: Option<String>,
    /// Query embedding, when the provider produced one.
    pub query_embedding: Option<Vec<f32>>,
    pub weights: RankWeights,
    pub recency_half_life_days: f64,
    pub limit: usize,
    pub offset: usize,
    /// Reference time for recency.
    pub now: Timestamp,
}

impl SearchParams {
    pub fn new(filter: EntryFilter) -> Self {
        Self {
            filter,
            query: None,
            query_embedding: None,
            weights: RankWeights::default(),
            recency_half_life_days: 30.0,
            limit: 10,
            offset: 0,
            now: quire_types::now(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_query_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.query_embedding = embedding;
        self
    }

    pub fn with_weights(mut self, weights: RankWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_half_life_days(mut self, days: f64) -> Self {
        self.recency_half_life_days = days;
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// An entry as fetched for ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: Entry,
    /// Cosine similarity to the query embedding, if comparable.
    pub similarity: Option<f64>,
}

/// A ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    pub entry: Entry,
    pub score: f64,
    pub relevance: f64,
    pub recency: f64,
    pub importance: f64,
}

/// Score, filter and page `candidates`.
///
/// Under lexical scoring an entry that matches no query term is dropped;
/// without any query every candidate is kept.
pub fn rank(candidates: Vec<Candidate>, params: &SearchParams) -> Vec<ScoredEntry> {
    let terms = params.query.as_deref().map(query_terms).unwrap_or_default();
    let has_query = !terms.is_empty();

    let mut scored: Vec<ScoredEntry> = candidates
        .into_iter()
        .filter_map(|c| {
            let relevance = match c.similarity {
                Some(similarity) if has_query => similarity.clamp(0.0, 1.0),
                _ if has_query => {
                    let lexical = lexical_score(&c.entry, &terms);
                    if lexical == 0.0 {
                        return None;
                    }
                    lexical
                }
                _ => 0.0,
            };
            let recency =
                recency_score(&c.entry.created_at, &params.now, params.recency_half_life_days);
            let importance = importance_score(c.entry.importance);
            let score = params.weights.relevance * relevance
                + params.weights.recency * recency
                + params.weights.importance * importance;
            Some(ScoredEntry {
                entry: c.entry,
                score,
                relevance,
                recency,
                importance,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
    });

    scored
        .into_iter()
        .skip(params.offset)
        .take(params.limit)
        .collect()
}

/// Lowercased, de-duplicated whitespace-separated terms.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query.split_whitespace().map(str::to_lowercase) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Fraction of `terms` present in the entry's title, content or tags.
pub fn lexical_score(entry: &Entry, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {}",
        entry.title.as_deref().unwrap_or_default(),
        entry.content,
        entry.tags.join(" ")
    )
    .to_lowercase();
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

/// Exponential decay with the given half-life. Future timestamps score 1.
pub fn recency_score(created_at: &Timestamp, now: &Timestamp, half_life_days: f64) -> f64 {
    let age_days = (*now - *created_at).num_seconds().max(0) as f64 / 86_400.0;
    0.5_f64.powf(age_days / half_life_days)
}

pub fn importance_score(importance: u8) -> f64 {
    f64::from(importance.min(MAX_IMPORTANCE)) / f64::from(MAX_IMPORTANCE)
}
