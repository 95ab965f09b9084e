use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::search::{CodeElement, SearchResult};

/// Weights for linear score fusion plus the filename boost factor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    pub vector: f32,
    pub text: f32,
    pub filename_boost: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        // Vector similarity dominates; the lexical signal complements it and
        // a filename token hit multiplies the fused score.
        Self {
            vector: 0.7,
            text: 0.3,
            filename_boost: 1.3,
        }
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// True when any whitespace-separated query token appears in the filename,
/// case-insensitively.
pub fn filename_matches(query: &str, filename: &str) -> bool {
    let filename = filename.to_lowercase();
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .any(|token| !token.is_empty() && filename.contains(&token))
}

/// A retrieval hit before fusion, keyed by `(file_id, chunk_index)`. Summary
/// and lexical file hits use `chunk_index = None`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub file_id: String,
    pub chunk_index: Option<u32>,
    pub path: String,
    pub filename: String,
    pub language: Option<String>,
    pub summary: Option<String>,
    pub vector_score: Option<f32>,
    pub text_score: Option<f32>,
    pub element: Option<CodeElement>,
}

/// Accumulates hits from the vector and lexical passes, merging subscores
/// for candidates that appear in more than one.
#[derive(Debug, Default)]
pub struct CandidateSet {
    candidates: HashMap<(String, Option<u32>), Candidate>,
}

impl CandidateSet {
    pub fn merge(&mut self, incoming: Candidate) {
        let key = (incoming.file_id.clone(), incoming.chunk_index);
        self.candidates
            .entry(key)
            .and_modify(|existing| {
                if let Some(score) = incoming.vector_score {
                    existing.vector_score =
                        Some(existing.vector_score.map_or(score, |s| s.max(score)));
                }
                if let Some(score) = incoming.text_score {
                    existing.text_score =
                        Some(existing.text_score.map_or(score, |s| s.max(score)));
                }
                if existing.summary.is_none() {
                    existing.summary.clone_from(&incoming.summary);
                }
                if existing.language.is_none() {
                    existing.language.clone_from(&incoming.language);
                }
                if existing.element.is_none() {
                    existing.element.clone_from(&incoming.element);
                }
            })
            .or_insert(incoming);
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Fuse, deduplicate by file and rank.
    ///
    /// Each candidate scores `filename_boost · (w_v·vector + w_t·text)`.
    /// Candidates sharing a file collapse into one result carrying the
    /// file-level summary (when a summary hit survived), the chunk hits as
    /// `code_elements` (deduplicated by chunk index), and the group's
    /// maximum score. Equal scores order by smaller `file_id`.
    pub fn into_ranked(self, query: &str, weights: HybridWeights, top_k: usize) -> Vec<SearchResult> {
        let mut groups: HashMap<String, SearchResult> = HashMap::new();
        let mut seen_chunks: HashMap<String, Vec<u32>> = HashMap::new();

        for candidate in self.candidates.into_values() {
            let vector = candidate.vector_score.unwrap_or(0.0);
            let text = candidate.text_score.unwrap_or(0.0);
            let boost = if filename_matches(query, &candidate.filename) {
                weights.filename_boost
            } else {
                1.0
            };
            let score = boost * vector.mul_add(weights.vector, text * weights.text);

            let entry = groups
                .entry(candidate.file_id.clone())
                .or_insert_with(|| SearchResult {
                    file_id: candidate.file_id.clone(),
                    path: candidate.path.clone(),
                    language: candidate.language.clone(),
                    summary: None,
                    code_elements: Vec::new(),
                    score: 0.0,
                });

            entry.score = entry.score.max(score);
            if entry.language.is_none() {
                entry.language = candidate.language;
            }
            if candidate.chunk_index.is_none() && entry.summary.is_none() {
                entry.summary = candidate.summary;
            }

            if let (Some(index), Some(element)) = (candidate.chunk_index, candidate.element) {
                let seen = seen_chunks.entry(candidate.file_id).or_default();
                if !seen.contains(&index) {
                    seen.push(index);
                    entry.code_elements.push(element);
                }
            }
        }

        let mut results: Vec<SearchResult> = groups.into_values().collect();
        for result in &mut results {
            result
                .code_elements
                .sort_by_key(|element| element.line_start);
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        results.truncate(top_k);
        results
    }
}

pub fn filename_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
