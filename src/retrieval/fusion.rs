//! Score fusion across backend result lists (§4.7).

use std::collections::HashMap;

use super::types::{BackendKind, BackendWeights, FusedResult, FusionStrategy, ScoreDiagnostics, SearchResult};

/// Default RRF constant `k` (§4.7).
const RRF_K: f64 = 60.0;

struct Ranked<'a> {
    result: &'a SearchResult,
    rank: usize,
}

fn rank_per_backend(results: &[SearchResult]) -> HashMap<BackendKind, Vec<Ranked<'_>>> {
    let mut grouped: HashMap<BackendKind, Vec<&SearchResult>> = HashMap::new();
    for result in results {
        grouped.entry(result.backend).or_default().push(result);
    }
    let mut ranked = HashMap::new();
    for (backend, mut docs) in grouped {
        docs.sort_by(|a, b| b.raw_score.partial_cmp(&a.raw_score).unwrap_or(std::cmp::Ordering::Equal));
        let entries = docs
            .into_iter()
            .enumerate()
            .map(|(idx, result)| Ranked { result, rank: idx + 1 })
            .collect();
        ranked.insert(backend, entries);
    }
    ranked
}

fn min_max_normalize(scores: &[(String, f64)]) -> HashMap<String, f64> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    scores
        .iter()
        .map(|(id, s)| {
            let normalized = if span.abs() < f64::EPSILON { 1.0 } else { (s - min) / span };
            (id.clone(), normalized)
        })
        .collect()
}

/// Fuses `results` (possibly from several backends) into one ranked,
/// deduplicated list, per the strategy-specific formula in §4.7.
///
/// Dedup key is document id; ties are broken by the highest raw
/// per-backend score, then by id, for reproducibility.
pub fn fuse(results: &[SearchResult], weights: &BackendWeights, strategy: FusionStrategy) -> Vec<FusedResult> {
    if results.is_empty() {
        return Vec::new();
    }

    let by_backend = rank_per_backend(results);
    let mut per_doc: HashMap<String, (f64, Vec<BackendKind>, ScoreDiagnostics, f64)> = HashMap::new();

    match strategy {
        FusionStrategy::ReciprocalRankFusion => {
            for (backend, ranked) in &by_backend {
                let weight = weights.get(*backend);
                for entry in ranked {
                    let contribution = weight * (1.0 / (RRF_K + entry.rank as f64));
                    accumulate(&mut per_doc, entry.result, *backend, contribution);
                }
            }
        }
        FusionStrategy::WeightedSum => {
            for (backend, docs) in group_raw_scores(results) {
                let normalized = min_max_normalize(&docs);
                let weight = weights.get(backend);
                for result in results.iter().filter(|r| r.backend == backend) {
                    let norm = normalized.get(&result.document_id).copied().unwrap_or(0.0);
                    accumulate(&mut per_doc, result, backend, weight * norm);
                    if let Some(entry) = per_doc.get_mut(&result.document_id) {
                        entry.2.normalized_scores.insert(backend.to_string(), norm);
                    }
                }
            }
        }
        FusionStrategy::BordaCount => {
            for (backend, ranked) in &by_backend {
                let n = ranked.len();
                let weight = weights.get(*backend);
                for entry in ranked {
                    let points = (n - entry.rank) as f64;
                    accumulate(&mut per_doc, entry.result, *backend, weight * points);
                }
            }
        }
    }

    let mut entries: Vec<(String, f64, Vec<BackendKind>, ScoreDiagnostics, f64)> = per_doc
        .into_iter()
        .map(|(document_id, (score, backends, diagnostics, best_raw))| {
            (document_id, score, backends, diagnostics, best_raw)
        })
        .collect();

    // Dedup key is document id; ties broken by highest per-backend raw
    // score, then by id (§4.7).
    entries.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.4.partial_cmp(&a.4).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.0.cmp(&b.0))
    });

    entries
        .into_iter()
        .map(|(document_id, score, backends, diagnostics, _best_raw)| FusedResult {
            title: backends_title(results, &backends).unwrap_or_default(),
            snippet: backends_snippet(results, &backends).unwrap_or_default(),
            document_id,
            fused_score: score,
            contributing_backends: backends,
            diagnostics,
        })
        .collect()
}

fn accumulate(
    per_doc: &mut HashMap<String, (f64, Vec<BackendKind>, ScoreDiagnostics, f64)>,
    result: &SearchResult,
    backend: BackendKind,
    contribution: f64,
) {
    let entry = per_doc
        .entry(result.document_id.clone())
        .or_insert_with(|| (0.0, Vec::new(), ScoreDiagnostics::default(), f64::NEG_INFINITY));
    entry.0 += contribution;
    if !entry.1.contains(&backend) {
        entry.1.push(backend);
    }
    entry
        .2
        .raw_scores
        .insert(backend.to_string(), result.raw_score);
    if result.raw_score > entry.3 {
        entry.3 = result.raw_score;
    }
}

fn group_raw_scores(results: &[SearchResult]) -> HashMap<BackendKind, Vec<(String, f64)>> {
    let mut grouped: HashMap<BackendKind, Vec<(String, f64)>> = HashMap::new();
    for result in results {
        grouped
            .entry(result.backend)
            .or_default()
            .push((result.document_id.clone(), result.raw_score));
    }
    grouped
}

fn backends_title(results: &[SearchResult], backends: &[BackendKind]) -> Option<String> {
    results
        .iter()
        .find(|r| backends.contains(&r.backend))
        .map(|r| r.title.clone())
}

fn backends_snippet(results: &[SearchResult], backends: &[BackendKind]) -> Option<String> {
    results
        .iter()
        .find(|r| backends.contains(&r.backend))
        .map(|r| r.snippet.clone())
}
