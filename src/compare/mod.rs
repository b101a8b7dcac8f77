//! 比较评分模块：对聚合结果中的成功响应做两两相似度、完整度评分与排序，不修改聚合结果。
//!
//! # Comparison/Scoring Engine
//!
//! Post-processes an [`AggregateResult`] into pairwise similarity, a
//! completeness signal (response length relative to the longest response)
//! and a ranking. The aggregate is only read.
//!
//! Fewer than two successful responses yield
//! [`ComparisonReport::NotComparable`] instead of an error.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::compare::{ComparisonEngine, ComparisonReport};
//! use ai_lib_fanout::types::{AggregateResult, BackendResponse, BackendResult, SlotKey};
//! use std::time::Duration;
//!
//! let mut agg = AggregateResult::new("run", vec!["a".into(), "b".into()]);
//! for name in ["a", "b"] {
//!     let resp = BackendResponse::text("the cat sat on the mat");
//!     agg.record(BackendResult::success(SlotKey::new(name, 0), resp, Duration::from_millis(5), 1)).unwrap();
//! }
//! match ComparisonEngine::new().compare(&agg) {
//!     ComparisonReport::Compared(c) => assert_eq!(c.pairs[0].similarity, 1.0),
//!     ComparisonReport::NotComparable { .. } => unreachable!(),
//! }
//! ```

use crate::types::{AggregateResult, BackendResult, SlotKey};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Text similarity measure. Both map identical texts to 1.0 and texts with
/// disjoint vocabularies to 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Shared distinct words over all distinct words.
    #[default]
    Jaccard,
    /// Cosine of word-frequency vectors.
    Cosine,
}

/// Lowercased alphanumeric words.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa: HashSet<String> = words(a).collect();
    let sb: HashSet<String> = words(b).collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let shared = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    shared as f64 / union as f64
}

pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let mut ta: HashMap<String, f64> = HashMap::new();
    let mut tb: HashMap<String, f64> = HashMap::new();
    for w in words(a) {
        *ta.entry(w).or_default() += 1.0;
    }
    for w in words(b) {
        *tb.entry(w).or_default() += 1.0;
    }
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let dot: f64 = ta
        .iter()
        .filter_map(|(w, x)| tb.get(w).map(|y| x * y))
        .sum();
    let mag = |m: &HashMap<String, f64>| m.values().map(|x| x * x).sum::<f64>().sqrt();
    let (ma, mb) = (mag(&ta), mag(&tb));
    if ma == 0.0 || mb == 0.0 {
        return 0.0;
    }
    (dot / (ma * mb)).min(1.0)
}

impl SimilarityMetric {
    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self {
            SimilarityMetric::Jaccard => jaccard_similarity(a, b),
            SimilarityMetric::Cosine => cosine_similarity(a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseSimilarity {
    pub left: SlotKey,
    pub right: SlotKey,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResponse {
    /// 1-based.
    pub rank: usize,
    pub slot: SlotKey,
    /// Length relative to the longest successful response, in `[0, 1]`.
    pub completeness: f64,
    /// Mean similarity to every other successful response.
    pub agreement: f64,
    pub score: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub metric: SimilarityMetric,
    pub pairs: Vec<PairwiseSimilarity>,
    pub ranking: Vec<RankedResponse>,
    /// The response that agrees most with the rest.
    pub consensus: SlotKey,
    pub mean_similarity: f64,
}

impl Comparison {
    pub fn similarity(&self, a: &SlotKey, b: &SlotKey) -> Option<f64> {
        self.pairs
            .iter()
            .find(|p| (&p.left == a && &p.right == b) || (&p.left == b && &p.right == a))
            .map(|p| p.similarity)
    }

    pub fn winner(&self) -> Option<&RankedResponse> {
        self.ranking.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComparisonReport {
    NotComparable { successes: usize, reason: String },
    Compared(Comparison),
}

impl ComparisonReport {
    pub fn is_comparable(&self) -> bool {
        matches!(self, ComparisonReport::Compared(_))
    }

    pub fn comparison(&self) -> Option<&Comparison> {
        match self {
            ComparisonReport::Compared(c) => Some(c),
            ComparisonReport::NotComparable { .. } => None,
        }
    }
}

/// Scores successful responses of one run.
///
/// `score = agreement_weight * agreement + completeness_weight * completeness`,
/// ranked by score, then lower latency, then configuration order.
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    metric: SimilarityMetric,
    agreement_weight: f64,
    completeness_weight: f64,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Jaccard,
            agreement_weight: 0.5,
            completeness_weight: 0.5,
        }
    }
}

impl ComparisonEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Negative weights are treated as zero.
    pub fn with_weights(mut self, agreement: f64, completeness: f64) -> Self {
        self.agreement_weight = agreement.max(0.0);
        self.completeness_weight = completeness.max(0.0);
        self
    }

    pub fn compare(&self, aggregate: &AggregateResult) -> ComparisonReport {
        let ok: Vec<(&BackendResult, &str)> = aggregate
            .successes()
            .filter_map(|r| r.text().map(|t| (r, t)))
            .collect();
        if ok.len() < 2 {
            return ComparisonReport::NotComparable {
                successes: ok.len(),
                reason: format!("need at least 2 successful responses, got {}", ok.len()),
            };
        }

        let n = ok.len();
        let mut matrix = vec![vec![1.0f64; n]; n];
        let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                let s = self.metric.score(ok[i].1, ok[j].1);
                matrix[i][j] = s;
                matrix[j][i] = s;
                pairs.push(PairwiseSimilarity {
                    left: ok[i].0.key(),
                    right: ok[j].0.key(),
                    similarity: s,
                });
            }
        }

        let max_len = ok.iter().map(|(_, t)| t.chars().count()).max().unwrap_or(0);
        let mut ranking: Vec<(usize, RankedResponse)> = ok
            .iter()
            .enumerate()
            .map(|(i, (r, text))| {
                let agreement =
                    (0..n).filter(|&j| j != i).map(|j| matrix[i][j]).sum::<f64>() / (n - 1) as f64;
                let completeness = if max_len == 0 {
                    1.0
                } else {
                    text.chars().count() as f64 / max_len as f64
                };
                let score =
                    self.agreement_weight * agreement + self.completeness_weight * completeness;
                (
                    i,
                    RankedResponse {
                        rank: 0,
                        slot: r.key(),
                        completeness,
                        agreement,
                        score,
                        latency_ms: r.latency_ms,
                    },
                )
            })
            .collect();

        let consensus = ranking
            .iter()
            .max_by(|(ia, a), (ib, b)| {
                a.agreement
                    .partial_cmp(&b.agreement)
                    .unwrap_or(Ordering::Equal)
                    // earlier slot wins a tie
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(_, r)| r.slot.clone())
            .unwrap_or_else(|| ok[0].0.key());

        ranking.sort_by(|(ia, a), (ib, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.latency_ms.cmp(&b.latency_ms))
                .then_with(|| ia.cmp(ib))
        });
        let ranking: Vec<RankedResponse> = ranking
            .into_iter()
            .enumerate()
            .map(|(pos, (_, mut r))| {
                r.rank = pos + 1;
                r
            })
            .collect();

        let mean_similarity = pairs.iter().map(|p| p.similarity).sum::<f64>() / pairs.len() as f64;
        ComparisonReport::Compared(Comparison {
            metric: self.metric,
            pairs,
            ranking,
            consensus,
            mean_similarity,
        })
    }
}
