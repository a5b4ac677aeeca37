//! Search aggregation across strategies and datasets.
//!
//! Single-strategy searches go straight to the upstream `retrieve`
//! endpoint. Hybrid search and multi-dataset search are fan-out/fan-in
//! operations assembled here:
//!
//! ```text
//!   hybrid:   semantic ─┐
//!                       ├─ union by segment ─ weighted score ─ rank ─ top_k
//!             keyword ──┘
//!
//!   multi:    ds1 ─┐
//!             ds2 ─┼─ dedup (max score) ─ rank ─ threshold ─ top_k
//!             ds3 ─┘
//! ```
//!
//! # Ranking
//!
//! Results are ordered by descending score. Ties are broken by ascending
//! dataset id, then document id, then segment id, so identical inputs
//! always produce identical output order.
//!
//! # Partial failure
//!
//! A multi-dataset search fails only if every dataset fails (the first
//! listed dataset's error is returned). If some datasets fail, the merged
//! results of the rest are returned inside a `PartialFailure` error whose
//! details attribute each dataset's outcome.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::client::{KnowledgeApi, Operation};
use crate::config::SearchConfig;
use crate::error::{ApiError, ApiResult, ErrorKind};
use crate::models::{clamp_score, SearchResult, SearchStrategy};

/// Relative contribution of the semantic and keyword legs of a hybrid search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub semantic: f64,
    pub keyword: f64,
}

impl HybridWeights {
    pub fn new(semantic: f64, keyword: f64) -> ApiResult<Self> {
        for (name, w) in [("semantic_weight", semantic), ("keyword_weight", keyword)] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ApiError::invalid(format!(
                    "{} must be in [0, 1], got {}",
                    name, w
                )));
            }
        }
        if semantic + keyword <= 0.0 {
            return Err(ApiError::invalid("hybrid weights must not both be zero"));
        }
        Ok(Self { semantic, keyword })
    }
}

/// A search request after parameter validation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub dataset_ids: Vec<String>,
    pub strategy: SearchStrategy,
    pub top_k: usize,
    pub score_threshold: Option<f64>,
    /// Overrides the configured hybrid weights.
    pub weights: Option<HybridWeights>,
}

/// Outcome of one dataset leg of a multi-dataset search.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatasetStatus {
    pub dataset_id: String,
    pub success: bool,
    pub result_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LegError>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LegError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Merged results of a multi-dataset search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub datasets: Vec<DatasetStatus>,
}

/// Runs searches against the upstream and merges their results.
#[derive(Clone)]
pub struct SearchAggregator {
    api: Arc<dyn KnowledgeApi>,
    weights: HybridWeights,
    max_top_k: usize,
}

impl SearchAggregator {
    pub fn new(api: Arc<dyn KnowledgeApi>, config: &SearchConfig) -> Self {
        Self {
            api,
            weights: HybridWeights {
                semantic: config.semantic_weight,
                keyword: config.keyword_weight,
            },
            max_top_k: config.max_top_k,
        }
    }

    pub fn default_weights(&self) -> HybridWeights {
        self.weights
    }

    fn check(&self, query: &str, top_k: usize) -> ApiResult<()> {
        if query.trim().is_empty() {
            return Err(ApiError::invalid("query must not be empty"));
        }
        if top_k == 0 || top_k > self.max_top_k {
            return Err(ApiError::invalid(format!(
                "top_k must be in [1, {}], got {}",
                self.max_top_k, top_k
            )));
        }
        Ok(())
    }

    /// Searches one dataset with one strategy. Hybrid fans out into a
    /// semantic and a keyword leg.
    ///
    /// The score threshold applies to the combined hybrid score, so the legs
    /// are fetched unfiltered and the threshold is only enforced after the
    /// merge.
    pub async fn search(&self, dataset_id: &str, req: &SearchRequest) -> ApiResult<Vec<SearchResult>> {
        self.check(&req.query, req.top_k)?;
        let results = match req.strategy {
            SearchStrategy::Hybrid => {
                let weights = req.weights.unwrap_or(self.weights);
                let (semantic, keyword) = tokio::try_join!(
                    self.retrieve(dataset_id, SearchStrategy::Semantic, req, None),
                    self.retrieve(dataset_id, SearchStrategy::Keyword, req, None),
                )?;
                merge_hybrid(semantic, keyword, weights)
            }
            strategy => {
                self.retrieve(dataset_id, strategy, req, req.score_threshold)
                    .await?
            }
        };
        Ok(finalize(results, req.score_threshold, req.top_k))
    }

    /// Runs `req.strategy` against every dataset in `req.dataset_ids`
    /// concurrently and merges the survivors.
    pub async fn multi_dataset(&self, req: &SearchRequest) -> ApiResult<SearchOutcome> {
        self.check(&req.query, req.top_k)?;

        let mut seen = HashSet::new();
        let dataset_ids: Vec<&str> = req
            .dataset_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| seen.insert(*id))
            .collect();
        if dataset_ids.is_empty() {
            return Err(ApiError::invalid("dataset_ids must not be empty"));
        }
        if let Some(blank) = dataset_ids.iter().find(|id| id.is_empty()) {
            return Err(ApiError::invalid(format!("invalid dataset id '{}'", blank)));
        }

        let legs = join_all(dataset_ids.iter().map(|id| self.search(id, req))).await;

        let mut merged = Vec::new();
        let mut statuses = Vec::with_capacity(legs.len());
        let mut first_error: Option<ApiError> = None;
        for (dataset_id, leg) in dataset_ids.iter().zip(legs) {
            match leg {
                Ok(results) => {
                    statuses.push(DatasetStatus {
                        dataset_id: dataset_id.to_string(),
                        success: true,
                        result_count: results.len(),
                        error: None,
                    });
                    merged.extend(results);
                }
                Err(e) => {
                    tracing::warn!(dataset_id, error = %e, "dataset search failed");
                    statuses.push(DatasetStatus {
                        dataset_id: dataset_id.to_string(),
                        success: false,
                        result_count: 0,
                        error: Some(LegError {
                            kind: e.kind(),
                            message: e.to_string(),
                        }),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        let failed = statuses.iter().filter(|s| !s.success).count();
        if failed == statuses.len() {
            return Err(first_error
                .unwrap_or_else(|| ApiError::Transient("all dataset searches failed".into())));
        }

        let outcome = SearchOutcome {
            results: finalize(dedup(merged), req.score_threshold, req.top_k),
            datasets: statuses,
        };

        if failed > 0 {
            return Err(ApiError::PartialFailure {
                message: format!("{} of {} datasets failed", failed, outcome.datasets.len()),
                details: serde_json::to_value(&outcome).unwrap_or(Value::Null),
            });
        }
        Ok(outcome)
    }

    async fn retrieve(
        &self,
        dataset_id: &str,
        strategy: SearchStrategy,
        req: &SearchRequest,
        threshold: Option<f64>,
    ) -> ApiResult<Vec<SearchResult>> {
        let mut params = json!({
            "dataset_id": dataset_id,
            "query": req.query,
            "top_k": req.top_k,
        });
        if let Some(t) = threshold {
            params["score_threshold"] = json!(t);
        }
        let payload = self
            .api
            .call(Operation::for_strategy(strategy), params)
            .await?;
        SearchResult::from_retrieve(&payload, dataset_id, strategy)
    }
}

/// Unions the two legs by segment id; a missing leg contributes zero.
fn merge_hybrid(
    semantic: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    weights: HybridWeights,
) -> Vec<SearchResult> {
    let sem_map = best_scores(&semantic);
    let kw_map = best_scores(&keyword);

    let mut all: HashMap<String, &SearchResult> = HashMap::new();
    for r in semantic.iter().chain(keyword.iter()) {
        all.entry(r.segment_id.clone()).or_insert(r);
    }

    all.into_iter()
        .map(|(segment_id, template)| {
            let s = sem_map.get(segment_id.as_str()).copied().unwrap_or(0.0);
            let k = kw_map.get(segment_id.as_str()).copied().unwrap_or(0.0);
            SearchResult {
                score: clamp_score(weights.semantic * s + weights.keyword * k),
                strategy: SearchStrategy::Hybrid,
                ..template.clone()
            }
        })
        .collect()
}

/// Highest score per segment id within one leg.
fn best_scores(results: &[SearchResult]) -> HashMap<&str, f64> {
    let mut best: HashMap<&str, f64> = HashMap::with_capacity(results.len());
    for r in results {
        best.entry(r.segment_id.as_str())
            .and_modify(|s| *s = s.max(r.score))
            .or_insert(r.score);
    }
    best
}

/// Collapses results sharing a segment id, keeping the highest score.
pub fn dedup(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    for r in results {
        let replace = best
            .get(&r.segment_id)
            .map_or(true, |existing| rank_order(existing, &r) == Ordering::Greater);
        if replace {
            best.insert(r.segment_id.clone(), r);
        }
    }
    best.into_values().collect()
}

/// Total order used for ranking: score descending, then ids ascending.
pub fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.dataset_id.cmp(&b.dataset_id))
        .then_with(|| a.document_id.cmp(&b.document_id))
        .then_with(|| a.segment_id.cmp(&b.segment_id))
}

fn finalize(mut results: Vec<SearchResult>, threshold: Option<f64>, top_k: usize) -> Vec<SearchResult> {
    if let Some(t) = threshold {
        results.retain(|r| r.score >= t);
    }
    results.sort_by(rank_order);
    results.truncate(top_k);
    results
}
