//! Typed views of the upstream knowledge-base entities.
//!
//! The upstream service owns all durable state; these types exist only for
//! the lifetime of a single request. They are deliberately lenient on input
//! (`#[serde(default)]` on everything optional) because the upstream adds
//! fields between releases, and strict on the invariants this server relies
//! on: every [`Document`] carries its dataset id, every [`Segment`] its
//! document id, and every [`SearchResult`] all three.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

/// A knowledge-base container holding documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub indexing_technique: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Processing state of a document in the upstream indexing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingStatus {
    Queued,
    Indexing,
    Completed,
    Error,
}

impl IndexingStatus {
    /// Collapses the upstream's fine-grained pipeline states.
    pub fn from_upstream(raw: &str) -> Self {
        match raw {
            "completed" | "available" => IndexingStatus::Completed,
            "error" => IndexingStatus::Error,
            "parsing" | "cleaning" | "splitting" | "indexing" => IndexingStatus::Indexing,
            // "waiting", "paused" and anything unrecognized
            _ => IndexingStatus::Queued,
        }
    }
}

impl<'de> Deserialize<'de> for IndexingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(IndexingStatus::from_upstream(&raw))
    }
}

fn default_status() -> IndexingStatus {
    IndexingStatus::Queued
}

/// A unit of ingested content within a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    /// Filled from the request path; the upstream omits it.
    #[serde(default)]
    pub dataset_id: String,
    pub name: String,
    /// `upload_file` for file uploads, `upload_text`/absent for raw text.
    #[serde(default, rename = "data_source_type")]
    pub source: Option<String>,
    #[serde(default = "default_status", rename = "indexing_status")]
    pub status: IndexingStatus,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A chunk of a document; the smallest unit returned by search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: String,
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub position: u64,
}

fn default_true() -> bool {
    true
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
}

/// Search algorithm applied to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    Semantic,
    Keyword,
    Hybrid,
    Fulltext,
}

impl SearchStrategy {
    pub const ALL: [SearchStrategy; 4] = [
        SearchStrategy::Semantic,
        SearchStrategy::Keyword,
        SearchStrategy::Hybrid,
        SearchStrategy::Fulltext,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SearchStrategy::Semantic => "semantic",
            SearchStrategy::Keyword => "keyword",
            SearchStrategy::Hybrid => "hybrid",
            SearchStrategy::Fulltext => "fulltext",
        }
    }

    /// The `retrieval_model.search_method` value the upstream expects.
    pub fn upstream_method(self) -> &'static str {
        match self {
            SearchStrategy::Semantic => "semantic_search",
            SearchStrategy::Keyword => "keyword_search",
            SearchStrategy::Hybrid => "hybrid_search",
            SearchStrategy::Fulltext => "full_text_search",
        }
    }

    pub fn parse(raw: &str) -> ApiResult<Self> {
        match raw {
            "semantic" | "semantic_search" => Ok(SearchStrategy::Semantic),
            "keyword" | "keyword_search" => Ok(SearchStrategy::Keyword),
            "hybrid" | "hybrid_search" => Ok(SearchStrategy::Hybrid),
            "fulltext" | "full_text" | "full_text_search" => Ok(SearchStrategy::Fulltext),
            other => Err(ApiError::invalid(format!(
                "unknown search strategy '{}'; expected semantic, keyword, hybrid or fulltext",
                other
            ))),
        }
    }
}

/// One ranked hit of a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub segment_id: String,
    pub document_id: String,
    pub dataset_id: String,
    #[serde(default)]
    pub document_name: Option<String>,
    pub content: String,
    /// Relevance in `[0, 1]`.
    pub score: f64,
    pub strategy: SearchStrategy,
}

impl SearchResult {
    /// Converts the upstream `retrieve` response into results scoped to
    /// `dataset_id`.
    ///
    /// Records whose segment reports a different dataset are dropped to keep
    /// the dataset/document/segment triple consistent. Scores are clamped
    /// into `[0, 1]`.
    pub fn from_retrieve(
        payload: &Value,
        dataset_id: &str,
        strategy: SearchStrategy,
    ) -> ApiResult<Vec<SearchResult>> {
        let records = payload
            .get("records")
            .and_then(|r| r.as_array())
            .ok_or_else(|| {
                ApiError::UnexpectedPayload("retrieve response has no 'records' array".into())
            })?;

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let Some(segment) = record.get("segment") else {
                continue;
            };
            let Some(segment_id) = segment.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let document = segment.get("document");
            let Some(document_id) = segment
                .get("document_id")
                .and_then(|v| v.as_str())
                .or_else(|| document.and_then(|d| d.get("id")).and_then(|v| v.as_str()))
            else {
                continue;
            };

            let reported_dataset = segment
                .get("dataset_id")
                .or_else(|| document.and_then(|d| d.get("dataset_id")))
                .and_then(|v| v.as_str());
            if let Some(reported) = reported_dataset {
                if reported != dataset_id {
                    tracing::warn!(
                        dataset_id,
                        reported,
                        segment_id,
                        "dropping search record attributed to another dataset"
                    );
                    continue;
                }
            }

            let raw_score = record.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            results.push(SearchResult {
                segment_id: segment_id.to_string(),
                document_id: document_id.to_string(),
                dataset_id: dataset_id.to_string(),
                document_name: document
                    .and_then(|d| d.get("name"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                content: segment
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: clamp_score(raw_score),
                strategy,
            });
        }

        Ok(results)
    }
}

/// Clamps a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
