//! Addressable resources.
//!
//! Resources are read-only views addressed by URI and routed to the
//! matching "get" or "list" operation:
//!
//! | URI | Operation |
//! |-----|-----------|
//! | `datasets://` | list_datasets |
//! | `dataset://{dataset_id}` | get_dataset |
//! | `documents://{dataset_id}` | list_documents |
//! | `document://{dataset_id}/{document_id}` | get_document |
//! | `segments://{dataset_id}/{document_id}` | list_segments |
//! | `segment://{dataset_id}/{document_id}/{segment_id}` | get_segment |
//! | `segment://{dataset_id}/{segment_id}` | get_segment, probing each document |
//!
//! A URI that does not match one of these shapes is rejected with
//! `InvalidParameters` before the upstream is contacted.
//!
//! The two-part segment form does not name a document, and the upstream
//! has no dataset-wide segment lookup. It is resolved by listing the
//! dataset's first page of documents and probing them concurrently; the
//! first hit wins.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::client::{KnowledgeApi, Operation};
use crate::error::{ApiError, ApiResult};
use crate::models::{Dataset, Document, Page, Segment};

/// Documents probed when resolving a two-part segment URI.
const SEGMENT_PROBE_LIMIT: u64 = 100;

/// A parsed resource URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUri {
    Datasets,
    Dataset {
        dataset_id: String,
    },
    Documents {
        dataset_id: String,
    },
    Document {
        dataset_id: String,
        document_id: String,
    },
    Segments {
        dataset_id: String,
        document_id: String,
    },
    Segment {
        dataset_id: String,
        document_id: Option<String>,
        segment_id: String,
    },
}

impl ResourceUri {
    pub fn parse(uri: &str) -> ApiResult<Self> {
        let malformed = || ApiError::invalid(format!("malformed resource URI: '{}'", uri));

        let (scheme, rest) = uri.split_once("://").ok_or_else(malformed)?;
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        if parts
            .iter()
            .any(|p| p.is_empty() || p.trim() != *p || p.contains(['?', '#']))
        {
            return Err(malformed());
        }
        let owned = |i: usize| parts[i].to_string();

        match (scheme, parts.len()) {
            ("datasets", 0) => Ok(ResourceUri::Datasets),
            ("dataset", 1) => Ok(ResourceUri::Dataset {
                dataset_id: owned(0),
            }),
            ("documents", 1) => Ok(ResourceUri::Documents {
                dataset_id: owned(0),
            }),
            ("document", 2) => Ok(ResourceUri::Document {
                dataset_id: owned(0),
                document_id: owned(1),
            }),
            ("segments", 2) => Ok(ResourceUri::Segments {
                dataset_id: owned(0),
                document_id: owned(1),
            }),
            ("segment", 2) => Ok(ResourceUri::Segment {
                dataset_id: owned(0),
                document_id: None,
                segment_id: owned(1),
            }),
            ("segment", 3) => Ok(ResourceUri::Segment {
                dataset_id: owned(0),
                document_id: Some(owned(1)),
                segment_id: owned(2),
            }),
            _ => Err(malformed()),
        }
    }
}

/// A URI template advertised by `resources/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceTemplate {
    pub uri_template: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
}

pub fn templates() -> Vec<ResourceTemplate> {
    let t = |uri_template, name, description| ResourceTemplate {
        uri_template,
        name,
        description,
        mime_type: "application/json",
    };
    vec![
        t("datasets://", "datasets", "All datasets (first page)"),
        t("dataset://{dataset_id}", "dataset", "One dataset"),
        t("documents://{dataset_id}", "documents", "Documents of a dataset (first page)"),
        t("document://{dataset_id}/{document_id}", "document", "One document"),
        t("segments://{dataset_id}/{document_id}", "segments", "Segments of a document"),
        t(
            "segment://{dataset_id}/{document_id}/{segment_id}",
            "segment",
            "One segment",
        ),
        t(
            "segment://{dataset_id}/{segment_id}",
            "segment_in_dataset",
            "One segment, located by searching the dataset's documents",
        ),
    ]
}

fn typed<T: DeserializeOwned>(value: Value, what: &str) -> ApiResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::UnexpectedPayload(format!("{}: {}", what, e)))
}

/// Unwraps a `{"data": {...}}` envelope if the upstream used one.
fn unwrap_data(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if map.get("data").is_some_and(|d| d.is_object()) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Fills in `document_id` on segment objects that omit it.
fn with_document_id(mut segment: Value, document_id: &str) -> Value {
    if let Some(obj) = segment.as_object_mut() {
        obj.entry("document_id")
            .or_insert_with(|| json!(document_id));
    }
    segment
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::UnexpectedPayload(format!("failed to encode resource: {}", e)))
}

/// Resolves `uri` against the upstream and returns a typed JSON view.
pub async fn read_resource(api: &dyn KnowledgeApi, uri: &str) -> ApiResult<Value> {
    match ResourceUri::parse(uri)? {
        ResourceUri::Datasets => {
            let payload = api
                .call(Operation::ListDatasets, json!({ "page": 1, "limit": 100 }))
                .await?;
            let page: Page<Dataset> = typed(payload, "dataset list")?;
            to_json(&page)
        }
        ResourceUri::Dataset { dataset_id } => {
            let payload = api
                .call(Operation::GetDataset, json!({ "dataset_id": dataset_id }))
                .await?;
            to_json(&typed::<Dataset>(payload, "dataset")?)
        }
        ResourceUri::Documents { dataset_id } => {
            let page = list_documents(api, &dataset_id).await?;
            to_json(&page)
        }
        ResourceUri::Document {
            dataset_id,
            document_id,
        } => {
            let payload = api
                .call(
                    Operation::GetDocument,
                    json!({ "dataset_id": dataset_id, "document_id": document_id }),
                )
                .await?;
            let mut doc: Document = typed(payload, "document")?;
            doc.dataset_id = dataset_id;
            to_json(&doc)
        }
        ResourceUri::Segments {
            dataset_id,
            document_id,
        } => {
            let mut payload = api
                .call(
                    Operation::ListSegments,
                    json!({ "dataset_id": dataset_id, "document_id": document_id }),
                )
                .await?;
            if let Some(items) = payload.get_mut("data").and_then(|d| d.as_array_mut()) {
                for item in items.iter_mut() {
                    *item = with_document_id(item.take(), &document_id);
                }
            }
            let page: Page<Segment> = typed(payload, "segment list")?;
            to_json(&page)
        }
        ResourceUri::Segment {
            dataset_id,
            document_id: Some(document_id),
            segment_id,
        } => {
            let segment = get_segment(api, &dataset_id, &document_id, &segment_id).await?;
            to_json(&segment)
        }
        ResourceUri::Segment {
            dataset_id,
            document_id: None,
            segment_id,
        } => {
            let segment = find_segment(api, &dataset_id, &segment_id).await?;
            to_json(&segment)
        }
    }
}

async fn list_documents(api: &dyn KnowledgeApi, dataset_id: &str) -> ApiResult<Page<Document>> {
    let payload = api
        .call(
            Operation::ListDocuments,
            json!({ "dataset_id": dataset_id, "page": 1, "limit": SEGMENT_PROBE_LIMIT }),
        )
        .await?;
    let mut page: Page<Document> = typed(payload, "document list")?;
    for doc in &mut page.data {
        doc.dataset_id = dataset_id.to_string();
    }
    Ok(page)
}

async fn get_segment(
    api: &dyn KnowledgeApi,
    dataset_id: &str,
    document_id: &str,
    segment_id: &str,
) -> ApiResult<Segment> {
    let payload = api
        .call(
            Operation::GetSegment,
            json!({
                "dataset_id": dataset_id,
                "document_id": document_id,
                "segment_id": segment_id,
            }),
        )
        .await?;
    typed(with_document_id(unwrap_data(payload), document_id), "segment")
}

/// Locates a segment within a dataset without knowing its document.
async fn find_segment(api: &dyn KnowledgeApi, dataset_id: &str, segment_id: &str) -> ApiResult<Segment> {
    let documents = list_documents(api, dataset_id).await?;
    if documents.has_more {
        tracing::debug!(
            dataset_id,
            probed = documents.data.len(),
            "segment lookup limited to the first page of documents"
        );
    }

    let mut probes: FuturesUnordered<_> = documents
        .data
        .iter()
        .map(|doc| get_segment(api, dataset_id, &doc.id, segment_id))
        .collect();

    let mut other_error: Option<ApiError> = None;
    while let Some(result) = probes.next().await {
        match result {
            Ok(segment) => return Ok(segment),
            Err(ApiError::NotFound(_)) => {}
            Err(e) => {
                other_error.get_or_insert(e);
            }
        }
    }

    Err(other_error.unwrap_or_else(|| {
        ApiError::NotFound(format!(
            "segment '{}' not found in dataset '{}'",
            segment_id, dataset_id
        ))
    }))
}
