//! Vector store access
//!
//! The external vector store is modeled by the `VectorSearch` trait with a
//! Qdrant-backed production implementation and an in-memory store for tests.
//! Filters follow a minimal must/should shape with match, range, and nested
//! leaf conditions (nested conditions cover arrays of relation objects).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, value::Kind, Condition, FieldCondition,
    Filter, GetPointsBuilder, Match, NestedCondition, PointId, Range, RetrievedPoint,
    ScoredPoint, ScrollPointsBuilder, SearchPointsBuilder,
};
use qdrant_client::Qdrant;
use serde::Serialize;
use serde_json::Value;

use policy_engine_core::Metadata;

use crate::RetrievalError;

/// One hit from the vector store
#[derive(Debug, Clone)]
pub struct PointHit {
    pub id: String,
    pub score: f32,
    pub payload: Metadata,
}

/// Leaf filter condition
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCondition {
    Match {
        key: String,
        value: Value,
    },
    Range {
        key: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
    /// Condition over an array of objects (e.g. the relations payload)
    Nested {
        key: String,
        must: Vec<FilterCondition>,
    },
}

/// Minimal must/should filter
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchFilter {
    pub must: Vec<FilterCondition>,
    pub should: Vec<FilterCondition>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must_match(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push(FilterCondition::Match {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn must_range(
        mut self,
        key: impl Into<String>,
        gte: Option<f64>,
        lte: Option<f64>,
    ) -> Self {
        self.must.push(FilterCondition::Range {
            key: key.into(),
            gte,
            lte,
        });
        self
    }

    pub fn should_match(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.should.push(FilterCondition::Match {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn must_nested(mut self, key: impl Into<String>, must: Vec<FilterCondition>) -> Self {
        self.must.push(FilterCondition::Nested {
            key: key.into(),
            must,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty()
    }

    /// Canonical JSON form, used for cache keying
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn condition_to_qdrant(cond: &FilterCondition) -> Condition {
        match cond {
            FilterCondition::Match { key, value } => {
                let match_value = match value {
                    Value::Bool(b) => MatchValue::Boolean(*b),
                    Value::Number(n) if n.is_i64() => MatchValue::Integer(n.as_i64().unwrap_or(0)),
                    other => MatchValue::Keyword(
                        other.as_str().map(str::to_string).unwrap_or_else(|| other.to_string()),
                    ),
                };
                Condition {
                    condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                        key: key.clone(),
                        r#match: Some(Match {
                            match_value: Some(match_value),
                        }),
                        ..Default::default()
                    })),
                }
            }
            FilterCondition::Range { key, gte, lte } => Condition {
                condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                    key: key.clone(),
                    range: Some(Range {
                        gte: *gte,
                        lte: *lte,
                        ..Default::default()
                    }),
                    ..Default::default()
                })),
            },
            FilterCondition::Nested { key, must } => Condition {
                condition_one_of: Some(ConditionOneOf::Nested(NestedCondition {
                    key: key.clone(),
                    filter: Some(Filter {
                        must: must.iter().map(Self::condition_to_qdrant).collect(),
                        ..Default::default()
                    }),
                })),
            },
        }
    }

    pub fn into_qdrant(&self) -> Filter {
        Filter {
            must: self.must.iter().map(Self::condition_to_qdrant).collect(),
            should: self.should.iter().map(Self::condition_to_qdrant).collect(),
            ..Default::default()
        }
    }
}

/// Read-only vector store operations used by the pipeline
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn collections(&self) -> Result<Vec<String>, RetrievalError>;

    async fn query_points(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<PointHit>, RetrievalError>;

    /// Paged payload scan; `offset` is an opaque cursor
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&SearchFilter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<PointHit>, Option<String>), RetrievalError>;

    /// Batched fetch by id
    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<PointHit>, RetrievalError>;
}

/// Qdrant-backed vector store
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self, RetrievalError> {
        let mut builder = Qdrant::from_url(endpoint);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
            tracing::info!("Qdrant connection using API key authentication");
        }
        let client = builder
            .build()
            .map_err(|e| RetrievalError::UpstreamUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> Value {
    match value.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::from(i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null)
        }
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.into_iter().map(qdrant_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, qdrant_value_to_json(v)))
                .collect(),
        ),
    }
}

fn payload_to_metadata(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Metadata {
    payload
        .into_iter()
        .map(|(k, v)| (k, qdrant_value_to_json(v)))
        .collect()
}

fn point_id_to_string(id: Option<PointId>) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id.and_then(|p| p.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn scored_point_to_hit(point: ScoredPoint) -> PointHit {
    PointHit {
        id: point_id_to_string(point.id),
        score: point.score,
        payload: payload_to_metadata(point.payload),
    }
}

fn retrieved_point_to_hit(point: RetrievedPoint) -> PointHit {
    PointHit {
        id: point_id_to_string(point.id),
        score: 0.0,
        payload: payload_to_metadata(point.payload),
    }
}

#[async_trait]
impl VectorSearch for QdrantStore {
    async fn collections(&self) -> Result<Vec<String>, RetrievalError> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| RetrievalError::UpstreamUnavailable(e.to_string()))?;
        Ok(response.collections.into_iter().map(|c| c.name).collect())
    }

    async fn query_points(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<PointHit>, RetrievalError> {
        let mut builder =
            SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64).with_payload(true);

        if let Some(threshold) = score_threshold {
            builder = builder.score_threshold(threshold);
        }
        if let Some(filter) = filter {
            builder = builder.filter(filter.into_qdrant());
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        Ok(response.result.into_iter().map(scored_point_to_hit).collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&SearchFilter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<PointHit>, Option<String>), RetrievalError> {
        let mut builder = ScrollPointsBuilder::new(collection)
            .limit(limit as u32)
            .with_payload(true);

        if let Some(filter) = filter {
            builder = builder.filter(filter.into_qdrant());
        }
        if let Some(offset) = offset {
            builder = builder.offset(PointId::from(offset));
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

        let next = response
            .next_page_offset
            .map(|id| point_id_to_string(Some(id)))
            .filter(|s| !s.is_empty());
        let hits = response
            .result
            .into_iter()
            .map(retrieved_point_to_hit)
            .collect();

        Ok((hits, next))
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<PointHit>, RetrievalError> {
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        let builder = GetPointsBuilder::new(collection, point_ids).with_payload(true);

        let response = self
            .client
            .get_points(builder)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(retrieved_point_to_hit)
            .collect())
    }
}

/// In-memory vector store for tests
///
/// Scoring is cosine similarity; filters are evaluated against the JSON
/// payload with dotted-path keys.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<MemoryPoint>>>,
}

#[derive(Clone)]
struct MemoryPoint {
    id: String,
    vector: Vec<f32>,
    payload: Metadata,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, id: &str, vector: Vec<f32>, payload: Metadata) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(MemoryPoint {
                id: id.to_string(),
                vector,
                payload,
            });
    }

    fn lookup<'a>(payload: &'a Metadata, key: &str) -> Option<&'a Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = payload.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    fn value_matches(candidate: &Value, expected: &Value) -> bool {
        match candidate {
            Value::Array(items) => items.iter().any(|item| Self::value_matches(item, expected)),
            other => other == expected,
        }
    }

    fn condition_matches(payload: &Metadata, cond: &FilterCondition) -> bool {
        match cond {
            FilterCondition::Match { key, value } => Self::lookup(payload, key)
                .map(|v| Self::value_matches(v, value))
                .unwrap_or(false),
            FilterCondition::Range { key, gte, lte } => {
                let Some(v) = Self::lookup(payload, key).and_then(Value::as_f64) else {
                    return false;
                };
                gte.map_or(true, |g| v >= g) && lte.map_or(true, |l| v <= l)
            }
            FilterCondition::Nested { key, must } => {
                let Some(Value::Array(items)) = Self::lookup(payload, key) else {
                    return false;
                };
                items.iter().any(|item| {
                    let Some(obj) = item.as_object() else {
                        return false;
                    };
                    must.iter().all(|c| Self::condition_matches(obj, c))
                })
            }
        }
    }

    fn filter_matches(payload: &Metadata, filter: Option<&SearchFilter>) -> bool {
        let Some(filter) = filter else { return true };
        let must_ok = filter
            .must
            .iter()
            .all(|c| Self::condition_matches(payload, c));
        let should_ok = filter.should.is_empty()
            || filter
                .should
                .iter()
                .any(|c| Self::condition_matches(payload, c));
        must_ok && should_ok
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            0.0
        } else {
            dot / (na * nb)
        }
    }
}

#[async_trait]
impl VectorSearch for MemoryStore {
    async fn collections(&self) -> Result<Vec<String>, RetrievalError> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn query_points(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<PointHit>, RetrievalError> {
        let collections = self.collections.read();
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<PointHit> = points
            .iter()
            .filter(|p| Self::filter_matches(&p.payload, filter))
            .map(|p| PointHit {
                id: p.id.clone(),
                score: Self::cosine(&p.vector, vector),
                payload: p.payload.clone(),
            })
            .filter(|h| score_threshold.map_or(true, |t| h.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&SearchFilter>,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<PointHit>, Option<String>), RetrievalError> {
        let collections = self.collections.read();
        let Some(points) = collections.get(collection) else {
            return Ok((Vec::new(), None));
        };

        let start: usize = offset.and_then(|o| o.parse().ok()).unwrap_or(0);
        let filtered: Vec<&MemoryPoint> = points
            .iter()
            .filter(|p| Self::filter_matches(&p.payload, filter))
            .collect();

        let page: Vec<PointHit> = filtered
            .iter()
            .skip(start)
            .take(limit)
            .map(|p| PointHit {
                id: p.id.clone(),
                score: 0.0,
                payload: p.payload.clone(),
            })
            .collect();

        let next = if start + limit < filtered.len() {
            Some((start + limit).to_string())
        } else {
            None
        };

        Ok((page, next))
    }

    async fn retrieve(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<PointHit>, RetrievalError> {
        let collections = self.collections.read();
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(points
            .iter()
            .filter(|p| ids.contains(&p.id))
            .map(|p| PointHit {
                id: p.id.clone(),
                score: 0.0,
                payload: p.payload.clone(),
            })
            .collect())
    }
}
