//! Sparse search using Tantivy (BM25)
//!
//! The index is built at startup by scrolling the vector store's payload text
//! across all vertical collections, or reloaded from the on-disk cache under
//! `<cache_dir>/bm25`. It is read-only after construction; searches are
//! CPU-bound and run behind `spawn_blocking` in the executor.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, TantivyDocument,
};

use policy_engine_core::{Metadata, Vertical};

use crate::vector_store::VectorSearch;
use crate::RetrievalError;

const SCROLL_PAGE: usize = 1000;

/// Sparse search configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Cache directory (in-RAM index if None)
    pub cache_dir: Option<String>,
    /// Enable English stemming
    pub stemming: bool,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            cache_dir: Some("cache/bm25".to_string()),
            stemming: true,
        }
    }
}

/// One BM25 hit
#[derive(Debug, Clone)]
pub struct SparseHit {
    pub chunk_id: String,
    pub score: f32,
    pub content: String,
    pub vertical: String,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    documents: usize,
    built_at_epoch: i64,
}

/// BM25 index over the corpus payload text
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    content_field: Field,
    vertical_field: Field,
    metadata_field: Field,
}

impl SparseIndex {
    fn build_schema() -> (Schema, [Field; 4]) {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("corpus")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", text_options);
        let vertical_field = schema_builder.add_text_field("vertical", STRING | STORED);
        let metadata_field = schema_builder.add_text_field("metadata", STORED);

        let schema = schema_builder.build();
        (schema, [id_field, content_field, vertical_field, metadata_field])
    }

    fn build_tokenizer(config: &SparseConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    fn open_index(config: &SparseConfig) -> Result<(Index, [Field; 4]), RetrievalError> {
        let (schema, fields) = Self::build_schema();

        let index = match config.cache_dir.as_deref() {
            Some(dir) => {
                let path = Path::new(dir);
                std::fs::create_dir_all(path)
                    .map_err(|e| RetrievalError::Index(e.to_string()))?;
                let dir = tantivy::directory::MmapDirectory::open(path)
                    .map_err(|e| RetrievalError::Index(e.to_string()))?;
                Index::open_or_create(dir, schema)
                    .map_err(|e| RetrievalError::Index(e.to_string()))?
            }
            None => Index::create_in_ram(schema),
        };

        index
            .tokenizers()
            .register("corpus", Self::build_tokenizer(config));

        Ok((index, fields))
    }

    fn manifest_path(config: &SparseConfig) -> Option<PathBuf> {
        config
            .cache_dir
            .as_deref()
            .map(|d| Path::new(d).join("manifest.json"))
    }

    fn load_manifest(config: &SparseConfig) -> Option<Manifest> {
        let path = Self::manifest_path(config)?;
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn save_manifest(config: &SparseConfig, manifest: &Manifest) {
        if let Some(path) = Self::manifest_path(config) {
            if let Ok(data) = serde_json::to_string_pretty(manifest) {
                if let Err(e) = std::fs::write(&path, data) {
                    tracing::warn!(error = %e, "failed to write sparse index manifest");
                }
            }
        }
    }

    fn from_parts(index: Index, fields: [Field; 4]) -> Result<Self, RetrievalError> {
        let reader = index
            .reader()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        let [id_field, content_field, vertical_field, metadata_field] = fields;

        Ok(Self {
            index,
            reader,
            id_field,
            content_field,
            vertical_field,
            metadata_field,
        })
    }

    /// Load the cached index, or build it by scrolling the vector store
    pub async fn open_or_build(
        config: SparseConfig,
        store: &dyn VectorSearch,
        verticals: &[Vertical],
    ) -> Result<Self, RetrievalError> {
        let (index, fields) = Self::open_index(&config)?;
        let sparse = Self::from_parts(index, fields)?;

        let cached_docs = Self::load_manifest(&config).map(|m| m.documents).unwrap_or(0);
        if cached_docs > 0 && sparse.doc_count() as usize >= cached_docs {
            tracing::info!(documents = sparse.doc_count(), "loaded sparse index from cache");
            return Ok(sparse);
        }

        sparse.build_from_store(&config, store, verticals).await?;
        Ok(sparse)
    }

    async fn build_from_store(
        &self,
        config: &SparseConfig,
        store: &dyn VectorSearch,
        verticals: &[Vertical],
    ) -> Result<(), RetrievalError> {
        let mut writer = self
            .index
            .writer(50_000_000)
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        writer
            .delete_all_documents()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        let mut total = 0usize;

        for vertical in verticals {
            let collection = vertical.collection_name();
            let mut offset: Option<String> = None;

            loop {
                let (points, next) = match store
                    .scroll(collection, None, SCROLL_PAGE, offset.clone())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(collection, error = %e, "failed to scroll collection for sparse index");
                        break;
                    }
                };

                for point in points {
                    let content = point
                        .payload
                        .get("content")
                        .or_else(|| point.payload.get("text"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if content.is_empty() {
                        continue;
                    }

                    let mut doc = TantivyDocument::default();
                    doc.add_text(self.id_field, &point.id);
                    doc.add_text(self.content_field, content);
                    doc.add_text(self.vertical_field, vertical.as_str());
                    doc.add_text(
                        self.metadata_field,
                        serde_json::Value::Object(point.payload.clone()).to_string(),
                    );

                    writer
                        .add_document(doc)
                        .map_err(|e| RetrievalError::Index(e.to_string()))?;
                    total += 1;
                }

                offset = next;
                if offset.is_none() {
                    break;
                }
            }
        }

        writer
            .commit()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RetrievalError::Index(e.to_string()))?;

        Self::save_manifest(
            config,
            &Manifest {
                documents: total,
                built_at_epoch: chrono::Utc::now().timestamp(),
            },
        );

        tracing::info!(documents = total, "sparse index built from vector store");
        Ok(())
    }

    /// BM25 search over the corpus
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SparseHit>, RetrievalError> {
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);

        // Lenient parse: user queries carry clause punctuation like 12(1)(c)
        let (parsed, _errors) = query_parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k.max(1)))
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RetrievalError::Search(e.to_string()))?;

            let get_str = |field: Field| -> String {
                doc.get_first(field)
                    .and_then(|v| match v {
                        OwnedValue::Str(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .unwrap_or("")
                    .to_string()
            };

            let metadata: Metadata = serde_json::from_str::<serde_json::Value>(
                &get_str(self.metadata_field),
            )
            .ok()
            .and_then(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();

            results.push(SparseHit {
                chunk_id: get_str(self.id_field),
                score,
                content: get_str(self.content_field),
                vertical: get_str(self.vertical_field),
                metadata,
            });
        }

        Ok(results)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MemoryStore;
    use serde_json::json;

    fn seed_store() -> MemoryStore {
        let store = MemoryStore::new();
        let docs = [
            ("l1", "Section 12(1)(c) mandates 25 percent admission for weaker sections", Vertical::Legal),
            ("l2", "Rule 9 prescribes school working days and instruction hours", Vertical::Legal),
            ("g1", "Government order on teacher transfer counselling schedule", Vertical::Go),
        ];
        for (id, content, vertical) in docs {
            let mut payload = Metadata::new();
            payload.insert("content".to_string(), json!(content));
            payload.insert("doc_id".to_string(), json!(id));
            store.insert(vertical.collection_name(), id, vec![1.0, 0.0], payload);
        }
        store
    }

    #[tokio::test]
    async fn test_build_and_search_in_ram() {
        let store = seed_store();
        let config = SparseConfig {
            cache_dir: None,
            stemming: true,
        };
        let index = SparseIndex::open_or_build(config, &store, &Vertical::ALL)
            .await
            .unwrap();
        assert_eq!(index.doc_count(), 3);

        let hits = index.search("teacher transfer", 5).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "g1");
        assert_eq!(hits[0].vertical, "go");
        assert_eq!(hits[0].metadata.get("doc_id"), Some(&json!("g1")));
    }

    #[tokio::test]
    async fn test_clause_punctuation_does_not_error() {
        let store = seed_store();
        let config = SparseConfig {
            cache_dir: None,
            stemming: false,
        };
        let index = SparseIndex::open_or_build(config, &store, &Vertical::ALL)
            .await
            .unwrap();

        let hits = index.search("Section 12(1)(c) admission", 5).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "l1");
    }

    #[tokio::test]
    async fn test_disk_cache_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("bm25").display().to_string();
        let store = seed_store();

        let config = SparseConfig {
            cache_dir: Some(cache_dir.clone()),
            stemming: true,
        };
        let built = SparseIndex::open_or_build(config.clone(), &store, &Vertical::ALL)
            .await
            .unwrap();
        assert_eq!(built.doc_count(), 3);
        drop(built);

        // Second open loads from cache without touching the store
        let empty_store = MemoryStore::new();
        let reloaded = SparseIndex::open_or_build(config, &empty_store, &Vertical::ALL)
            .await
            .unwrap();
        assert_eq!(reloaded.doc_count(), 3);
    }
}
