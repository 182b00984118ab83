#![allow(dead_code)]

use async_trait::async_trait;
use finrag_retrieval::{RetrievalConfig, RetrievalService};
use finrag_vector_store::{
    DocumentStore, Embedder, EmbeddingModel, FlatIndex, NewDocument, RemoteIndex,
    RemoteIndexStats, RemoteMatch, RemoteRecord, RemoteVectorClient, Result, VectorIndex,
    VectorStoreError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Topic axes: a text's vector counts how many of its words fall on each axis.
const AXES: [&[&str]; 5] = [
    &["earnings", "estimate", "surprise", "beats", "misses", "eps", "revenue", "guidance"],
    &["oil", "crude", "prices", "brent", "opec"],
    &["tsm", "asml", "tech", "semiconductor", "chip", "asia"],
    &["outlook", "rise", "improves", "rally", "market"],
    &["filing", "10-k", "sec", "annual"],
];

pub const KEYWORD_DIM: usize = AXES.len();

/// Embedder whose similarities are predictable from the words alone.
pub struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn model_id(&self) -> &str {
        "keyword"
    }

    fn dimension(&self) -> usize {
        KEYWORD_DIM
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| keyword_vector(text)).collect())
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; KEYWORD_DIM];
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|ch: char| !ch.is_alphanumeric())
            .to_lowercase();
        for (axis, words) in AXES.iter().enumerate() {
            if words.contains(&word.as_str()) {
                vector[axis] += 1.0;
            }
        }
    }
    vector
}

pub fn keyword_model() -> EmbeddingModel {
    EmbeddingModel::new(Arc::new(KeywordEmbedder))
}

pub fn config_with_threshold(threshold: f32) -> RetrievalConfig {
    RetrievalConfig {
        confidence_threshold: threshold,
        ..RetrievalConfig::default()
    }
}

pub fn flat_service(threshold: f32) -> RetrievalService {
    RetrievalService::new(
        keyword_model(),
        Box::new(FlatIndex::new(KEYWORD_DIM)),
        DocumentStore::in_memory(),
        &config_with_threshold(threshold),
    )
    .unwrap()
}

pub fn remote_service(client: Arc<FakeRemote>, threshold: f32) -> RetrievalService {
    let index: Box<dyn VectorIndex> = Box::new(RemoteIndex::new(client, KEYWORD_DIM));
    RetrievalService::new(
        keyword_model(),
        index,
        DocumentStore::in_memory(),
        &config_with_threshold(threshold),
    )
    .unwrap()
}

pub fn market_docs() -> Vec<NewDocument> {
    vec![
        NewDocument::new("TSM beats earnings", "earnings").with_ticker("TSM"),
        NewDocument::new("ASML misses estimate", "earnings").with_ticker("ASML"),
        NewDocument::new("Oil prices rise", "general"),
    ]
}

/// In-process stand-in for a managed vector service.
#[derive(Default)]
pub struct FakeRemote {
    records: Mutex<Vec<RemoteRecord>>,
    offline: AtomicBool,
}

impl FakeRemote {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(VectorStoreError::BackendUnavailable(
                "connection refused".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteVectorClient for FakeRemote {
    async fn upsert(&self, records: Vec<RemoteRecord>) -> Result<()> {
        self.check_online()?;
        let mut stored = self.records.lock().unwrap();
        for record in records {
            stored.retain(|existing| existing.id != record.id);
            stored.push(record);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RemoteMatch>> {
        self.check_online()?;
        let stored = self.records.lock().unwrap();
        let mut matches: Vec<RemoteMatch> = stored
            .iter()
            .map(|record| RemoteMatch {
                id: record.id.clone(),
                score: record.values.iter().zip(vector).map(|(a, b)| a * b).sum(),
            })
            .collect();
        // Reverse insertion order so the index has to do its own tie-breaking.
        matches.reverse();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe(&self) -> Result<RemoteIndexStats> {
        self.check_online()?;
        Ok(RemoteIndexStats {
            dimension: KEYWORD_DIM,
            total_vector_count: self.len() as u64,
        })
    }
}
