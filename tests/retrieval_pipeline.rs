//! Retrieval pipeline integration tests
//!
//! Knowledge bases are built on disk with a bag-of-words embedder and
//! searched through the full retrieve-then-rerank path.

mod common;

use common::*;
use docent::retrieval::{RerankSettings, RetrievalError, ScoreSource, SearchRequest};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const BIOLOGY: &[(&str, &str, &str)] = &[
    (
        "biology",
        "cells.md",
        "Photosynthesis converts light energy into chemical energy in chloroplasts",
    ),
    ("biology", "cells.md", "Mitochondria release energy through cellular respiration"),
    ("biology", "genetics.md", "DNA replication copies the genome before cell division"),
    ("biology", "ecology.md", "Plants use photosynthesis to produce oxygen for the ecosystem"),
];

const PHYSICS: &[(&str, &str, &str)] = &[
    ("physics", "energy.md", "Kinetic energy depends on mass and velocity"),
    ("physics", "light.md", "Light energy travels as electromagnetic waves"),
];

fn settings(per_file_cap: usize) -> RerankSettings {
    RerankSettings {
        per_file_cap,
        timeout: Duration::from_millis(200),
        ..RerankSettings::default()
    }
}

#[tokio::test]
async fn test_search_reranks_across_knowledge_bases() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());
    let biology = build_kb(&store, "biology", BIOLOGY).await;
    let physics = build_kb(&store, "physics", PHYSICS).await;

    let searcher = searcher(
        &store,
        Arc::new(BagOfWordsEmbedder),
        Some(Arc::new(OverlapReranker)),
        settings(5),
    );

    let mut request = SearchRequest::new(
        "photosynthesis light energy",
        vec![biology.clone(), physics.clone()],
    );
    request.final_n = 4;
    let results = searcher.search(&request).await.unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 4);
    assert!(results.iter().all(|r| r.scored_by == ScoreSource::Rerank));
    for (i, pair) in results.windows(2).enumerate() {
        assert!(
            pair[0].relevance_score >= pair[1].relevance_score,
            "scores must not increase at rank {}",
            i + 2
        );
    }
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
    }
    assert_eq!(results[0].chunk.file_name, "cells.md");

    let kbs: Vec<&str> = results
        .iter()
        .map(|r| r.chunk.knowledge_base_id.as_str())
        .collect();
    assert!(kbs.contains(&biology.as_str()));
    assert!(kbs.contains(&physics.as_str()));
}

#[tokio::test]
async fn test_corrupt_knowledge_base_is_skipped() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());
    let healthy = build_kb(&store, "biology", BIOLOGY).await;
    let broken = build_kb(&store, "physics", PHYSICS).await;
    corrupt_kb(&store, &broken);

    let searcher = searcher(
        &store,
        Arc::new(BagOfWordsEmbedder),
        Some(Arc::new(OverlapReranker)),
        settings(5),
    );
    let request = SearchRequest::new("light energy", vec![healthy.clone(), broken]);
    let results = searcher.search(&request).await.unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.chunk.knowledge_base_id == healthy));
}

#[tokio::test]
async fn test_all_knowledge_bases_failing_yields_nothing() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());
    let broken = build_kb(&store, "physics", PHYSICS).await;
    corrupt_kb(&store, &broken);

    let searcher = searcher(&store, Arc::new(BagOfWordsEmbedder), None, settings(5));
    let request = SearchRequest::new("energy", vec![broken, "missing-kb".to_string()]);
    assert!(searcher.search(&request).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerank_timeout_falls_back_to_similarity() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());
    let biology = build_kb(&store, "biology", BIOLOGY).await;

    let searcher = searcher(
        &store,
        Arc::new(BagOfWordsEmbedder),
        Some(Arc::new(StalledReranker(Duration::from_secs(5)))),
        settings(5),
    );
    let mut request = SearchRequest::new("photosynthesis energy", vec![biology]);
    request.final_n = 3;

    let started = std::time::Instant::now();
    let results = searcher.search(&request).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.scored_by == ScoreSource::Similarity));
    assert!(results
        .windows(2)
        .all(|pair| pair[0].relevance_score >= pair[1].relevance_score));
}

#[tokio::test]
async fn test_per_file_cap() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());
    let passages: Vec<(&str, &str, String)> = (0..8)
        .map(|i| ("chemistry", "acids.md", format!("Acids donate protons, example {}", i)))
        .chain((0..2).map(|i| {
            let text = format!("Bases accept protons, case {}", i);
            ("chemistry", "bases.md", text)
        }))
        .collect();
    let passages: Vec<(&str, &str, &str)> = passages
        .iter()
        .map(|(c, f, t)| (*c, *f, t.as_str()))
        .collect();
    let kb = build_kb(&store, "chemistry", &passages).await;

    let searcher = searcher(
        &store,
        Arc::new(BagOfWordsEmbedder),
        Some(Arc::new(OverlapReranker)),
        settings(2),
    );
    let mut request = SearchRequest::new("acids donate protons", vec![kb]);
    request.final_n = 10;
    let results = searcher.search(&request).await.unwrap();

    let acids = results.iter().filter(|r| r.chunk.file_name == "acids.md").count();
    let bases = results.iter().filter(|r| r.chunk.file_name == "bases.md").count();
    assert_eq!(acids, 2);
    assert!(bases <= 2);
    assert_eq!(results.len(), acids + bases);
}

#[tokio::test]
async fn test_query_embedding_failure_is_an_error() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());
    let kb = build_kb(&store, "biology", BIOLOGY).await;

    let searcher = searcher(&store, Arc::new(UnavailableEmbedder), None, settings(5));
    let result = searcher.search(&SearchRequest::new("energy", vec![kb])).await;
    assert!(matches!(result, Err(RetrievalError::QueryEmbedding(_))));
}
