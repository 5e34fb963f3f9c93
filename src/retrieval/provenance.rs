//! Provenance tracking for answer citations

use crate::retrieval::RankedResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Characters of passage text shown per file in citations
const EXCERPT_CHARS: usize = 100;

/// One cited passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub text: String,
    pub score: f32,
    /// Rank of the passage in the final result list
    pub position: usize,
}

type FileMap = BTreeMap<String, Vec<SourceEntry>>;
type CategoryMap = BTreeMap<String, FileMap>;

/// Knowledge base → category → file → cited passages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTree {
    tree: BTreeMap<String, CategoryMap>,
}

impl SourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree of the results scoring at least `threshold`
    pub fn from_results(results: &[RankedResult], threshold: f32) -> Self {
        let mut tree = Self::new();
        for result in results.iter().filter(|r| r.relevance_score >= threshold) {
            tree.insert(result);
        }
        tree
    }

    pub fn insert(&mut self, result: &RankedResult) {
        let chunk = &result.chunk;
        self.tree
            .entry(chunk.knowledge_base_id.clone())
            .or_default()
            .entry(chunk.category.clone())
            .or_default()
            .entry(chunk.file_name.clone())
            .or_default()
            .push(SourceEntry {
                text: chunk.text.clone(),
                score: result.relevance_score,
                position: result.rank,
            });
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of cited passages
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    /// Every passage with its knowledge base, category and file
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str, &SourceEntry)> + '_ {
        self.tree.iter().flat_map(|(kb, categories)| {
            categories.iter().flat_map(move |(category, files)| {
                files.iter().flat_map(move |(file, entries)| {
                    entries
                        .iter()
                        .map(move |e| (kb.as_str(), category.as_str(), file.as_str(), e))
                })
            })
        })
    }

    /// Human-readable citation list: per file, the cited positions and an
    /// excerpt of its first passage
    pub fn render_citations(&self) -> String {
        if self.is_empty() {
            return "No specific sources were cited".to_string();
        }

        let mut sections = vec!["This answer drew on the following sources:".to_string()];
        for (kb, categories) in &self.tree {
            for (category, files) in categories {
                for (file, entries) in files {
                    let positions: Vec<String> =
                        entries.iter().map(|e| e.position.to_string()).collect();
                    let excerpt = entries.first().map(|e| excerpt(&e.text)).unwrap_or_default();
                    sections.push(format!(
                        "Knowledge base: {}\n├─ Category: {}\n├─ File: {}\n└─ Passages: {}\n   Excerpt: {}",
                        kb,
                        category,
                        file,
                        positions.join(", "),
                        excerpt
                    ));
                }
            }
        }
        sections.join("\n\n")
    }
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
