//! Similarity cache of labeled few-shot examples
//!
//! The review tier pulls nearest-neighbor examples before judging and
//! writes newly labeled ones back afterwards. The store is an external
//! collaborator behind a trait; persistence failures never change a
//! decision that was already made.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::decision::Decision;
use crate::error::Result;

/// A labeled example produced by the review tier.
#[derive(Debug, Clone)]
pub struct Example {
    pub label: Decision,
    pub reason: String,
    pub text: String,
}

impl Example {
    /// Render the example as the block format the review prompt embeds.
    pub fn render(&self) -> String {
        format!(
            "request:\n{}\nverdict: {}\nreason: {}",
            self.text.trim(),
            self.label.as_str(),
            self.reason
        )
    }
}

/// Join retrieved example blocks into the few-shot section of the
/// review prompt.
pub fn format_few_shot(blocks: &[String]) -> String {
    blocks
        .iter()
        .map(|block| format!("\n{}\n---", block.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Nearest-neighbor store of example blocks.
#[async_trait]
pub trait ExampleStore: Send + Sync {
    /// Fetch up to `k` example blocks closest to `text`.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>>;

    /// Persist labeled examples; returns how many were stored.
    async fn store(&self, examples: &[Example]) -> Result<usize>;
}

/// In-memory store ranked by shared-token overlap. Good enough for local
/// runs and tests; a deployment points this trait at a real vector
/// store.
#[derive(Debug, Default)]
pub struct InMemoryExampleStore {
    entries: RwLock<Vec<String>>,
}

impl InMemoryExampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn overlap(query: &str, entry: &str) -> usize {
        let entry_tokens: std::collections::HashSet<&str> =
            entry.split_whitespace().collect();
        query
            .split_whitespace()
            .filter(|token| entry_tokens.contains(token))
            .count()
    }
}

#[async_trait]
impl ExampleStore for InMemoryExampleStore {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>> {
        let entries = self.entries.read().expect("example lock poisoned");
        let mut scored: Vec<(usize, &String)> = entries
            .iter()
            .map(|entry| (Self::overlap(text, entry), entry))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn store(&self, examples: &[Example]) -> Result<usize> {
        let mut entries = self.entries.write().expect("example lock poisoned");
        for example in examples {
            entries.push(example.render());
        }
        Ok(examples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_example_render() {
        let example = Example {
            label: Decision::Block,
            reason: "SQL keywords in query string".to_string(),
            text: "GET /items?id=1 UNION SELECT".to_string(),
        };
        let rendered = example.render();
        assert!(rendered.contains("verdict: block"));
        assert!(rendered.contains("UNION SELECT"));
    }

    #[test]
    fn test_format_few_shot_separates_blocks() {
        let blocks = vec!["first".to_string(), "second".to_string()];
        let formatted = format_few_shot(&blocks);
        assert_eq!(formatted, "\nfirst\n---\n\n\nsecond\n---");
    }

    #[tokio::test]
    async fn test_store_then_query_ranks_by_overlap() {
        let store = InMemoryExampleStore::new();
        let stored = store
            .store(&[
                Example {
                    label: Decision::Block,
                    reason: "injection".to_string(),
                    text: "select * from users".to_string(),
                },
                Example {
                    label: Decision::Allow,
                    reason: "health probe".to_string(),
                    text: "GET /healthz".to_string(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let hits = store.query("select users where", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].contains("select * from users"));
    }

    #[tokio::test]
    async fn test_query_caps_at_k() {
        let store = InMemoryExampleStore::new();
        for i in 0..5 {
            store
                .store(&[Example {
                    label: Decision::Allow,
                    reason: format!("case {i}"),
                    text: format!("request {i}"),
                }])
                .await
                .unwrap();
        }
        let hits = store.query("request", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }
}
