//! Notification trigger rules.
//!
//! Rules are compiled once at startup: each reference text is embedded
//! with the pipeline's provider. After a chunk batch is indexed, every
//! chunk is compared against every rule and *all* rules at or above their
//! threshold fire. Categories are independent, so there is no
//! first-match suppression.

use anyhow::{bail, Result};
use chrono::Utc;

use crate::embedding::{check_dims, cosine_similarity, EmbeddingProvider};
use crate::models::{Chunk, TriggerEvent, TriggerRule};

struct CompiledRule {
    rule: TriggerRule,
    vector: Vec<f32>,
}

/// Rules with their reference vectors, read-only after construction.
pub struct TriggerEngine {
    rules: Vec<CompiledRule>,
    dims: usize,
}

impl TriggerEngine {
    /// Embed every rule's reference text in one batch.
    pub async fn compile(rules: &[TriggerRule], embedder: &dyn EmbeddingProvider) -> Result<Self> {
        for rule in rules {
            if !(rule.threshold > 0.0 && rule.threshold <= 1.0) {
                bail!(
                    "trigger '{}' threshold must be in (0, 1], got {}",
                    rule.category,
                    rule.threshold
                );
            }
        }

        let texts: Vec<String> = rules.iter().map(|r| r.reference_text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(&texts).await?
        };
        if vectors.len() != rules.len() {
            bail!(
                "embedding provider returned {} vectors for {} trigger rules",
                vectors.len(),
                rules.len()
            );
        }
        for v in &vectors {
            check_dims(embedder.dims(), v.len())?;
        }

        Ok(Self {
            rules: rules
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(rule, vector)| CompiledRule { rule, vector })
                .collect(),
            dims: embedder.dims(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate one newly indexed chunk.
    pub fn evaluate(&self, chunk: &Chunk, vector: &[f32]) -> Result<Vec<TriggerEvent>> {
        if self.rules.is_empty() {
            return Ok(Vec::new());
        }
        check_dims(self.dims, vector.len())?;

        let now = Utc::now();
        Ok(self
            .rules
            .iter()
            .filter_map(|cr| {
                let score = cosine_similarity(&cr.vector, vector);
                (score >= cr.rule.threshold).then(|| TriggerEvent {
                    category: cr.rule.category.clone(),
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    score,
                    timestamp: now,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    fn rule(category: &str, text: &str, threshold: f32) -> TriggerRule {
        TriggerRule {
            category: category.into(),
            reference_text: text.into(),
            threshold,
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            id: "c1".into(),
            document_id: "d1".into(),
            ordinal: 0,
            text: text.into(),
            hash: String::new(),
            page_start: 1,
            page_end: 1,
            language: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_all_qualifying_rules_fire() {
        let e = HashingEmbedder::new(256);
        let text = "urgent maintenance safety incident";
        let rules = vec![
            rule("urgent maintenance", text, 0.85),
            rule("safety incident", text, 0.90),
            rule("catering", "lunch menu for friday", 0.5),
        ];
        let engine = TriggerEngine::compile(&rules, &e).await.unwrap();
        assert_eq!(engine.len(), 3);

        let c = chunk(text);
        let events = engine.evaluate(&c, &e.embed_text(text)).unwrap();
        let cats: Vec<&str> = events.iter().map(|ev| ev.category.as_str()).collect();
        assert_eq!(cats, vec!["urgent maintenance", "safety incident"]);
        assert!(events.iter().all(|ev| ev.chunk_id == "c1" && ev.document_id == "d1"));
    }

    #[tokio::test]
    async fn test_below_threshold_is_silent() {
        let e = HashingEmbedder::new(256);
        let engine = TriggerEngine::compile(&[rule("fire", "fire alarm in hangar", 0.9)], &e)
            .await
            .unwrap();
        let text = "monthly newsletter about the garden club";
        let events = engine.evaluate(&chunk(text), &e.embed_text(text)).unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_threshold_rejected() {
        let e = HashingEmbedder::new(8);
        assert!(TriggerEngine::compile(&[rule("x", "y", 0.0)], &e).await.is_err());
        assert!(TriggerEngine::compile(&[rule("x", "y", 1.5)], &e).await.is_err());
    }

    #[tokio::test]
    async fn test_dimension_checked() {
        let e = HashingEmbedder::new(8);
        let engine = TriggerEngine::compile(&[rule("x", "y", 0.5)], &e).await.unwrap();
        assert!(engine.evaluate(&chunk("y"), &[1.0, 0.0]).is_err());
    }

    #[tokio::test]
    async fn test_no_rules() {
        let e = HashingEmbedder::new(8);
        let engine = TriggerEngine::compile(&[], &e).await.unwrap();
        assert!(engine.is_empty());
        assert!(engine.evaluate(&chunk("y"), &[1.0]).unwrap().is_empty());
    }
}
