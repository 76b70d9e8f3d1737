//! Deterministic local embedder based on feature hashing
//!
//! Each identifier term is hashed into one signed bucket. Texts that share
//! vocabulary land close together, which is enough for code search without a
//! model server, and identical input always yields identical vectors.

use super::{normalize_embedding, Embedder};
use crate::error::Result;
use async_trait::async_trait;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "what", "which", "where", "how", "does",
    "are", "is", "of", "to", "in", "it", "an", "on", "be", "as", "by", "or",
];

pub struct HashingEmbedder {
    model: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(model: String, dimension: usize) -> Self {
        Self {
            model,
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in terms(text) {
            let hash = blake3::hash(term.as_bytes());
            let bytes = hash.as_bytes();
            let mut idx_bytes = [0u8; 8];
            idx_bytes.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(idx_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        normalize_embedding(&vector)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Lowercased, stemmed identifier terms of `text`
///
/// `parseConfig`, `parse_config` and `parse config` produce the same terms.
pub fn terms(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        for part in split_camel(word) {
            let lowered = part.to_lowercase();
            if lowered.len() < 2 || STOPWORDS.contains(&lowered.as_str()) {
                continue;
            }
            out.push(stem(&lowered));
        }
    }
    out
}

fn split_camel(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (idx, ch) in word.char_indices() {
        if ch.is_uppercase() && prev_lower {
            parts.push(&word[start..idx]);
            start = idx;
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
    }
    if start < word.len() {
        parts.push(&word[start..]);
    }
    parts
}

fn stem(term: &str) -> String {
    for suffix in ["ing", "ers", "er", "es", "s", "e"] {
        if term.len() > suffix.len() + 2 && term.ends_with(suffix) {
            return term[..term.len() - suffix.len()].to_string();
        }
    }
    term.to_string()
}
