//! Vector index over embedded chunks
//!
//! Vectors are stored as little-endian `f32` blobs next to their chunk and
//! searched exhaustively per repository. Repositories are small enough that
//! a linear scan over one repository's live chunks stays cheap.

use crate::error::{Error, Result};
use crate::meta::{ChunkRecord, EmbeddedChunk};
use std::cmp::Ordering;

/// Serialize a vector for storage
pub fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize a stored vector
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Other(format!(
            "Corrupt vector blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Cosine similarity clamped to `[0, 1]`
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}

/// A chunk scored against a query
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// Deterministic ranking: score desc, then file path, then start line
pub fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
        .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
}

/// Score every candidate, drop those below `min_score` and rank the rest
///
/// Candidates whose stored vector has a different dimension are skipped.
pub fn nearest(query: &[f32], candidates: Vec<EmbeddedChunk>, min_score: f32) -> Result<Vec<Neighbor>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let vector = decode(&candidate.vector)?;
        if vector.len() != query.len() {
            continue;
        }
        let score = cosine_similarity(query, &vector);
        if score >= min_score {
            scored.push(Neighbor {
                chunk: candidate.chunk,
                score,
            });
        }
    }
    scored.sort_by(rank_order);
    Ok(scored)
}
