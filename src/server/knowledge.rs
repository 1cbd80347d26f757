//! Context retrieval over a single document.
//!
//! The document is cut into overlapping character windows, each window is
//! embedded once and cached on disk, and queries are ranked by cosine
//! similarity against the cached embeddings.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Split `text` into windows of `chunk_size` characters, each starting
/// `chunk_size - chunk_overlap` characters after the previous one.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }
    chunks
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

#[derive(Default)]
pub struct KnowledgeBase {
    chunks: Vec<Chunk>,
}

impl KnowledgeBase {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Reuse the embeddings cache when it is readable, otherwise chunk and
    /// embed `document` and write the cache.
    pub async fn load_or_build(
        document: &Path,
        cache: &Path,
        embedder: &dyn Embedder,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self> {
        if let Some(chunks) = Self::read_cache(cache) {
            tracing::info!(count = chunks.len(), cache = %cache.display(), "using cached embeddings");
            return Ok(Self::new(chunks));
        }

        tracing::info!(document = %document.display(), "building embeddings");
        let text = read_document(document)?;
        if text.trim().is_empty() {
            tracing::warn!(document = %document.display(), "context document has no text");
        }

        let pieces = split_text(&text, chunk_size, chunk_overlap);
        let mut chunks = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let embedding = embedder.embed(&piece).await?;
            chunks.push(Chunk {
                text: piece,
                embedding,
            });
        }

        Self::write_cache(cache, &chunks)?;
        tracing::info!(count = chunks.len(), cache = %cache.display(), "saved embeddings");
        Ok(Self::new(chunks))
    }

    fn read_cache(cache: &Path) -> Option<Vec<Chunk>> {
        let content = match fs::read_to_string(cache) {
            Ok(content) => content,
            Err(_) => return None,
        };
        match serde_json::from_str(&content) {
            Ok(chunks) => Some(chunks),
            Err(e) => {
                tracing::warn!(cache = %cache.display(), error = %e, "ignoring unreadable embeddings cache");
                None
            }
        }
    }

    fn write_cache(cache: &Path, chunks: &[Chunk]) -> Result<()> {
        if let Some(parent) = cache.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(cache, serde_json::to_string(chunks)?)?;
        Ok(())
    }

    /// The `top_k` chunk texts most similar to `embedding`, best first
    pub fn rank(&self, embedding: &[f32], top_k: usize) -> Vec<String> {
        let mut scored: Vec<(&Chunk, f32)> = self
            .chunks
            .iter()
            .map(|chunk| (chunk, cosine_similarity(&chunk.embedding, embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((_, best)) = scored.first() {
            tracing::debug!(score = best, "top retrieval score");
        }

        scored
            .into_iter()
            .take(top_k)
            .map(|(chunk, _)| chunk.text.clone())
            .collect()
    }

    /// Chunks relevant to `query`. Failures degrade to no context.
    pub async fn relevant(&self, query: &str, embedder: &dyn Embedder, top_k: usize) -> Vec<String> {
        if self.chunks.is_empty() {
            return Vec::new();
        }
        match embedder.embed(query).await {
            Ok(embedding) => self.rank(&embedding, top_k),
            Err(e) => {
                tracing::error!(error = %e, "failed to embed query");
                Vec::new()
            }
        }
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Text of a context document: page text for PDFs, the file itself otherwise
pub fn read_document(path: &Path) -> Result<String> {
    if !is_pdf(path) {
        return Ok(fs::read_to_string(path)?);
    }

    let bytes = fs::read(path)?;
    pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| ChatError::Document(format!("failed to extract text from {}: {}", path.display(), e)))
}

/// Embedder used when retrieval is disabled
pub struct NoEmbedder;

#[async_trait]
impl Embedder for NoEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

pub type SharedEmbedder = Arc<dyn Embedder>;
