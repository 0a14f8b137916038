//! Repository chunk index for relevance retrieval.
//!
//! Files are split into semantic chunks (tree-sitter boundaries where the
//! language supports them), embedded through the configured backend, and
//! ranked against a query by best-chunk cosine distance. When the embedding
//! backend is unavailable, queries return an empty ranking and callers fall
//! back to the full file tree.

pub mod chunker;

use crate::llm::client::EmbeddingClient;
use crate::util::hash_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Supported source languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Go,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }
}

/// One indexed chunk of a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

const INDEX_FORMAT_VERSION: u32 = 1;
const EMBED_BATCH_SIZE: usize = 64;

/// On-disk layout of a persisted index.
#[derive(Serialize, Deserialize)]
struct StoredIndex {
    version: u32,
    repo_hash: String,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
}

/// Searchable corpus of file chunks with their embeddings.
pub struct ChunkIndex {
    repo_hash: String,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
}

impl ChunkIndex {
    /// Build (or reload) the index for the given files.
    ///
    /// Unreadable files are skipped with a warning. Embedding failures leave
    /// the index searchable-but-empty: `query` will report no ranking.
    pub async fn build(
        repo_root: &Path,
        files: &[PathBuf],
        embedder: &EmbeddingClient,
        chunk_size: usize,
        force_reindex: bool,
    ) -> Self {
        let repo_hash = repo_identity(repo_root);

        if !force_reindex {
            if let Some(cached) = Self::load_cached(&repo_hash) {
                eprintln!("  Reusing chunk index ({} chunks)", cached.chunks.len());
                return cached;
            }
        }

        let mut chunks = Vec::new();
        for file in files {
            let full_path = repo_root.join(file);
            let content = match fs::read_to_string(&full_path) {
                Ok(content) => content,
                Err(err) => {
                    eprintln!("  Warning: could not index {}: {}", file.display(), err);
                    continue;
                }
            };
            chunks.extend(chunker::chunk_file(file, &content, chunk_size));
        }

        let embeddings = if embedder.is_available() {
            match embed_chunks(embedder, &chunks).await {
                Ok(embeddings) => embeddings,
                Err(err) => {
                    eprintln!("  Warning: embedding backend failed: {}", err);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let index = Self {
            repo_hash,
            chunks,
            embeddings,
        };
        index.save_cached();
        index
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Rank files by relevance to the query, ascending by best-chunk cosine
    /// distance, deduplicated per file. Returns an empty Vec when no ranking
    /// is available; callers must treat that as "no ranking", not "no match".
    pub async fn query(&self, embedder: &EmbeddingClient, text: &str, k: usize) -> Vec<PathBuf> {
        if self.embeddings.len() != self.chunks.len() || self.embeddings.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_embedding = match embedder.embed(&[text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Vec::new(),
            Err(err) => {
                eprintln!("  Warning: relevance query failed: {}", err);
                return Vec::new();
            }
        };

        // Best (minimum) distance among a file's chunks wins.
        let mut best: BTreeMap<PathBuf, f32> = BTreeMap::new();
        for (chunk, embedding) in self.chunks.iter().zip(self.embeddings.iter()) {
            let distance = cosine_distance(&query_embedding, embedding);
            let entry = best.entry(chunk.path.clone()).or_insert(f32::MAX);
            if distance < *entry {
                *entry = distance;
            }
        }

        let mut ranked: Vec<(PathBuf, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(k).map(|(path, _)| path).collect()
    }

    fn load_cached(repo_hash: &str) -> Option<Self> {
        let path = cache_path(repo_hash)?;
        let content = fs::read_to_string(path).ok()?;
        let stored: StoredIndex = serde_json::from_str(&content).ok()?;
        if stored.version != INDEX_FORMAT_VERSION || stored.repo_hash != repo_hash {
            return None;
        }
        if stored.embeddings.len() != stored.chunks.len() || stored.chunks.is_empty() {
            return None;
        }
        Some(Self {
            repo_hash: stored.repo_hash,
            chunks: stored.chunks,
            embeddings: stored.embeddings,
        })
    }

    // Best-effort: a failed cache write only costs a re-index next run.
    fn save_cached(&self) {
        if self.embeddings.len() != self.chunks.len() || self.chunks.is_empty() {
            return;
        }
        let Some(path) = cache_path(&self.repo_hash) else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let stored = StoredIndex {
            version: INDEX_FORMAT_VERSION,
            repo_hash: self.repo_hash.clone(),
            chunks: self.chunks.clone(),
            embeddings: self.embeddings.clone(),
        };
        if let Ok(content) = serde_json::to_string(&stored) {
            let _ = fs::write(path, content);
        }
    }
}

/// Stable identity for a repository, independent of trailing slashes.
fn repo_identity(repo_root: &Path) -> String {
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    hash_str(&canonical.display().to_string())
}

fn cache_path(repo_hash: &str) -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("mend").join(format!("index-{}.json", repo_hash)))
}

async fn embed_chunks(
    embedder: &EmbeddingClient,
    chunks: &[Chunk],
) -> anyhow::Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        embeddings.extend(embedder.embed(&texts).await?);
    }
    Ok(embeddings)
}

/// Cosine distance in [0, 2]; orthogonal or degenerate vectors score 1.0.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
