//! Semantic image lookup over image file names.
//!
//! Each image is represented by the embedding of its file stem. Embeddings are
//! cached on disk as `{"<image path>": [f32, ...]}` and only images missing
//! from the cache are embedded at start-up.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use repair_qa_common::{ImageMatch, QaError, Result};
use tracing::{debug, info, instrument, warn};

use crate::embedding::Embedder;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Query texts to ranked images
#[async_trait]
pub trait ImageSearcher: Send + Sync {
    /// Best matches first, at most `top_k`
    async fn search(&self, queries: &[String], top_k: usize) -> Result<Vec<ImageMatch>>;
}

struct IndexedImage {
    path: PathBuf,
    unit: Vec<f32>,
}

pub struct EmbeddingImageSearcher {
    embedder: Arc<dyn Embedder>,
    index: Vec<IndexedImage>,
}

impl EmbeddingImageSearcher {
    /// Scan `image_dir`, embed images absent from the cache and build the index
    #[instrument(skip(embedder, image_dir), fields(image_dir = %image_dir.display()))]
    pub async fn load(embedder: Arc<dyn Embedder>, image_dir: &Path, cache_path: &Path) -> Result<Self> {
        let mut cache = read_cache(cache_path).await?;
        let images = scan_images(image_dir).await?;

        let mut updated = false;
        for path in &images {
            let key = path.to_string_lossy().into_owned();
            if cache.contains_key(&key) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match embedder.embed(stem).await {
                Ok(vector) => {
                    cache.insert(key, vector);
                    updated = true;
                }
                Err(e) => warn!(image = %path.display(), error = %e, "Failed to embed image name, skipping"),
            }
        }

        if updated {
            write_cache(cache_path, &cache).await?;
            info!(entries = cache.len(), "Embedding cache updated");
        }

        let mut index = Vec::with_capacity(images.len());
        for path in images {
            let Some(vector) = cache.get(&*path.to_string_lossy()) else {
                continue;
            };
            match normalize(vector) {
                Some(unit) => index.push(IndexedImage { path, unit }),
                None => warn!(image = %path.display(), "Zero embedding, image not indexed"),
            }
        }

        info!(images = index.len(), "Image index ready");
        Ok(Self { embedder, index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl ImageSearcher for EmbeddingImageSearcher {
    #[instrument(skip(self), fields(images = self.index.len()))]
    async fn search(&self, queries: &[String], top_k: usize) -> Result<Vec<ImageMatch>> {
        let mut units = Vec::with_capacity(queries.len());
        for query in queries.iter().filter(|q| !q.trim().is_empty()) {
            let vector = self.embedder.embed(query).await?;
            if let Some(unit) = normalize(&vector) {
                units.push(unit);
            }
        }

        let Some(query) = mean(&units) else {
            debug!("No usable query embedding");
            return Ok(Vec::new());
        };

        let mut matches: Vec<ImageMatch> = self
            .index
            .iter()
            .map(|image| ImageMatch::new(image.path.clone(), dot(&image.unit, &query)))
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

async fn read_cache(path: &Path) -> Result<BTreeMap<String, Vec<f32>>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let cache: BTreeMap<String, Vec<f32>> = serde_json::from_str(&content)?;
            info!(path = %path.display(), entries = cache.len(), "Loaded embedding cache");
            Ok(cache)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(QaError::Io(e)),
    }
}

async fn write_cache(path: &Path, cache: &BTreeMap<String, Vec<f32>>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(cache)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

async fn scan_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        QaError::Config(format!("cannot read image directory {}: {}", dir.display(), e))
    })?;

    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && entry.file_type().await?.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn normalize(vector: &[f32]) -> Option<Vec<f32>> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(vector.iter().map(|x| x / norm).collect())
}

/// Component-wise mean; `None` when empty or dimensions disagree
fn mean(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dims = first.len();
    if vectors.iter().any(|v| v.len() != dims) {
        return None;
    }
    let mut sum = vec![0.0f32; dims];
    for vector in vectors {
        for (acc, x) in sum.iter_mut().zip(vector) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    Some(sum.into_iter().map(|x| x / n).collect())
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
