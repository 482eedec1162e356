//! Word segmentation in front of an embedder.

use std::sync::Arc;

use async_trait::async_trait;
use jieba_rs::Jieba;
use repair_qa_common::Result;
use tracing::debug;

use crate::embedding::Embedder;

/// Embeds the jieba segmentation of the text, words joined by single spaces
pub struct SegmentingEmbedder {
    inner: Arc<dyn Embedder>,
    jieba: Jieba,
}

impl SegmentingEmbedder {
    /// Loads the bundled jieba dictionary
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            jieba: Jieba::new(),
        }
    }

    pub fn segment(&self, text: &str) -> String {
        self.jieba.cut(text, true).join(" ")
    }
}

#[async_trait]
impl Embedder for SegmentingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let segmented = self.segment(text);
        debug!(original = text, segmented = %segmented, "Segmented text for embedding");
        self.inner.embed(&segmented).await
    }
}
