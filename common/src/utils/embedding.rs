use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tracing::debug;

use crate::{
    error::AppError,
    llm::{
        limiter::{limiter_for, TokenBucket},
        provider::RequestContext,
        retry::call_with_retries,
    },
};

/// Batch caps: a request is cut when either limit would be exceeded.
pub const MAX_BATCH_INPUTS: usize = 96;
pub const MAX_BATCH_CHARS: usize = 6000;

/// Order-preserving, batching text embedder bound to one provider context.
pub struct Embedder {
    client: Client<OpenAIConfig>,
    model: String,
    limiter: Arc<TokenBucket>,
    /// Provider dimension discovered on the first successful call; zero until
    /// then.
    dimension: AtomicUsize,
}

impl Embedder {
    pub fn new(ctx: &RequestContext) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&ctx.api_key)
                .with_api_base(ctx.provider.base_url()),
        );
        let limiter = limiter_for(ctx.provider, &ctx.api_key);

        Self {
            client,
            model: ctx.model.clone(),
            limiter,
            dimension: AtomicUsize::new(0),
        }
    }

    /// Embedding dimension reported by the provider, once known.
    pub fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Embed a slice of texts, preserving input order across batches.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in split_batches(texts, MAX_BATCH_INPUTS, MAX_BATCH_CHARS) {
            let mut batch_vectors = self.embed_batch(batch).await?;
            vectors.append(&mut batch_vectors);
        }

        Ok(vectors)
    }

    /// Single-text convenience used by the query path.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.limiter.acquire().await;

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(batch.to_vec())
            .build()?;

        let response = call_with_retries("embedding", || {
            let request = request.clone();
            async move { self.client.embeddings().create(request).await }
        })
        .await?;

        if response.data.len() != batch.len() {
            return Err(AppError::LLMParsing(format!(
                "embedding response returned {} vectors for {} inputs",
                response.data.len(),
                batch.len()
            )));
        }

        // Responses carry an index per datum; order by it rather than trusting
        // wire order.
        let mut data = response.data;
        data.sort_by_key(|d| d.index);

        if let Some(first) = data.first() {
            let dimension = first.embedding.len();
            self.dimension.store(dimension, Ordering::Relaxed);
            debug!(dimension, batch_len = batch.len(), "embedded batch");
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Cut `texts` into contiguous batches respecting both caps. A single
/// oversized text still forms its own batch.
fn split_batches(texts: &[String], max_inputs: usize, max_chars: usize) -> Vec<&[String]> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut chars = 0usize;

    for (i, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        let at_capacity = i > start && (i - start >= max_inputs || chars + len > max_chars);
        if at_capacity {
            batches.push(&texts[start..i]);
            start = i;
            chars = 0;
        }
        chars += len;
    }

    if start < texts.len() {
        batches.push(&texts[start..]);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(sizes: &[usize]) -> Vec<String> {
        sizes.iter().map(|n| "x".repeat(*n)).collect()
    }

    #[test]
    fn split_respects_input_cap() {
        let inputs = texts(&[1; 10]);
        let batches = split_batches(&inputs, 4, 1_000_000);
        let lens: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
    }

    #[test]
    fn split_respects_char_cap() {
        let inputs = texts(&[4000, 4000, 4000]);
        let batches = split_batches(&inputs, 96, 6000);
        assert_eq!(batches.len(), 3, "4000 + 4000 exceeds the 6000-char cap");
    }

    #[test]
    fn oversized_single_text_forms_own_batch() {
        let inputs = texts(&[10_000, 5]);
        let batches = split_batches(&inputs, 96, 6000);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn split_preserves_order_and_coverage() {
        let inputs: Vec<String> = (0..25).map(|i| format!("text-{i}")).collect();
        let batches = split_batches(&inputs, 7, 1_000_000);

        let rejoined: Vec<String> = batches.iter().flat_map(|b| b.iter().cloned()).collect();
        assert_eq!(rejoined, inputs);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let inputs: Vec<String> = Vec::new();
        assert!(split_batches(&inputs, 96, 6000).is_empty());
    }
}
