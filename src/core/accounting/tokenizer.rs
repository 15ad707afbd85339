//! Tokenizer encoder cache
//!
//! Offline token counting for requests whose upstream never reported usage.
//! Encoders are expensive to build, so they live in a process-wide map keyed
//! by tokenizer name.

use std::sync::Arc;

use dashmap::DashMap;
use tiktoken_rs::CoreBPE;
use tracing::warn;

use crate::utils::error::{GatewayError, Result};

const DEFAULT_TOKENIZER: &str = "cl100k_base";

/// Process-wide encoder cache
#[derive(Default)]
pub struct TokenizerCache {
    encoders: DashMap<String, Arc<CoreBPE>>,
}

impl TokenizerCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Count tokens in `text` with the named tokenizer.
    ///
    /// Unknown names fall back to `cl100k_base`, which over-counts slightly
    /// for exotic vocabularies but keeps accounting moving.
    pub fn count_tokens(&self, tokenizer_name: Option<&str>, text: &str) -> Result<usize> {
        let name = tokenizer_name.unwrap_or(DEFAULT_TOKENIZER);
        let encoder = self.encoder(name)?;
        Ok(encoder.encode_with_special_tokens(text).len())
    }

    fn encoder(&self, name: &str) -> Result<Arc<CoreBPE>> {
        if let Some(found) = self.encoders.get(name) {
            return Ok(found.clone());
        }

        let built = build_encoder(name)?;
        let encoder = Arc::new(built);
        self.encoders.insert(name.to_string(), encoder.clone());
        Ok(encoder)
    }
}

fn build_encoder(name: &str) -> Result<CoreBPE> {
    let result = match name {
        "o200k_base" => tiktoken_rs::o200k_base(),
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
        other => {
            warn!("Unknown tokenizer '{}', using {}", other, DEFAULT_TOKENIZER);
            tiktoken_rs::cl100k_base()
        }
    };
    result.map_err(|e| GatewayError::Internal(format!("failed to build tokenizer '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_stable_and_cached() {
        let cache = TokenizerCache::new();
        let a = cache.count_tokens(Some("cl100k_base"), "hello world").unwrap();
        let b = cache.count_tokens(Some("cl100k_base"), "hello world").unwrap();
        assert_eq!(a, b);
        assert!(a > 0);
        assert_eq!(cache.encoders.len(), 1);
    }

    #[test]
    fn unknown_names_fall_back() {
        let cache = TokenizerCache::new();
        let n = cache.count_tokens(Some("weird_vocab"), "hello").unwrap();
        assert!(n > 0);
    }

    #[test]
    fn empty_text_counts_zero() {
        let cache = TokenizerCache::new();
        assert_eq!(cache.count_tokens(None, "").unwrap(), 0);
    }
}
