//! llama.cpp runtime engine implementation.
//!
//! Wraps `llama-cpp-2` behind the [`ModelRuntime`] contract: the backend,
//! model and context parameters live in the handle; a per-request stepper
//! owns the decode context, batch and sampler chain for exactly one
//! generation.

use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::{
    context::params::LlamaContextParams,
    context::LlamaContext,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{params::LlamaModelParams, AddBos, LlamaModel, Special},
    sampling::LlamaSampler,
    token::LlamaToken,
};
use tracing::{debug, info};

use crate::config::{LoadConfig, SamplingConfig};
use crate::error::{LoadError, StepError};
use crate::runtime::{ModelRuntime, StepOutcome, TokenStepper};
use crate::types::TokenId;

/// Runtime engine backed by llama.cpp.
pub struct LlamaCppRuntime;

impl LlamaCppRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LlamaCppRuntime {
    fn default() -> Self {
        Self::new()
    }
}

struct LoadedModel {
    backend: LlamaBackend,
    model: LlamaModel,
    context_params: LlamaContextParams,
    batch_size: usize,
}

/// Native handle. `release` drops the loaded model, freeing the weights;
/// the empty shell stays behind so release is idempotent.
pub struct LlamaCppHandle {
    inner: Option<LoadedModel>,
}

fn model_params(config: &LoadConfig) -> LlamaModelParams {
    let mut params = LlamaModelParams::default().with_use_mmap(config.use_mmap);
    if let Some(gpu_layers) = config.gpu_layers {
        params = params.with_n_gpu_layers(gpu_layers as u32);
    }
    params
}

fn context_params(config: &LoadConfig) -> LlamaContextParams {
    let mut params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(config.context_length as u32))
        .with_n_batch(config.batch_size as u32);
    if let Some(threads) = config.cpu_threads {
        params = params.with_n_threads(threads as i32);
    }
    params
}

fn build_sampler(sampling: &SamplingConfig) -> LlamaSampler {
    let mut chain = Vec::new();
    if let Some(top_k) = sampling.top_k {
        chain.push(LlamaSampler::top_k(top_k as i32));
    }
    if sampling.top_p < 1.0 {
        chain.push(LlamaSampler::top_p(sampling.top_p, 1));
    }
    if sampling.temperature <= 0.0 {
        chain.push(LlamaSampler::greedy());
    } else {
        chain.push(LlamaSampler::temp(sampling.temperature));
        chain.push(LlamaSampler::dist(sampling.seed.unwrap_or(1234)));
    }
    LlamaSampler::chain_simple(chain)
}

impl ModelRuntime for LlamaCppRuntime {
    type Handle = LlamaCppHandle;
    type Stepper<'h>
        = LlamaCppStepper<'h>
    where
        Self: 'h;

    fn load(&self, path: &Path, config: &LoadConfig) -> Result<LlamaCppHandle, LoadError> {
        if !path.exists() {
            return Err(LoadError::FileNotFound(path.display().to_string()));
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("gguf") {
            return Err(LoadError::UnsupportedFormat(path.display().to_string()));
        }

        let backend = LlamaBackend::init()
            .map_err(|e| LoadError::Corrupt(format!("backend init failed: {e:?}")))?;

        let model = LlamaModel::load_from_file(&backend, path, &model_params(config))
            .map_err(|e| {
                let reason = format!("{e:?}");
                if reason.to_lowercase().contains("memory") {
                    LoadError::OutOfMemory(reason)
                } else {
                    LoadError::Corrupt(reason)
                }
            })?;

        info!(
            path = %path.display(),
            parameters = model.n_params(),
            vocab = model.n_vocab(),
            "loaded gguf model"
        );

        Ok(LlamaCppHandle {
            inner: Some(LoadedModel {
                backend,
                model,
                context_params: context_params(config),
                batch_size: config.batch_size,
            }),
        })
    }

    fn tokenize(&self, handle: &LlamaCppHandle, text: &str) -> Result<Vec<TokenId>, StepError> {
        let inner = handle
            .inner
            .as_ref()
            .ok_or_else(|| StepError::poisoned("handle already released"))?;
        let tokens = inner
            .model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| StepError::new(format!("tokenization failed: {e:?}")))?;
        Ok(tokens.into_iter().map(|t| TokenId(t.0)).collect())
    }

    fn begin<'h>(
        &self,
        handle: &'h mut LlamaCppHandle,
        prompt: &[TokenId],
        sampling: &SamplingConfig,
    ) -> Result<LlamaCppStepper<'h>, StepError> {
        let inner: &'h LoadedModel = handle
            .inner
            .as_ref()
            .ok_or_else(|| StepError::poisoned("handle already released"))?;

        let mut ctx = inner
            .model
            .new_context(&inner.backend, inner.context_params.clone())
            .map_err(|e| StepError::new(format!("context creation failed: {e:?}")))?;

        let mut batch = LlamaBatch::new(inner.batch_size.max(prompt.len()), 1);
        for (i, token) in prompt.iter().enumerate() {
            let is_last = i == prompt.len() - 1;
            batch
                .add(LlamaToken(token.0), i as i32, &[0], is_last)
                .map_err(|e| StepError::new(format!("batch add failed: {e:?}")))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| StepError::new(format!("prompt decode failed: {e:?}")))?;
        debug!(prompt_tokens = prompt.len(), "prompt fed to context");

        Ok(LlamaCppStepper {
            model: &inner.model,
            ctx,
            batch,
            sampler: build_sampler(sampling),
            pos: prompt.len() as i32,
        })
    }

    fn release(&self, handle: &mut LlamaCppHandle) {
        // dropping the loaded model frees the native weights; a second call
        // finds the shell empty and does nothing
        if handle.inner.take().is_some() {
            info!("llama.cpp model released");
        }
    }
}

/// Stepper driving one request against a borrowed handle.
pub struct LlamaCppStepper<'h> {
    model: &'h LlamaModel,
    ctx: LlamaContext<'h>,
    batch: LlamaBatch,
    sampler: LlamaSampler,
    pos: i32,
}

impl TokenStepper for LlamaCppStepper<'_> {
    fn step(&mut self) -> Result<StepOutcome, StepError> {
        let token = self.sampler.sample(&self.ctx, self.batch.n_tokens() - 1);
        self.sampler.accept(token);

        if self.model.is_eog_token(token) {
            return Ok(StepOutcome::EndOfSequence);
        }

        let bytes = self
            .model
            .token_to_bytes(token, Special::Tokenize)
            .map_err(|e| StepError::new(format!("token decode failed: {e:?}")))?;
        let piece = String::from_utf8_lossy(&bytes).into_owned();

        self.batch.clear();
        self.batch
            .add(token, self.pos, &[0], true)
            .map_err(|e| StepError::new(format!("batch add failed: {e:?}")))?;
        self.pos += 1;
        self.ctx
            .decode(&mut self.batch)
            .map_err(|e| StepError::new(format!("decode failed: {e:?}")))?;

        Ok(StepOutcome::Piece(piece))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_missing_and_non_gguf_paths() {
        let runtime = LlamaCppRuntime::new();
        let err = runtime
            .load(Path::new("/no/such/model.gguf"), &LoadConfig::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound(_)));

        let file = tempfile::Builder::new()
            .suffix(".safetensors")
            .tempfile()
            .unwrap();
        let err = runtime
            .load(file.path(), &LoadConfig::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn greedy_sampler_for_zero_temperature() {
        // smoke check that the chain builds for both sampling modes
        let _ = build_sampler(&SamplingConfig {
            temperature: 0.0,
            ..Default::default()
        });
        let _ = build_sampler(&SamplingConfig {
            temperature: 0.8,
            top_k: Some(40),
            top_p: 0.95,
            ..Default::default()
        });
    }
}
