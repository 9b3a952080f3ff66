//! Load and sampling configuration.

use serde::{Deserialize, Serialize};

/// Options applied when materializing a model file into a native context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Context window size in tokens.
    pub context_length: usize,
    /// Batch size used while decoding the prompt.
    pub batch_size: usize,
    /// Number of CPU threads for inference; runtime default when unset.
    pub cpu_threads: Option<usize>,
    /// Layers to offload to the GPU; CPU-only when unset.
    pub gpu_layers: Option<usize>,
    /// Memory-map the weight file instead of reading it eagerly.
    pub use_mmap: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            context_length: 2048,
            batch_size: 512,
            cpu_threads: None,
            gpu_layers: None,
            use_mmap: true,
        }
    }
}

/// Sampling policy for one generation request. Immutable once submitted.
///
/// The numeric sampling semantics live in the runtime adapter; the session
/// core only forwards these knobs and enforces `max_tokens` and
/// `stop_sequences`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub top_p: f32,
    /// Upper bound on produced tokens for this request.
    pub max_tokens: usize,
    /// Generation completes as soon as any of these appears in the output.
    pub stop_sequences: Vec<String>,
    pub seed: Option<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: None,
            top_p: 1.0,
            max_tokens: 256,
            stop_sequences: Vec::new(),
            seed: None,
        }
    }
}
