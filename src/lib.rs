//! On-device LLM inference session management.
//!
//! This crate owns the hard part of serving an interactive language model
//! from a single native handle: a session state machine that serializes
//! load/generate/unload against the non-reentrant engine, a scheduler that
//! drives the step-wise decode loop on a blocking thread, an ordered result
//! channel streaming fragments back to the caller, and a lifecycle guard
//! that releases the native handle exactly once.
//!
//! The engine itself is pluggable through [`runtime::ModelRuntime`]; a real
//! llama.cpp adapter is available behind the `llamacpp` feature and a
//! deterministic stub ships for tests and demos.
//!
//! ```
//! use lmstream_core::runtime::{StubBehavior, StubRuntime};
//! use lmstream_core::{InferenceSession, LoadConfig, SamplingConfig, StreamEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> lmstream_core::Result<()> {
//! let behavior = StubBehavior { require_existing_path: false, ..Default::default() };
//! let session = InferenceSession::new(StubRuntime::new(behavior));
//!
//! session.load_model("demo.bin", LoadConfig::default()).await?;
//! let sampling = SamplingConfig { max_tokens: 2, ..Default::default() };
//! let mut stream = session.generate("hello", sampling).await?;
//!
//! loop {
//!     match stream.next_event().await? {
//!         StreamEvent::Fragment(fragment) => print!("{}", fragment.text),
//!         StreamEvent::Terminal(signal) => {
//!             println!(" [{signal}]");
//!             break;
//!         }
//!     }
//! }
//! session.unload().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod runtime;
mod scheduler;
pub mod session;
pub mod stream;
pub mod types;

pub use config::{LoadConfig, SamplingConfig};
pub use error::{ChannelError, Error, LoadError, Result, StepError};
pub use guard::HandleGuard;
pub use session::InferenceSession;
pub use stream::{GenerationStream, StreamEvent};
pub use types::{
    GenerationFragment, GenerationRequest, RequestId, SessionState, TerminationSignal, TokenId,
};
