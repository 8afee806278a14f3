//! LLM CLI invocation layer.
//!
//! External language models are reached exclusively through their
//! command-line tools: the prompt goes to stdin, the response comes back
//! on stdout, and everything crossing that boundary is forced to 7-bit
//! ASCII because the host terminal encoding cannot be assumed.

pub mod invoker;
pub mod registry;
pub mod sanitize;
pub mod types;

pub use invoker::{CliInvoker, LlmInvoker, ScriptedInvoker};
pub use registry::{ProviderError, ProviderRegistry};
pub use types::{ComplexityScore, InvokeError, InvokeOutput, ProviderSpec};
