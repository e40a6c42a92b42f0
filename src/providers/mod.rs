//! Concrete engines behind the pipeline capability traits.

pub mod openai;
mod sse;

pub use openai::OpenAiProvider;
