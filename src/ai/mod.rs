//! AI Integration Layer
//!
//! Provider abstraction, prompt templates, response validation, and the
//! quota guard plus retry policy that gate every AI call.

pub mod prompt;
pub mod provider;
pub mod quota;
pub mod retry;
pub mod validation;

pub use prompt::{PromptBuilder, PromptSection, PromptTemplates};
pub use provider::{
    LlmProvider, LlmResponse, OpenAiProvider, ResponseMetadata, ResponseTiming, SharedProvider,
    TokenUsage, create_provider,
};
pub use quota::{ManualClock, QuotaGuard, SharedQuotaGuard, SystemClock, WindowClock};
pub use retry::RetryPolicy;
pub use validation::{BatchResults, BatchSchema, extract_json, extract_json_from_response};
