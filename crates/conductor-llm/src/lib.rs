pub mod converter;
pub mod openai;
pub mod reliable;
pub mod sse;

pub mod mock;

pub use mock::{MockProvider, MockResponse};
pub use openai::ChatCompletionsProvider;
pub use reliable::{ReliableConfig, ReliableProvider};
