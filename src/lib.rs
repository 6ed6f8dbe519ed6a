pub mod client;
pub mod error;
pub mod protocol;
pub mod settings;
pub mod stream;
pub mod tasks;

pub use client::{BackendConfig, ChatBackend, ChatClient, GenerationParams};
pub use error::{ClientError, ClientResult};
pub use protocol::{ChatMessage, Role, StreamResponse};
pub use settings::{PROVIDERS, ProviderPreset, Settings};
pub use stream::{ErrorCallback, SseDecoder, SseEvent, stream_chat};
pub use tasks::{ErrorCode, ExtractionResult, TaskSplitter, TaskStep, TaskSteps, split_tasks};
