use crate::client::ChatBackend;
use crate::protocol::ChatMessage;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const FENCE: &str = "```";

static DETAIL_TEMPLATE: LazyLock<String> = LazyLock::new(|| {
    let schema = serde_json::to_string_pretty(&schema_for!(Vec<TaskStep>)).unwrap_or_default();
    format!(
        "Break the task below into a short, ordered list of concrete steps.\n\
         Reply with a JSON array only, one object per step, in execution order.\n\
         Each object has a short \"step\" title and a one or two sentence \"description\".\n\
         The reply must validate against this JSON schema:\n\
         {schema}\n\n\
         Task:\n"
    )
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskStep {
    #[schemars(description = "Short imperative title of the step")]
    pub step: String,
    #[schemars(description = "What doing this step involves")]
    pub description: String,
}

impl TaskStep {
    pub fn new(step: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            description: description.into(),
        }
    }

    /// Reads a step from any JSON element. Missing fields become empty strings
    /// and non-string fields keep their JSON text; nothing is rejected.
    fn from_value(value: &Value) -> Self {
        Self {
            step: text_field(value, "step"),
            description: text_field(value, "description"),
        }
    }
}

fn text_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub type TaskSteps = Vec<TaskStep>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Success,
    OutOfAttempts,
    ModelError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::OutOfAttempts => write!(f, "OUT_OF_ATTEMPTS"),
            Self::ModelError => write!(f, "MODEL_ERROR"),
        }
    }
}

/// Outcome of [`TaskSplitter::run`]. `steps` is non-empty exactly when
/// `code` is [`ErrorCode::Success`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub steps: TaskSteps,
    pub code: ErrorCode,
}

impl ExtractionResult {
    fn success(steps: TaskSteps) -> Self {
        Self {
            steps,
            code: ErrorCode::Success,
        }
    }

    fn failure(code: ErrorCode) -> Self {
        Self {
            steps: Vec::new(),
            code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

#[derive(Error, Debug)]
enum ReplyError {
    #[error("reply is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("reply is not a JSON array")]
    NotAnArray,

    #[error("reply is an empty array")]
    Empty,
}

/// Removes markdown code fences from a model reply.
///
/// Lines whose trimmed text starts with a fence are dropped entirely, then any
/// fence left inside the remaining lines is deleted.
pub fn strip_code_fences(reply: &str) -> String {
    reply
        .split('\n')
        .filter(|line| !line.trim().starts_with(FENCE))
        .collect::<Vec<_>>()
        .join("\n")
        .replace(FENCE, "")
}

/// An empty array `[]` is rejected and retried rather than returned as an
/// empty success, so a successful split always carries at least one step.
fn parse_steps(reply: &str) -> Result<TaskSteps, ReplyError> {
    let cleaned = strip_code_fences(reply);
    debug!(cleaned = %cleaned, "cleaned model reply");

    match serde_json::from_str::<Value>(&cleaned)? {
        Value::Array(items) if items.is_empty() => Err(ReplyError::Empty),
        Value::Array(items) => Ok(items.iter().map(TaskStep::from_value).collect()),
        _ => Err(ReplyError::NotAnArray),
    }
}

/// Asks a model to decompose free text into ordered [`TaskStep`]s, retrying
/// while the reply does not parse.
pub struct TaskSplitter<'a, B: ?Sized> {
    backend: &'a B,
    prompt_prefix: String,
    max_attempts: u32,
}

impl<'a, B> TaskSplitter<'a, B>
where
    B: ChatBackend + ?Sized,
{
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            prompt_prefix: String::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn prompt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prompt_prefix = prefix.into();
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn full_prompt(&self, user_input: &str) -> String {
        format!("{}{}{}", self.prompt_prefix, DETAIL_TEMPLATE.as_str(), user_input)
    }

    /// A transport or API failure ends the run at once with
    /// [`ErrorCode::ModelError`]; only unparseable replies are retried.
    pub async fn run(&self, user_input: &str) -> ExtractionResult {
        let messages = [ChatMessage::user(self.full_prompt(user_input))];

        for attempt in 1..=self.max_attempts {
            let reply = match self.backend.complete(&messages).await {
                Ok(reply) => reply,
                Err(err) => {
                    error!(attempt, error = %err, "task split request failed");
                    return ExtractionResult::failure(ErrorCode::ModelError);
                }
            };
            debug!(attempt, reply = %reply, "task split reply");

            match parse_steps(&reply) {
                Ok(steps) => return ExtractionResult::success(steps),
                Err(err) => warn!(attempt, error = %err, "discarding task split reply"),
            }
        }

        ExtractionResult::failure(ErrorCode::OutOfAttempts)
    }
}

pub async fn split_tasks<B>(backend: &B, user_input: &str, prompt_prefix: &str) -> ExtractionResult
where
    B: ChatBackend + ?Sized,
{
    TaskSplitter::new(backend)
        .prompt_prefix(prompt_prefix)
        .run(user_input)
        .await
}
