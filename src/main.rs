use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use taskflow::settings::find_provider;
use taskflow::{
    ChatClient, ChatMessage, ErrorCallback, Settings, TaskSplitter, split_tasks, stream_chat,
};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

type MainResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "taskflow", about = "Chat with and split tasks via OpenAI-compatible endpoints")]
struct Cli {
    /// Built-in provider preset; sets base URL and model
    #[arg(long, env = "LLM_PROVIDER")]
    provider: Option<String>,

    #[arg(long, env = "LLM_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a reply to a single prompt
    Chat {
        #[arg(long)]
        system: Option<String>,
        prompt: String,
    },
    /// Break a task description into ordered steps, printed as JSON
    Split {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long)]
        attempts: Option<u32>,
        input: String,
    },
    /// List the backend's chat models
    Models,
    /// Check that the backend accepts the credentials
    Ping,
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    let client = ChatClient::new(settings.backend());

    match cli.command {
        Command::Chat { system, prompt } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt));
            run_chat(client, messages).await
        }
        Command::Split {
            prefix,
            attempts,
            input,
        } => {
            let result = match attempts {
                Some(attempts) => {
                    TaskSplitter::new(&client)
                        .prompt_prefix(prefix)
                        .max_attempts(attempts)
                        .run(&input)
                        .await
                }
                None => split_tasks(&client, &input, &prefix).await,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                return Err(format!("task split failed: {}", result.code).into());
            }
            Ok(())
        }
        Command::Models => {
            for model in client.list_models().await? {
                println!("{}", model);
            }
            Ok(())
        }
        Command::Ping => {
            if client.test_connection().await {
                println!("ok");
                Ok(())
            } else {
                Err("connection check failed".into())
            }
        }
    }
}

fn resolve_settings(cli: &Cli) -> MainResult<Settings> {
    let mut settings = Settings::default();

    if let Some(provider) = &cli.provider {
        if find_provider(provider).is_none() {
            return Err(format!("unknown provider: {}", provider).into());
        }
        if settings.select_provider(provider) {
            debug!(provider = %settings.provider, "provider selected");
        }
    }
    if let Some(base_url) = &cli.base_url {
        if settings.set_base_url(base_url) {
            debug!(base_url = %settings.base_url, "base URL overridden");
        }
    }
    if let Some(model) = &cli.model {
        if settings.set_model(model) {
            debug!(model = %settings.model, "model overridden");
        }
    }
    if let Some(api_key) = &cli.api_key {
        settings.set_api_key(api_key);
    }

    Ok(settings)
}

async fn run_chat(client: ChatClient, messages: Vec<ChatMessage>) -> MainResult<()> {
    let on_error: ErrorCallback = Arc::new(|message: &str| {
        error!(message, "chat stream failed");
    });

    let mut stream = stream_chat(Arc::new(client), messages, Some(on_error));
    let mut stdout = std::io::stdout();

    while let Some(item) = stream.next().await {
        if let Some(err) = item.error {
            writeln!(stdout)?;
            return Err(err.into());
        }
        if item.is_complete {
            writeln!(stdout)?;
            break;
        }
        write!(stdout, "{}", item.content)?;
        stdout.flush()?;
    }

    Ok(())
}
