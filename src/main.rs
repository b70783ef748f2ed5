mod logger;

use std::io::Write;

use anyhow::Context;
use chat_stream_client::config::GPT3_DOT_5_TURBO;
use chat_stream_client::{ChatCompletionMessage, ChatCompletionRequest, Client, ClientConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Send a prompt to the chat completions API")]
struct Args {
    /// Prompt sent as the user message
    prompt: String,

    #[arg(long, default_value = GPT3_DOT_5_TURBO)]
    model: String,

    /// Optional system message placed before the prompt
    #[arg(long)]
    system: Option<String>,

    /// Print tokens as they arrive instead of waiting for the full answer
    #[arg(long)]
    stream: bool,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = ClientConfig::from_env().context("failed to load client configuration")?;
    let client = Client::with_config(config);

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ChatCompletionMessage::system(system));
    }
    messages.push(ChatCompletionMessage::user(args.prompt));

    let mut request = ChatCompletionRequest::new(args.model.clone(), messages);
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }

    if args.stream {
        let mut stream = client.create_chat_completion_stream(request).await?;
        let mut stdout = std::io::stdout().lock();
        let mut chunks = 0u64;

        while let Some(event) = stream.recv().await? {
            if let Some(content) = event.content() {
                stdout.write_all(content.as_bytes())?;
                stdout.flush()?;
                chunks += 1;
            }
        }
        writeln!(stdout)?;
        stream.close();

        // streams report no usage, each content chunk is roughly one token
        logger::log_request("stream", &args.model, chunks);
    } else {
        let response = client.create_chat_completion(request).await?;
        println!("{}", response.content().unwrap_or_default());
        logger::log_request("sync", &response.model, response.usage.total_tokens);
    }

    Ok(())

}
