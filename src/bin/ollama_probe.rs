//! ollama-probe: manual checks against a local Ollama server.
//!
//! `chat` sends a single user message to /api/chat, `image` asks a vision
//! model to describe an image through /api/generate. Results go to stdout.

use std::path::{Path, PathBuf};
use std::time::Instant;

use base64::Engine;
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "gemma3:4b";

#[derive(Parser, Debug)]
#[command(name = "ollama-probe", about = "Send test prompts to a local Ollama server")]
struct Args {
    /// Ollama base URL
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a single question through the chat endpoint
    Chat {
        prompt: String,
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,
    },
    /// Describe an image with a vision model
    Image {
        path: PathBuf,
        #[arg(short, long, default_value = "Describe esta imagen")]
        prompt: String,
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,
    },
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

fn describe_error(host: &str, e: &reqwest::Error) -> String {
    if e.is_connect() {
        format!("Error: cannot connect to Ollama at {host}. Make sure it is running.")
    } else if e.is_status() {
        format!("HTTP error: {e}")
    } else if e.is_decode() {
        format!("Error decoding JSON: {e}")
    } else {
        format!("Unexpected error: {e}")
    }
}

async fn chat(
    client: &Client,
    host: &str,
    model: &str,
    prompt: &str,
) -> Result<String, reqwest::Error> {
    let body = json!({
        "model": model,
        "messages": [{"role": "user", "content": prompt}],
        "stream": false
    });

    let data: ChatResponse = client
        .post(format!("{host}/api/chat"))
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(data
        .message
        .map(|m| m.content)
        .unwrap_or_else(|| "No response".to_string()))
}

fn encode_image(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

async fn describe_image(
    client: &Client,
    host: &str,
    model: &str,
    prompt: &str,
    image_b64: String,
) -> Result<String, reqwest::Error> {
    let body = json!({
        "model": model,
        "prompt": prompt,
        "images": [image_b64],
        "stream": false
    });

    let data: GenerateResponse = client
        .post(format!("{host}/api/generate"))
        .json(&body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(data.response.unwrap_or_else(|| "No response".to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let host = args.host.trim_end_matches('/');
    let client = Client::new();
    let t0 = Instant::now();

    let result = match &args.command {
        Command::Chat { prompt, model } => {
            println!("Connecting to Ollama ({model})...");
            chat(&client, host, model, prompt).await
        }
        Command::Image { path, prompt, model } => {
            let image_b64 = match encode_image(path) {
                Ok(b64) => b64,
                Err(e) => {
                    eprintln!("Error loading image {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            println!("Analyzing image: {}", path.display());
            println!("Prompt: {prompt}");
            describe_image(&client, host, model, prompt, image_b64).await
        }
    };

    match result {
        Ok(text) => {
            println!("Model response ({}ms):", t0.elapsed().as_millis());
            println!("{text}");
        }
        Err(e) => {
            eprintln!("{}", describe_error(host, &e));
            std::process::exit(1);
        }
    }
}
