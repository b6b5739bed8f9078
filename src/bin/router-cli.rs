use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "router-cli")]
#[command(about = "Inspect a running edge-router through its admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long)]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Router version
    Version,
    /// Generation, content hash and entry counts of the live graph
    Overview,
    /// List routers, or show one
    Routers { name: Option<String> },
    /// List services with server health, or show one
    Services { name: Option<String> },
    /// List middlewares
    Middlewares,
    /// Configuration entries rejected by validation
    Errors,
    /// The live dynamic configuration
    Raw,
}

impl Commands {
    fn path(&self) -> String {
        match self {
            Commands::Version => "/api/version".to_string(),
            Commands::Overview => "/api/overview".to_string(),
            Commands::Routers { name: None } => "/api/http/routers".to_string(),
            Commands::Routers { name: Some(name) } => format!("/api/http/routers/{}", name),
            Commands::Services { name: None } => "/api/http/services".to_string(),
            Commands::Services { name: Some(name) } => format!("/api/http/services/{}", name),
            Commands::Middlewares => "/api/http/middlewares".to_string(),
            Commands::Errors => "/api/errors".to_string(),
            Commands::Raw => "/api/rawdata".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path()))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
