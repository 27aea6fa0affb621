use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facereg", about = "Face registration and recognition client")]
struct Cli {
    /// Base URL of the faceregd server
    #[arg(long, env = "FACEREG_URL", default_value = "http://127.0.0.1:8000", global = true)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person from a photo
    Register {
        /// Name to register the face under
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// Identify the person in a photo
    Recognize { image: PathBuf },
    /// Identify the person in a photo and fetch their stored images
    FaceSearch {
        image: PathBuf,
        /// Write the returned images into this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch the stored images of a named person
    PersonSearch {
        name: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Attach an image to a person
    AddFace {
        #[arg(short, long)]
        person: String,
        /// Document the image belongs to
        #[arg(short, long)]
        document: String,
        image: PathBuf,
    },
    /// Show server status
    Status,
}

/// Body of a search response.
#[derive(Debug, Deserialize)]
struct SearchResult {
    user_name: String,
    document: Vec<String>,
    files: Vec<String>,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, form: Form) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base, path);
        tracing::debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("sending request to {url}"))?;
        read_json(response).await
    }

    async fn get(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base, path);
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("sending request to {url}"))?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    let body = response.bytes().await.context("reading response")?;
    parse_body(status, &body)
}

/// Decode a response body; non-success statuses become errors carrying the
/// server's message.
fn parse_body(status: reqwest::StatusCode, body: &[u8]) -> Result<serde_json::Value> {
    if !status.is_success() {
        let parsed: serde_json::Value = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
        let message = parsed["message"].as_str().unwrap_or("request failed");
        bail!("{status}: {message}");
    }
    serde_json::from_slice(body).context("decoding response")
}

async fn image_part(path: &Path) -> Result<Part> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}

/// File name for the `n`th image of a search result.
fn output_name(document_id: &str, n: usize) -> String {
    let safe: String = document_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}.{n}.img")
}

/// Decode and write every file of `result` into `dir`.
fn save_files(dir: &Path, result: &SearchResult) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = Vec::with_capacity(result.files.len());
    for (n, (document_id, data)) in result.document.iter().zip(&result.files).enumerate() {
        let bytes = BASE64
            .decode(data)
            .with_context(|| format!("decoding image {n} of {document_id}"))?;
        let path = dir.join(output_name(document_id, n));
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn print_search(body: serde_json::Value, out: Option<&Path>) -> Result<()> {
    let result: SearchResult = serde_json::from_value(body).context("unexpected search response")?;
    println!("Person: {}", result.user_name);
    println!("Documents: {}", result.document.join(", "));
    match out {
        Some(dir) => {
            for path in save_files(dir, &result)? {
                println!("  wrote {}", path.display());
            }
        }
        None => println!("{} image(s); pass --out DIR to save them", result.files.len()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server);

    match cli.command {
        Commands::Register { name, image } => {
            let form = Form::new()
                .text("user_name", name)
                .part("file", image_part(&image).await?);
            let body = client.post("/register/", form).await?;
            println!("Registered: {}", body["user_name"].as_str().unwrap_or_default());
        }
        Commands::Recognize { image } => {
            let form = Form::new().part("file", image_part(&image).await?);
            let body = client.post("/recognize", form).await?;
            println!(
                "Recognized: {} (distance {})",
                body["user_name"].as_str().unwrap_or_default(),
                body["distance"]
            );
        }
        Commands::FaceSearch { image, out } => {
            let form = Form::new().part("file", image_part(&image).await?);
            let body = client.post("/face_search", form).await?;
            print_search(body, out.as_deref())?;
        }
        Commands::PersonSearch { name, out } => {
            let form = Form::new().text("user_name", name);
            let body = client.post("/person_search", form).await?;
            print_search(body, out.as_deref())?;
        }
        Commands::AddFace {
            person,
            document,
            image,
        } => {
            let form = Form::new()
                .text("person", person)
                .text("document_id", document)
                .part("file", image_part(&image).await?);
            let body = client.post("/faces", form).await?;
            println!("Stored face {}", body["id"].as_str().unwrap_or_default());
        }
        Commands::Status => {
            let body = client.get("/status").await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}
