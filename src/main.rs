use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use novel_illustrator::{
    compose, Enhancer, GeminiClient, GenerationRequest, JsonFileStore, ModelCatalog, Orchestrator,
    Provider, ProviderRouter, QueueEvent, Settings, SettingsStore, StatusState,
};

#[derive(Parser)]
#[command(name = "illustrate")]
#[command(about = "Generate illustrations for web-novel passages", long_about = None)]
struct Cli {
    /// JSON settings file (created on first write)
    #[arg(long, global = true, default_value = "illustrator-settings.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compose a prompt from TEXT and generate an image
    Generate {
        text: String,
        /// Provider for this request instead of the selected one
        #[arg(long, value_parser = parse_provider)]
        provider: Option<Provider>,
        /// OpenAI-compatible profile (base URL)
        #[arg(long)]
        profile: Option<String>,
        /// Print the composed prompt and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// List the models a provider offers
    Models {
        #[arg(value_parser = parse_provider)]
        provider: Provider,
        /// Ignore the cached list
        #[arg(long)]
        refresh: bool,
    },
    /// Show or clear the generation history
    History {
        #[arg(long)]
        clear: bool,
        /// Only show the most recent N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Read or write raw settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting
    Get { key: String },
    /// Store a setting; VALUE is parsed as JSON, falling back to a string
    Set { key: String, value: String },
    /// Remove a setting so its default applies
    Unset { key: String },
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    Provider::parse(s).ok_or_else(|| {
        let known: Vec<&str> = Provider::ALL.iter().map(|p| p.as_str()).collect();
        format!("unknown provider '{}' (expected one of: {})", s, known.join(", "))
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = Arc::new(JsonFileStore::new(&cli.settings));

    match cli.command {
        Command::Generate {
            text,
            provider,
            profile,
            dry_run,
        } => generate(store, &text, provider, profile, dry_run).await,
        Command::Models { provider, refresh } => {
            let catalog = ModelCatalog::new(store);
            let models = if refresh {
                catalog.refresh(provider).await?
            } else {
                catalog.models(provider).await?
            };
            for model in models {
                println!("{}", model);
            }
            Ok(())
        }
        Command::History { clear, limit } => {
            let history = novel_illustrator::History::new(store);
            if clear {
                history.clear().await?;
                println!("History cleared");
                return Ok(());
            }
            let entries = history.entries().await?;
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for entry in entries.iter().skip(skip) {
                println!(
                    "{}  {} / {}\n  {}\n  {}",
                    entry.date,
                    entry.provider,
                    entry.model,
                    entry.prompt,
                    shorten_url(&entry.url)
                );
            }
            Ok(())
        }
        Command::Config { action } => config(store.as_ref(), action).await,
    }
}

async fn generate(
    store: Arc<JsonFileStore>,
    text: &str,
    provider: Option<Provider>,
    profile: Option<String>,
    dry_run: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("nothing to illustrate: TEXT is empty");
    }
    let mut settings = Settings::load(store.as_ref()).await?;
    if let Some(provider) = provider {
        settings.provider = provider;
    }

    let enhancer = Enhancer::new(GeminiClient::new());
    let composed = compose(text, &settings, &enhancer).await;
    if let Some(warning) = &composed.warning {
        eprintln!("warning: {}", warning);
    }
    if dry_run {
        println!("{}", composed.prompt);
        return Ok(());
    }
    eprintln!("Prompt: {}", composed.prompt);

    let router = ProviderRouter::new(Arc::clone(&store));
    let (queue, mut events) = Orchestrator::new(router, store);
    queue.enqueue(GenerationRequest::new(composed.prompt, settings.provider).with_profile(profile));

    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::Status {
                state: StatusState::Loading,
                text,
            } => eprintln!("... {}", text),
            QueueEvent::Status { .. } => {}
            QueueEvent::Warning { message } => eprintln!("warning: {}", message),
            QueueEvent::Completed { result } => {
                println!("Generated {} image(s) with {}:", result.image_urls.len(), result.provider);
                for url in &result.image_urls {
                    println!("  {}", shorten_url(url));
                }
                return Ok(());
            }
            QueueEvent::Failed { record } => {
                let hint = if record.reason.retryable {
                    "This is likely temporary; run the command again."
                } else {
                    "Edit the prompt or pick another provider before retrying."
                };
                bail!("{}\n{}", record.reason.message, hint);
            }
            QueueEvent::AuthRequired { message, .. } => {
                bail!(
                    "{}\nSet one with: illustrate config set pollinationsToken <TOKEN>",
                    message
                );
            }
        }
    }
    bail!("generation ended without a result")
}

async fn config(store: &JsonFileStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => match store.get(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(unset)"),
        },
        ConfigAction::Set { key, value } => {
            let parsed = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            store
                .set(&key, parsed)
                .await
                .with_context(|| format!("failed to write {}", store.path().display()))?;
        }
        ConfigAction::Unset { key } => store.remove(&key).await?,
    }
    Ok(())
}

/// Inline images are printed as their size rather than the whole payload.
fn shorten_url(url: &str) -> String {
    match url.split_once(";base64,") {
        Some((head, data)) if url.starts_with("data:") => {
            format!("{};base64,... ({} bytes encoded)", head, data.len())
        }
        _ => url.to_string(),
    }
}
