use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{load_settings, ConversationSync, MemoryCredentials};
use serde_json::json;
use shared::{domain::ConversationId, protocol::UpdateConversationRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides `api_base_url` from client.toml / the environment.
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, env = "HUB_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    Show {
        id: String,
    },
    Messages {
        id: String,
    },
    Send {
        content: String,
        #[arg(long)]
        conversation: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    Search {
        query: String,
    },
    Rename {
        id: String,
        title: String,
    },
    Delete {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings().context("failed to load client settings")?;
    if let Some(base_url) = cli.base_url {
        settings.api_base_url = base_url;
    }
    info!(api_base_url = %settings.api_base_url, "chat_cli: starting");

    let credentials = Arc::new(MemoryCredentials::new(cli.token));
    let sync = ConversationSync::from_settings(&settings, credentials)?;

    let output = match cli.command {
        Command::List { page } => {
            let mut query = sync.default_list_query();
            query.page = page;
            let conversations = sync.load_list(query).await;
            fail_on_recorded_error(&sync)?;
            serde_json::to_value(conversations)?
        }
        Command::Show { id } => {
            let conversation = sync.load_one(&ConversationId::from(id)).await?;
            serde_json::to_value(conversation)?
        }
        Command::Messages { id } => {
            let messages = sync.load_messages(&ConversationId::from(id)).await;
            fail_on_recorded_error(&sync)?;
            serde_json::to_value(messages)?
        }
        Command::Send {
            content,
            conversation,
            model,
        } => {
            let conversation = conversation.map(ConversationId::from);
            let outcome = sync.send(&content, conversation.as_ref(), model).await?;
            json!({
                "conversation_id": outcome.conversation_id,
                "created": outcome.created,
                "reconciled": outcome.reconciled,
                "messages": outcome.messages,
            })
        }
        Command::Search { query } => {
            let found = sync.search(&query).await;
            fail_on_recorded_error(&sync)?;
            serde_json::to_value(found)?
        }
        Command::Rename { id, title } => {
            let changes = UpdateConversationRequest {
                title: Some(title),
                summary: None,
            };
            let updated = sync
                .update_conversation(&ConversationId::from(id), &changes)
                .await?;
            serde_json::to_value(updated)?
        }
        Command::Delete { id } => {
            let id = ConversationId::from(id);
            sync.delete_conversation(&id).await?;
            json!({ "deleted": id.normalize() })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Read operations absorb failures into the synchronizer state; surface them
/// as a non-zero exit here.
fn fail_on_recorded_error(sync: &ConversationSync) -> Result<()> {
    if let Some(err) = sync.error() {
        bail!("request failed: {err}");
    }
    Ok(())
}
