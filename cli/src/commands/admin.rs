use clap::Subcommand;
use serde_json::json;

use crate::util::{admin_pool, exit_error, to_pretty};

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Create a webhook token for a user (requires DATABASE_URL)
    CreateWebhookToken {
        /// User UUID
        #[arg(long)]
        user_id: String,
        /// Human-readable label (e.g. "iphone-health-export")
        #[arg(long)]
        label: String,
    },
    /// Link an aggregator account to a user (requires DATABASE_URL)
    LinkProvider {
        /// User UUID
        #[arg(long)]
        user_id: String,
        /// Provider tag
        #[arg(long, default_value = "vital")]
        provider: String,
        /// The provider's id for this user (the event `user_id`)
        #[arg(long)]
        provider_user_id: String,
    },
}

pub async fn run(command: AdminCommands) -> i32 {
    match command {
        AdminCommands::CreateWebhookToken { user_id, label } => {
            create_webhook_token(&user_id, &label).await
        }
        AdminCommands::LinkProvider {
            user_id,
            provider,
            provider_user_id,
        } => link_provider(&user_id, &provider, &provider_user_id).await,
    }
}

fn parse_user_id(raw: &str) -> uuid::Uuid {
    match uuid::Uuid::parse_str(raw.trim()) {
        Ok(u) => u,
        Err(e) => exit_error(&format!("Invalid user UUID: {e}"), None),
    }
}

async fn create_webhook_token(user_id_str: &str, label: &str) -> i32 {
    let user_id = parse_user_id(user_id_str);
    let pool = admin_pool().await;

    let (full_token, token_hash) = biosync_core::auth::generate_webhook_token();
    let prefix = biosync_core::auth::token_prefix(&full_token);
    let token_id = uuid::Uuid::now_v7();

    if let Err(e) = sqlx::query(
        "INSERT INTO webhook_tokens (id, user_id, label, token_hash, token_prefix) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(token_id)
    .bind(user_id)
    .bind(label)
    .bind(&token_hash)
    .bind(&prefix)
    .execute(&pool)
    .await
    {
        exit_error(&format!("Failed to create webhook token: {e}"), None);
    }

    let output = json!({
        "token_id": token_id,
        "user_id": user_id,
        "webhook_token": full_token,
        "token_prefix": prefix,
        "label": label,
        "webhook_url_path": "/v1/webhooks/health-export",
        "warning": "Store this token securely. It will NOT be shown again."
    });
    println!("{}", to_pretty(&output));
    0
}

async fn link_provider(user_id_str: &str, provider: &str, provider_user_id: &str) -> i32 {
    let user_id = parse_user_id(user_id_str);
    let provider_user_id = provider_user_id.trim();
    if provider_user_id.is_empty() {
        exit_error("--provider-user-id must not be empty", None);
    }
    let pool = admin_pool().await;

    let linked_at: Result<chrono::DateTime<chrono::Utc>, sqlx::Error> = sqlx::query_scalar(
        "INSERT INTO provider_connections (id, user_id, provider, provider_account_id) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (provider, provider_account_id) DO UPDATE \
         SET user_id = EXCLUDED.user_id, revoked_at = NULL, updated_at = NOW() \
         RETURNING updated_at",
    )
    .bind(uuid::Uuid::now_v7())
    .bind(user_id)
    .bind(provider)
    .bind(provider_user_id)
    .fetch_one(&pool)
    .await;

    match linked_at {
        Ok(linked_at) => {
            let output = json!({
                "user_id": user_id,
                "provider": provider,
                "provider_user_id": provider_user_id,
                "linked_at": linked_at,
            });
            println!("{}", to_pretty(&output));
            0
        }
        Err(e) => exit_error(&format!("Failed to link provider: {e}"), None),
    }
}
