use clap::{Parser, Subcommand};

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "biosync",
    version,
    about = "Biosync operator CLI: replay and inspect webhook payloads, manage tokens and provider links"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "BIOSYNC_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API and database health
    Health,
    /// Post a saved health-export payload to the webhook
    Ingest {
        /// Payload JSON file (use '-' for stdin)
        #[arg(long)]
        file: String,
        /// Webhook token (bsync_wh_...)
        #[arg(long, env = "BIOSYNC_WEBHOOK_TOKEN")]
        token: Option<String>,
    },
    /// Dry-run a payload: show how it resolves and classifies, without writing
    Inspect {
        /// Payload JSON file (use '-' for stdin)
        #[arg(long)]
        file: String,
    },
    /// Bootstrap commands that write directly to the database
    Admin {
        #[command(subcommand)]
        command: commands::admin::AdminCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Ingest { file, token } => {
            commands::ingest::run(&cli.api_url, token.as_deref(), &file).await
        }
        Commands::Inspect { file } => commands::inspect::run(&file),
        Commands::Admin { command } => commands::admin::run(command).await,
    };

    std::process::exit(code);
}
