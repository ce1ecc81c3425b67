use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ctf_auth_core::clients::{self, Registration};
use ctf_auth_core::config::StoreBackend;
use ctf_auth_core::jwt::{self, Keys};
use ctf_auth_core::progress::ProgressSummary;
use ctf_auth_core::store;

#[derive(Parser)]
#[command(name = "ctf-auth", about = "OAuth CTF authorization server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Check config and store connectivity
    Validate,
    /// Print a random value suitable for jwt.signing_secret
    GenerateSecret,
    /// Register an OAuth client directly in the store
    RegisterClient {
        /// Client display name
        name: String,
        /// Allowed redirect URI(s)
        #[arg(required = true, num_args = 1..)]
        redirect_uris: Vec<String>,
        /// Logo URI stored with the client
        #[arg(long)]
        logo_uri: Option<String>,
    },
    /// Show stage progress for a client
    Progress {
        /// Client ID to inspect
        client_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("ctf_auth=info,tower_http=info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    // generate-secret doesn't need config or a store
    if let Command::GenerateSecret = cli.command {
        println!("{}", jwt::random_token(32));
        return Ok(());
    }

    let config = ctf_auth_core::config::resolve_config(cli.config.as_deref())?;
    let keys = Keys::from_config(&config.jwt)?;
    if matches!(cli.command, Command::RegisterClient { .. } | Command::Progress { .. })
        && config.store.backend == StoreBackend::Memory
    {
        tracing::warn!("memory store is private to this process; the command will not affect a running server");
    }
    let store = store::connect(&config.store).await?;

    match cli.command {
        Command::Serve => {
            let metrics_enabled = config.metrics.enabled;
            let mut state = ctf_auth_api::AppState::new(config, store, keys);
            if metrics_enabled {
                let handle = ctf_auth_api::metrics::install_recorder()?;
                tracing::info!("prometheus metrics enabled at /metrics");
                state = state.with_metrics(handle);
            }
            ctf_auth_api::serve(state).await?;
        }
        Command::Validate => {
            tracing::info!("config loaded successfully");
            store.ping().await?;
            tracing::info!(backend = ?config.store.backend, "store connection successful");
            tracing::info!(issuer = %config.jwt.issuer, "signing key loaded successfully");
        }
        Command::RegisterClient { name, redirect_uris, logo_uri } => {
            let registered = clients::register(
                store.as_ref(),
                Registration {
                    client_name: Some(name),
                    logo_uri,
                    redirect_uris: Some(redirect_uris),
                },
            )
            .await?;

            let client = registered.client;
            println!("Client registered:");
            println!("  Client ID:     {}", client.client_id);
            println!("  Name:          {}", client.client_name);
            println!("  Client Secret: {}", registered.client_secret);
            println!("  Redirect URIs: {:?}", client.redirect_uris);
            println!("  Logo URI:      {}", client.logo_uri.as_deref().unwrap_or("-"));
            println!("\nSave the client secret, it cannot be retrieved later.");
        }
        Command::Progress { client_id } => {
            let client = store
                .find_client(&client_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("client '{}' not found", client_id))?;
            let record = store.progress(&client.client_id).await?;
            let summary = ProgressSummary::new(&client.client_id, &client.client_name, &record, &config.flags);

            println!("{} ({})", summary.client_name, summary.client_id);
            println!("  Current stage: {}", summary.current_stage);
            for (stage, at) in &summary.completed_at {
                println!("  {:<8} {}", stage, at.format("%Y-%m-%d %H:%M:%S"));
            }
            if summary.completed_at.is_empty() {
                println!("  No stages completed.");
            }
        }
        Command::GenerateSecret => unreachable!(),
    }

    Ok(())
}
