use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use career_compass::{
    chat,
    constants,
    web_server::{self, ServerConfig},
    AdviceClient, AdvisorConfig, Catalog, Pacing, Session,
};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file with the questions to ask instead of the built-in ones.
    #[arg(long, global = true, env = "COMPASS_CATALOG")]
    catalog: Option<PathBuf>,

    /// How long the bot "types" before each message, in milliseconds.
    #[arg(long, global = true, env = "COMPASS_TYPING_DELAY_MS", default_value_t = constants::DEFAULT_TYPING_DELAY_MS)]
    typing_delay_ms: u64,

    /// Give up on the advice request after this many seconds.
    #[arg(long, global = true, env = "COMPASS_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    /// Base URL of the generative language API.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Model used to generate advice.
    #[arg(long, global = true)]
    model: Option<String>,

    /// API key for the generative language API (defaults to GEMINI_API_KEY).
    #[arg(long, global = true)]
    api_key: Option<String>,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the questionnaire as a web page.
    Serve {
        #[arg(long, default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "templates", help = "Directory holding index.html.")]
        templates: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
    },
    /// Answer the questionnaire in this terminal.
    Chat,
    /// Print the questions as JSON.
    Questions,
}

impl Cli {
    fn load_catalog(&self) -> Result<Arc<Catalog>> {
        let catalog = match &self.catalog {
            Some(path) => Catalog::load(path)
                .with_context(|| format!("Failed to load catalog from {}", path.display()))?,
            None => Catalog::builtin(),
        };
        Ok(Arc::new(catalog))
    }

    fn advisor(&self) -> Result<AdviceClient> {
        let mut config = AdvisorConfig::default();
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = Some(api_key.clone());
        }
        config.request_timeout = self.request_timeout_secs.map(Duration::from_secs);
        AdviceClient::new(config).context("Failed to build HTTP client")
    }

    fn pacing(&self) -> Pacing {
        Pacing {
            typing_delay: Duration::from_millis(self.typing_delay_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GEMINI_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,career_compass=debug).
    // Logs go to stderr so they never mix with the terminal chat.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Compass starting with command: {:?}", cli.command);

    let catalog = cli.load_catalog()?;

    match &cli.command {
        Commands::Serve {
            port,
            templates,
            static_dir,
        } => {
            let config = ServerConfig {
                port: *port,
                templates_dir: templates.clone(),
                static_dir: static_dir.clone(),
            };
            let advisor = cli.advisor()?;
            info!(endpoint = %advisor.config().endpoint(), "Starting web server on port {}...", port);

            let mut web_server_handle = tokio::spawn(web_server::start_web_server(
                config,
                catalog,
                advisor,
                cli.pacing(),
            ));

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down...");
                    web_server_handle.abort();
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(Ok(())) => info!("Web server task completed unexpectedly."),
                        Ok(Err(e)) => {
                            error!("Web server failed: {:?}", e);
                            return Err(e);
                        }
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let session = Session::new(catalog, cli.advisor()?, cli.pacing());
            chat::run_chat(session).await.context("Chat session failed")?;
            info!("Chat session finished.");
        }
        Commands::Questions => {
            let json = serde_json::to_string_pretty(catalog.questions())
                .context("Failed to serialize questions")?;
            println!("{}", json);
        }
    }

    Ok(())
}
