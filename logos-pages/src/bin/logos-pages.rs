//! Logos Pages — command-line client for a page sync server.

use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;

use logos_pages::{ClientConfig, EventKind, PageClient};

#[derive(Parser)]
#[command(name = "logos-pages", about = "Inspect and follow pages on a sync server", version)]
struct Cli {
    /// WebSocket URL of the sync server
    #[arg(short, long, default_value = "ws://127.0.0.1:9090")]
    url: String,

    /// Request timeout in seconds (0 = wait forever)
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all pages
    List,
    /// Print a page's text
    Read { page: String },
    /// Print page lifecycle events until the connection closes
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = ClientConfig {
        request_timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
        sync_pages_on_start: false,
        ..ClientConfig::default()
    };
    let client = PageClient::connect(&cli.url, config).await?;
    info!("Connected to {} as {}", cli.url, client.client_id());

    match cli.command {
        Commands::List => {
            for page in client.refresh_pages().await? {
                println!("{}\t{}", page.name, page.last_modified);
            }
        }
        Commands::Read { page } => {
            let data = client.read_page(&page).await?;
            print!("{}", data.text);
        }
        Commands::Watch => {
            let mut events = client.events().stream(&EventKind::ALL);
            client.refresh_pages().await?;
            while let Some(event) = events.recv().await {
                println!("{event:?}");
                if event.kind() == EventKind::Disconnected {
                    break;
                }
            }
        }
    }
    Ok(())
}
