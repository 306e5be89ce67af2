//! ShareGraph CLI - Command line interface for SharePoint document libraries.
//!
//! Signs in once, keeps the delegated token fresh in the configured store,
//! and browses or uploads to drives of a site.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sharegraph_auth::{
    AuthorizationPrompt, Config, StdioPrompt, TokenLifecycleManager, TokenOrigin,
};
use sharegraph_common::ItemId;
use sharegraph_graph::ResourceNavigator;

#[derive(Parser)]
#[command(name = "sharegraph")]
#[command(about = "ShareGraph - SharePoint drives from the command line")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/sharegraph/config.json).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure a usable token is stored, authorizing if needed.
    Login {
        /// Open the authorization URL in the default browser.
        #[arg(long)]
        open_browser: bool,
    },

    /// Show the signed-in user.
    Whoami,

    /// List drives of a site.
    Drives {
        /// Tenant host, e.g. contoso.sharepoint.com.
        #[arg(short, long)]
        domain: String,

        /// Server-relative site path, e.g. sites/team.
        #[arg(short, long)]
        site: String,
    },

    /// List items of a drive or folder.
    Items {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        site: String,

        /// Drive name.
        #[arg(long)]
        drive: String,

        /// Folder item id (default: drive root).
        #[arg(short, long)]
        folder: Option<String>,

        /// Only list folders.
        #[arg(long)]
        folders_only: bool,
    },

    /// Upload a local file into a folder.
    Upload {
        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        site: String,

        /// Drive name.
        #[arg(long)]
        drive: String,

        /// Destination folder item id.
        #[arg(short, long)]
        folder: String,

        /// Remote file name.
        #[arg(short, long)]
        name: String,

        /// Local file to upload.
        #[arg(long)]
        file: PathBuf,

        /// Content type sent with the upload.
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { open_browser } => cmd_login(&config, open_browser).await,

        Commands::Whoami => cmd_whoami(&config).await,

        Commands::Drives { domain, site } => cmd_drives(&config, &domain, &site).await,

        Commands::Items {
            domain,
            site,
            drive,
            folder,
            folders_only,
        } => cmd_items(&config, &domain, &site, &drive, folder.as_deref(), folders_only).await,

        Commands::Upload {
            domain,
            site,
            drive,
            folder,
            name,
            file,
            content_type,
        } => {
            cmd_upload(
                &config,
                &domain,
                &site,
                &drive,
                &folder,
                &name,
                &file,
                &content_type,
            )
            .await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => dirs::config_dir()
            .context("No configuration directory on this platform; pass --config")?
            .join("sharegraph")
            .join("config.json"),
    };

    Config::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Terminal prompt that can also open the URL in a browser.
struct OperatorPrompt {
    open_browser: bool,
}

impl AuthorizationPrompt for OperatorPrompt {
    fn ask(&self, authorization_url: &str) -> sharegraph_common::Result<String> {
        if self.open_browser {
            if let Err(e) = open::that(authorization_url) {
                tracing::warn!("Could not open a browser: {}", e);
            }
        }
        StdioPrompt.ask(authorization_url)
    }
}

async fn start(config: &Config, open_browser: bool) -> Result<TokenLifecycleManager> {
    let prompt = OperatorPrompt { open_browser };
    TokenLifecycleManager::from_config(&config.oauth, &config.storage, &prompt)
        .await
        .context("Failed to obtain a usable token")
}

async fn navigator_for(config: &Config, domain: &str, site: &str) -> Result<ResourceNavigator> {
    let manager = start(config, false).await?;
    let mut navigator =
        ResourceNavigator::new(Arc::new(manager.into_session()), config.api_base.clone());
    navigator
        .set_site(domain, site)
        .await
        .with_context(|| format!("Failed to resolve site {}:/{}", domain, site))?;
    Ok(navigator)
}

/// Ensure a token is stored.
async fn cmd_login(config: &Config, open_browser: bool) -> Result<()> {
    let manager = start(config, open_browser).await?;

    match manager.origin() {
        TokenOrigin::Stored => println!("Reusing stored token."),
        TokenOrigin::Authorized => println!("Authorization complete, token saved."),
    }
    println!("  Store: {}", config.storage.describe());
    if let Some(expires) = manager.session().current_token().await.expires_at_datetime() {
        println!("  Expires: {}", expires.to_rfc3339());
    }

    Ok(())
}

/// Show the signed-in user.
async fn cmd_whoami(config: &Config) -> Result<()> {
    let manager = start(config, false).await?;
    let navigator =
        ResourceNavigator::new(Arc::new(manager.into_session()), config.api_base.clone());

    let me = navigator.me().await.context("Failed to fetch profile")?;
    println!("{}", serde_json::to_string_pretty(&me)?);

    Ok(())
}

/// List drives of a site.
async fn cmd_drives(config: &Config, domain: &str, site: &str) -> Result<()> {
    let navigator = navigator_for(config, domain, site).await?;
    info!("Listing drives");

    let drives = navigator.list_drives().await.context("Failed to list drives")?;
    if drives.is_empty() {
        println!("Site has no drives.");
    } else {
        for drive in drives {
            println!("  {}  {}", drive.id, drive.name);
        }
    }

    Ok(())
}

/// List items of a drive or folder.
async fn cmd_items(
    config: &Config,
    domain: &str,
    site: &str,
    drive: &str,
    folder: Option<&str>,
    folders_only: bool,
) -> Result<()> {
    let mut navigator = navigator_for(config, domain, site).await?;
    let names = navigator.drive_names().join(", ");
    navigator
        .select_drive(drive)
        .with_context(|| format!("Available drives: {}", names))?;

    let items = match folder {
        Some(folder) => {
            let folder = ItemId::new(folder).context("Invalid folder id")?;
            navigator
                .list_folder_items(&folder)
                .await
                .context("Failed to list folder")?
        }
        None => navigator
            .root_children()
            .await
            .context("Failed to list drive root")?,
    };

    let mut shown = 0;
    for item in items.iter().filter(|item| !folders_only || item.is_folder()) {
        if item.is_folder() {
            println!("  [DIR]  {}  {}/", item.id, item.name);
        } else {
            let size = item.size.map(|s| format!("{} bytes", s)).unwrap_or_default();
            println!("  [FILE] {}  {} ({})", item.id, item.name, size);
        }
        shown += 1;
    }
    if shown == 0 {
        println!("Folder is empty.");
    }

    Ok(())
}

/// Upload a local file.
#[allow(clippy::too_many_arguments)]
async fn cmd_upload(
    config: &Config,
    domain: &str,
    site: &str,
    drive: &str,
    folder: &str,
    name: &str,
    file: &Path,
    content_type: &str,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type).context("Invalid content type")?,
    );

    let mut navigator = navigator_for(config, domain, site).await?;
    let names = navigator.drive_names().join(", ");
    navigator
        .select_drive(drive)
        .with_context(|| format!("Available drives: {}", names))?;
    let folder = ItemId::new(folder).context("Invalid folder id")?;

    let item = navigator
        .upload(&folder, name, data, headers)
        .await
        .context("Failed to upload file")?;

    println!("Uploaded {} ({})", item.name, item.id);
    if let Some(url) = item.web_url {
        println!("  {}", url);
    }

    Ok(())
}
