//! HippChat CLI
//!
//! Thin wrapper around hippchat-core for command-line usage. Objects live
//! in a local directory, so several users on one machine can chat by
//! pointing at the same `--store-dir`.
//!
//! ## Usage
//!
//! ```bash
//! # Show the address and keys for a seed
//! hippchat --seed "alice seed" identity
//!
//! # Create containers and publish a first profile
//! hippchat --seed "alice seed" login --name Alice
//!
//! # Show or change a profile
//! hippchat --seed "alice seed" profile show
//! hippchat --seed "alice seed" profile set --name "Alice L."
//!
//! # Send a message
//! hippchat --seed "alice seed" send --to <address> "hello"
//!
//! # Print the conversation with a contact
//! hippchat --seed "bob seed" history --with <address>
//!
//! # Follow a conversation until Ctrl-C
//! hippchat --seed "bob seed" watch --with <address>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hippchat_core::chat::short_address;
use hippchat_core::logging::LoggingBuilder;
use hippchat_core::{
    ConversationEvent, Conversations, DecryptedMessage, FsObjectStore, KeyPair, MessageSyncService,
    Session, Storage, SyncConfig, KIND_TEXT,
};

/// HippChat - encrypted 1:1 chat over object storage
#[derive(Parser)]
#[command(name = "hippchat")]
#[command(version)]
#[command(about = "HippChat - encrypted 1:1 chat over object storage")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory for the local cache and logs (default: platform data dir)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Object store directory (default: <data-dir>/objects)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Secret seed the identity derives from
    #[arg(long, global = true)]
    seed: Option<String>,

    /// Treat the seed as a BIP39 mnemonic and use its SS58 address
    #[arg(long, global = true)]
    mnemonic: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show address, public key and access key id
    Identity,

    /// Create containers and publish a profile if none exists
    Login {
        /// Display name for a new profile
        #[arg(short, long)]
        name: String,
    },

    /// Profile management
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Send a text message
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Message text
        text: String,
    },

    /// Fetch and print the conversation with a contact
    History {
        /// Contact address
        #[arg(long = "with")]
        contact: String,
        /// Print at most this many messages
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Follow a conversation, printing messages as they arrive
    Watch {
        /// Contact address
        #[arg(long = "with")]
        contact: String,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show a profile (ours by default)
    Show {
        /// Address of another user
        #[arg(long)]
        address: Option<String>,
    },
    /// Publish a new profile version
    Set {
        /// New display name
        #[arg(short, long)]
        name: String,
    },
}

fn setup_logging(verbosity: u8, logs_dir: &Path, instance: &str) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    LoggingBuilder::new(logs_dir, instance)
        .with_default_directive(filter)
        .init()
        .context("Failed to set up logging")?;
    Ok(())
}

/// Default data directory (<platform data dir>/hippchat)
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hippchat")
}

fn keypair_from(seed: &str, mnemonic: bool) -> Result<KeyPair> {
    if mnemonic {
        KeyPair::from_mnemonic(seed, "").context("Invalid mnemonic")
    } else {
        Ok(KeyPair::derive(seed))
    }
}

/// Everything a command needs besides the keypair.
struct App {
    data_dir: PathBuf,
    store: Arc<FsObjectStore>,
    config: SyncConfig,
}

impl App {
    fn cache_for(&self, keypair: &KeyPair) -> Result<Arc<Storage>> {
        let path = self.data_dir.join(keypair.address()).join("cache.redb");
        let storage = Storage::new(&path)
            .with_context(|| format!("Failed to open cache at {}", path.display()))?;
        Ok(Arc::new(storage))
    }

    /// Service for a user who already logged in once.
    async fn service(&self, keypair: KeyPair) -> Result<MessageSyncService> {
        let cache = self.cache_for(&keypair)?;
        let service = MessageSyncService::new(self.store.clone(), cache, keypair, self.config.clone());
        if service.own_profile().await?.is_none() {
            anyhow::bail!("Not logged in. Run: hippchat login --name <name>");
        }
        Ok(service)
    }
}

fn print_message(message: &DecryptedMessage, me: &str) {
    let sender = if message.is_from(me) {
        "me".to_string()
    } else {
        message.display_sender()
    };
    let when = message
        .timestamp_ms()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| message.message.ts.clone());
    println!("[{}] {}: {}", when, sender, message.display_content());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let seed = cli
        .seed
        .as_deref()
        .context("--seed is required")?;
    let keypair = keypair_from(seed, cli.mnemonic)?;
    let me = keypair.address().to_string();

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    setup_logging(cli.verbose, &data_dir.join("logs"), &short_address(&me))?;

    let store_dir = cli.store_dir.unwrap_or_else(|| data_dir.join("objects"));
    tracing::info!(address = %me, store = %store_dir.display(), "Starting hippchat");
    let app = App {
        store: Arc::new(FsObjectStore::new(&store_dir)),
        data_dir,
        config: SyncConfig::default(),
    };

    match cli.command {
        Commands::Identity => {
            let credentials = keypair.credentials();
            println!("Identity:");
            println!("  Address: {}", keypair.address());
            println!("  Public key: {}", keypair.public_key_hex());
            println!("  Access key id: {}", credentials.access_key_id);
        }

        Commands::Login { name } => {
            let cache = app.cache_for(&keypair)?;
            let session = Session::login(app.store.clone(), cache, keypair, &name, app.config.clone()).await?;
            println!("Logged in:");
            println!("  Address: {}", session.address());
            println!("  Name: {}", session.profile().display_name);
            session.logout().await;
        }

        Commands::Profile { action } => match action {
            ProfileAction::Show { address } => {
                let service = app.service(keypair).await?;
                let address = address.unwrap_or_else(|| me.clone());
                match service.profiles().get_profile_for(&address).await? {
                    Some(profile) => {
                        println!("Profile:");
                        println!("  Name: {}", profile.display_name);
                        println!("  Address: {}", profile.address);
                        println!("  Public key: {}", profile.pk);
                        println!("  Updated: {}", profile.updated_at);
                    }
                    None => println!("No profile published for {}", address),
                }
            }

            ProfileAction::Set { name } => {
                let service = app.service(keypair).await?;
                let mut profile = service
                    .own_profile()
                    .await?
                    .context("Own profile disappeared")?;
                profile.display_name = name;
                profile.touch();
                let saved = service.update_profile(&profile).await?;
                println!("Profile updated:");
                println!("  Name: {}", saved.display_name);
            }
        },

        Commands::Send { to, text } => {
            let service = app.service(keypair).await?;
            let sent = service
                .send_message(&to, &text, KIND_TEXT)
                .await
                .with_context(|| format!("Failed to send to {}", to))?;
            println!("Sent to {}", short_address(&to));
            println!("  ID: {}", sent.msg_id());
        }

        Commands::History { contact, limit } => {
            let service = app.service(keypair).await?;
            let config = service.config().clone();
            if service.offset(&contact)?.is_none() {
                service
                    .load_initial_history(&contact, config.initial_history_lines)
                    .await?;
            }
            let from = service.offset(&contact)?.unwrap_or(0);
            service.poll_messages(&contact, from).await?;

            let messages = service.messages(&contact)?;
            if messages.is_empty() {
                println!("No messages with {}", short_address(&contact));
            }
            let skip = messages.len().saturating_sub(limit);
            for message in &messages[skip..] {
                print_message(message, &me);
            }
        }

        Commands::Watch { contact } => {
            let service = app.service(keypair).await?;
            for message in service.messages(&contact)? {
                print_message(&message, &me);
            }

            let conversations = Conversations::new(service);
            let mut events = conversations.subscribe();
            conversations.open(&contact).await;
            tracing::info!(contact = %contact, "Watching conversation");
            println!("Watching {} (Ctrl-C to stop)", short_address(&contact));

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(ConversationEvent::Messages { messages, .. }) => {
                            for message in &messages {
                                print_message(message, &me);
                            }
                        }
                        Ok(ConversationEvent::PollFailed { error, next_delay, .. }) => {
                            eprintln!("Poll failed, retrying in {:?}: {}", next_delay, error);
                        }
                        Ok(ConversationEvent::Stopped { .. }) => break,
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            eprintln!("Missed {} events", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            conversations.shutdown().await;
        }
    }

    Ok(())
}
