use std::{
    io::{self, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use fuji::{
    Error,
    config::{FujiConfig, PaperSpec, PaperVersion},
    registry::Registry,
    session::TmuxBackend,
    supervisor::Supervisor,
};

#[derive(Parser, Debug)]
#[command(name = "fuji")]
#[command(about = "A command-line tool for managing PaperMC Minecraft servers.", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the fuji root directory layout
    Init {
        /// Root directory to use instead of ~/.fuji
        path: Option<PathBuf>,
    },
    /// Create a new server
    Create {
        name: String,
        /// Accept the Minecraft EULA without prompting
        #[arg(short = 'y', long)]
        accept_eula: bool,
        /// PaperMC version to record for this server, e.g. 1.20.4
        #[arg(long)]
        version: Option<String>,
        /// PaperMC build number to record
        #[arg(long)]
        build: Option<u32>,
    },
    /// Open a server's server.properties in $EDITOR
    Edit { name: String },
    /// Start a server inside its tmux session
    Start {
        name: String,
        /// Attach to the server console once it is running
        #[arg(short = 'r', long)]
        auto_reconnect: bool,
    },
    /// Gracefully stop a running server
    Stop { name: String },
    /// Attach to a running server's console
    Attach { name: String },
    /// Show a server's current state
    Status { name: String },
    /// Display all managed servers
    List,
    /// Acknowledge a crash and settle the server back to stopped
    Reset { name: String },
    /// Delete a stopped server and its directory
    Delete {
        name: String,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let mut config = FujiConfig::load();

    if let Command::Init { path } = &cli.command {
        if let Some(path) = path {
            config.root = path.clone();
        }
        config.init_root().await?;
        config.save()?;
        println!("Initialized fuji in '{}'.", config.root.display());
        return Ok(());
    }

    let registry = Registry::open(&config);
    let supervisor = Supervisor::new(config, registry, TmuxBackend::new());

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Create {
            name,
            accept_eula,
            version,
            build,
        } => {
            let version = version
                .map(|v| v.parse::<PaperVersion>())
                .transpose()?;
            let accepted = accept_eula || prompt_eula();
            let instance = supervisor
                .create(&name, accepted, PaperSpec { version, build })
                .await?;
            if !accepted {
                warn!(
                    "Server '{}' was created without accepting the EULA; it will refuse to start",
                    instance.name
                );
            }
            println!("Created server '{}' ({}).", instance.name, instance.paper);
        }
        Command::Edit { name } => {
            let path = supervisor.edit_target(&name).await?;
            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
            let status = tokio::process::Command::new(&editor)
                .arg(&path)
                .status()
                .await
                .map_err(|e| Error::io(format!("launching '{editor}'"), e))?;
            if !status.success() {
                warn!("Editor exited with {status}");
            }
        }
        Command::Start {
            name,
            auto_reconnect,
        } => {
            let instance = supervisor.start(&name, auto_reconnect).await?;
            println!(
                "Server '{}' is running in session '{}'.",
                instance.name,
                instance.session_name()
            );
        }
        Command::Stop { name } => {
            let instance = supervisor.stop(&name).await?;
            println!("Server '{}' stopped.", instance.name);
        }
        Command::Attach { name } => {
            supervisor.attach(&name).await?;
        }
        Command::Status { name } => {
            let instance = supervisor.status(&name).await?;
            println!("Server '{}' is {}.", instance.name, instance.state);
        }
        Command::List => {
            let instances = supervisor.list().await?;
            if instances.is_empty() {
                println!("No servers found.");
            } else {
                for (index, instance) in instances.iter().enumerate() {
                    println!(
                        "{:>2}. {:<20} {:<10} {}",
                        index + 1,
                        instance.name,
                        instance.state.to_string(),
                        instance.paper
                    );
                }
            }
        }
        Command::Reset { name } => {
            let instance = supervisor.reset(&name).await?;
            println!("Server '{}' reset to {}.", instance.name, instance.state);
        }
        Command::Delete { name, yes } => {
            if !yes && !confirm(&format!("Are you sure you want to delete '{name}'?")) {
                return Ok(());
            }
            supervisor.delete(&name).await?;
            println!("Deleted server '{name}'.");
        }
    }

    Ok(())
}

fn prompt_eula() -> bool {
    confirm(
        "Please read the Minecraft EULA before continuing:\n\
         https://aka.ms/MinecraftEULA\n\
         Do you accept the Minecraft EULA?",
    )
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}
