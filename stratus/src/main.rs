mod server;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use stratus_user::config::{read_config, Config};
use stratus_user::login::static_provider::hash_password;

use server::Server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// A special mode dedicated to developers, NOT INTENDED FOR PRODUCTION
    #[clap(long)]
    dev: bool,

    #[clap(short, long, env = "STRATUS_CONFIG", default_value = "stratus.toml")]
    /// Path to the main Stratus configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the WebDAV server
    Daemon,

    #[clap(subcommand)]
    /// Specific tooling, should not be part of a normal workflow
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Hash a password for the static authenticator
    PasswordHash {
        #[clap(env = "STRATUS_PASSWORD")]
        maybe_password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "main=info,stratus=info,stratus_proto=info")
    }

    // Abort on panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match &args.command {
        Command::Daemon => {
            let config = match args.dev {
                true => Config::dev(),
                false => read_config(args.config_file.clone())?,
            };
            tracing::debug!(mounts = config.mounts.len(), bind=%config.bind_addr, "configuration loaded");
            let server = Server::new(&config)?;
            server.run().await?;
        }
        Command::Tools(ToolsCommand::PasswordHash { maybe_password }) => {
            let password = match maybe_password {
                Some(pwd) => pwd.clone(),
                None => rpassword::prompt_password("Enter password: ")?,
            };
            println!("{}", hash_password(&password)?);
        }
    }

    Ok(())
}
