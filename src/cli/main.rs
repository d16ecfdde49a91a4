use std::{path::PathBuf, process::exit};

use clap::{Parser, Subcommand};
use color_eyre::{
    Section,
    config::HookBuilder,
    eyre::{self},
};
use quire::{
    auth::cookie::generate_keys,
    config::Config,
    serve::{self, AppState},
};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(about = "A small blog server", long_about = None)]
#[command(version, author)]
struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the blog.
    Serve {
        /// Directory holding Site.toml and Auth.toml
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,
        /// Host address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Print fresh cookie keys for Auth.toml.
    Keygen,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    HookBuilder::default()
        .display_env_section(true)
        .panic_section("It looks like quire encountered a bug")
        .install()
        .expect("Failed to install color-eyre hook");

    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();

    if let Err(err) = entry(cli).await {
        error!("{:?}", err);
        exit(1);
    }
}

async fn entry(cli: Cli) -> eyre::Result<()> {
    match cli.command {
        Commands::Serve {
            config_dir,
            host,
            port,
        } => {
            let config = Config::load(&config_dir)
                .await
                .note("Can't load configuration")
                .suggestion("Put Site.toml and Auth.toml in the directory given by --config-dir")?;
            info!(
                "Serving `{}` from {}",
                config.site().title(),
                config.site().content_root().display()
            );
            let state = AppState::from_config(&config)?;
            serve::serve(state, &host, port).await
        }
        Commands::Keygen => {
            let (auth_key, encryption_key) = generate_keys();
            println!("cookie_auth_key = \"{}\"", hex::encode(auth_key));
            println!("cookie_encryption_key = \"{}\"", hex::encode(encryption_key));
            Ok(())
        }
    }
}
