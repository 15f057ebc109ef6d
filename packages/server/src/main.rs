#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `SkyGuard` command-line entry point.
//!
//! ```text
//! skyguard serve
//! skyguard bot
//! skyguard add-shelter --title "Metro Centrum" --address "ul. Marszałkowska 1" \
//!     --capacity 500 --latitude 52.23 --longitude 21.01
//! ```
//!
//! Running `skyguard` with no subcommand starts the API server.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use skyguard_database::{Storage, db};
use skyguard_database_models::NewShelter;
use skyguard_server::config::SkyGuardConfig;
use skyguard_telegram::{TelegramClient, bot::Bot};
use skyguard_users::{link::LinkCodes, profile::ProfileStore};

#[derive(Parser)]
#[command(
    name = "skyguard",
    about = "Aerial threat report aggregation and alerting"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,
    /// Run the Telegram account-linking bot
    Bot,
    /// Add a public shelter
    AddShelter {
        /// Shelter name
        #[arg(long)]
        title: String,
        /// Street address
        #[arg(long, default_value = "")]
        address: String,
        /// Number of people it holds
        #[arg(long, default_value = "0")]
        capacity: i64,
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,
        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,
    },
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let cli = Cli::parse();
    let config = SkyGuardConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => skyguard_server::run_server(config).await?,
        Commands::Bot => {
            let storage: Arc<dyn Storage> = Arc::new(db::connect_from_env().await?);
            let client = TelegramClient::from_env(&config.telegram.api_base)?;

            Bot::new(
                client,
                ProfileStore::new(storage.clone()),
                LinkCodes::new(storage),
                config.notify.alert_radius_km,
            )
            .run()
            .await;
        }
        Commands::AddShelter {
            title,
            address,
            capacity,
            latitude,
            longitude,
        } => {
            skyguard_spatial::validate_coordinates(latitude, longitude)?;
            if capacity < 0 {
                return Err(format!("capacity must not be negative, got {capacity}").into());
            }

            let storage = db::connect_from_env().await?;
            let shelter = storage
                .create_shelter(NewShelter {
                    title,
                    address,
                    capacity,
                    latitude,
                    longitude,
                })
                .await?;

            println!("Added shelter {} ({})", shelter.id, shelter.title);
        }
    }

    Ok(())
}
