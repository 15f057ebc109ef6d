#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for `SkyGuard`.
//!
//! Serves the REST API for submitting threat reports, reviewing incidents,
//! managing the caller's profile and linking a Telegram chat for alerts.
//! State lives in the `SQLite` database at `DATABASE_PATH`.

pub mod auth;
pub mod config;
mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use async_trait::async_trait;
use skyguard_database::{Storage, db};
use skyguard_incidents::IncidentService;
use skyguard_notify::{NotificationSender, Notifier};
use skyguard_telegram::TelegramClient;
use skyguard_users::{link::LinkCodes, profile::ProfileStore, trust::TrustStore};

use crate::auth::{Authenticator, StaticTokens};
use crate::config::SkyGuardConfig;

/// Sender used when no Telegram token is configured. Every delivery fails.
pub struct DisabledSender;

#[async_trait]
impl NotificationSender for DisabledSender {
    async fn send(&self, channel_id: &str, _message: &str) -> bool {
        log::warn!("No notification transport configured, dropping message to {channel_id}");
        false
    }
}

/// Shared application state.
pub struct AppState {
    /// Backing store.
    pub storage: Arc<dyn Storage>,
    /// Report lifecycle.
    pub incidents: IncidentService,
    /// Profile self-service.
    pub profiles: ProfileStore,
    /// Trust ratings.
    pub trust: TrustStore,
    /// Link code issuing.
    pub links: LinkCodes,
    /// Bearer-token resolution.
    pub auth: Arc<dyn Authenticator>,
    /// Bot username for link-code deep links.
    pub bot_username: String,
}

impl AppState {
    /// Wires every service on top of `storage`, delivering alerts through
    /// `sender`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        sender: Arc<dyn NotificationSender>,
        auth: Arc<dyn Authenticator>,
        config: &SkyGuardConfig,
    ) -> Self {
        let notifier = Arc::new(Notifier::new(
            storage.clone(),
            sender,
            config.notify.clone(),
        ));

        Self {
            incidents: IncidentService::new(
                storage.clone(),
                notifier,
                config.aggregation.clone(),
            ),
            profiles: ProfileStore::new(storage.clone()),
            trust: TrustStore::new(storage.clone()),
            links: LinkCodes::new(storage.clone()),
            storage,
            auth,
            bot_username: config.telegram.bot_username.clone(),
        }
    }
}

/// Registers every `/api` route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/reports", web::get().to(handlers::list_reports))
            .route("/reports", web::post().to(handlers::create_report))
            .route("/reports/{id}", web::delete().to(handlers::delete_report))
            .route("/reports/{id}/confirm", web::post().to(handlers::confirm_report))
            .route("/reports/{id}/reject", web::post().to(handlers::reject_report))
            .route("/shelters", web::get().to(handlers::shelters))
            .route("/me", web::get().to(handlers::me))
            .route("/me/location", web::put().to(handlers::update_location))
            .route(
                "/me/notifications",
                web::put().to(handlers::update_notifications),
            )
            .route("/me/link-code", web::post().to(handlers::create_link_code))
            .route("/users/{id}/rating", web::get().to(handlers::user_rating)),
    );
}

/// Picks the notification transport: Telegram when `TELEGRAM_BOT_TOKEN` is
/// set, otherwise [`DisabledSender`].
#[must_use]
pub fn sender_from_env(config: &SkyGuardConfig) -> Arc<dyn NotificationSender> {
    match TelegramClient::from_env(&config.telegram.api_base) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::warn!("Telegram alerts disabled: {e}");
            Arc::new(DisabledSender)
        }
    }
}

/// Starts the `SkyGuard` API server.
///
/// Opens the database, wires the services and starts the Actix-Web HTTP
/// server on `BIND_ADDR:PORT`. The caller provides the async runtime (e.g.
/// via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the database cannot be opened,
/// or if the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(config: SkyGuardConfig) -> std::io::Result<()> {
    log::info!("Opening database...");
    let storage: Arc<dyn Storage> = Arc::new(
        db::connect_from_env()
            .await
            .map_err(std::io::Error::other)?,
    );

    let tokens = StaticTokens::new(&config.auth.tokens);
    if tokens.is_empty() {
        log::warn!("No auth tokens configured, every authenticated route will answer 401");
    } else {
        log::info!("Loaded {} auth tokens", tokens.len());
    }

    let state = web::Data::new(AppState::new(
        storage,
        sender_from_env(&config),
        Arc::new(tokens),
        &config,
    ));

    let (bind_addr, port) = config::bind_address();
    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
