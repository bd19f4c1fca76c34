#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use secrecy::ExposeSecret;
use serenity::all::Http;
use tracing::{error, info};

mod audit;
mod cli;
mod config;
mod db;
mod discord;
mod registration;
mod roster;
mod scheduler;
mod session;
mod utils;
mod web;

use audit::{AuditSink, DiscordAuditSink, NoopAuditSink};
use cli::Cli;
use config::Config;
use discord::{BotContext, DiscordClient, DiscordTransport};
use registration::RegistrationFlow;
use roster::{RosterService, RosterTransport};
use scheduler::Scheduler;
use session::SessionManager;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(Config::load_from_file(&cli.config)?);
    utils::logging::init_tracing(&config.logging);

    if cli.check_config {
        info!("configuration at {} is valid", cli.config.display());
        return Ok(());
    }
    info!("guild war roster bot starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;
    let store = db_manager.event_store();

    let timezone = config.schedule.timezone;
    let http = Arc::new(Http::new(config.bot.token.expose_secret()));
    let transport: Arc<dyn RosterTransport> =
        Arc::new(DiscordTransport::new(http.clone(), timezone));
    let audit: Arc<dyn AuditSink> = match config.audit.log_channel_id {
        Some(channel_id) => Arc::new(DiscordAuditSink::new(http.clone(), channel_id)),
        None => Arc::new(NoopAuditSink),
    };

    let roster = Arc::new(RosterService::new(
        store.clone(),
        transport.clone(),
        audit.clone(),
        timezone,
    ));
    let flows = Arc::new(RegistrationFlow::new(roster.clone(), &config.registration));
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        config.defaults.clone(),
        timezone,
    ));
    let scheduler = Arc::new(
        Scheduler::new(store, transport, config.schedule.clone())
            .with_flows(flows.clone())
            .with_audit(audit),
    );

    let bot = Arc::new(BotContext {
        config: config.clone(),
        roster: roster.clone(),
        flows,
        sessions,
    });
    let discord_client = DiscordClient::new(config.clone(), bot);
    discord_client.start().await?;

    let web_handle = if config.web.enabled {
        let web_server = WebServer::new(config.web.clone(), roster);
        tokio::spawn(async move {
            if let Err(e) = web_server.start().await {
                error!("web server error: {}", e);
            }
        })
    } else {
        tokio::spawn(std::future::pending())
    };

    let scheduler_handle = tokio::spawn(scheduler.run());

    let gateway = discord_client.clone();
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.wait().await {
            error!("discord gateway error: {}", e);
        }
    });

    tokio::select! {
        _ = web_handle => {},
        _ = scheduler_handle => {},
        _ = gateway_handle => {},
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    discord_client.stop().await?;
    info!("guild war roster bot shutting down");
    Ok(())
}
