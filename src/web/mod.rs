use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::config::WebConfig;
use crate::roster::RosterService;

pub mod handlers;
pub mod metrics;
pub mod routes;

use self::routes::create_router;

#[derive(Clone)]
pub struct WebState {
    pub roster: Arc<RosterService>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

#[derive(Clone)]
pub struct WebServer {
    config: WebConfig,
}

impl WebServer {
    pub fn new(config: WebConfig, roster: Arc<RosterService>) -> Self {
        let _ = WEB_STATE.set(WebState {
            roster,
            started_at: Instant::now(),
        });
        metrics::Metrics::init();

        Self { config }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("Starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}
