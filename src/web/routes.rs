use salvo::prelude::*;

use crate::web::handlers::{
    health::health_check,
    roster::{event_roster, event_roster_text},
};
use crate::web::metrics::metrics_endpoint;

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(
            Router::with_path("events/{id}")
                .push(Router::with_path("roster").get(event_roster))
                .push(Router::with_path("roster.txt").get(event_roster_text)),
        )
}
