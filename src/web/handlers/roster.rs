use salvo::prelude::*;
use tracing::warn;
use uuid::Uuid;

use super::render_error;
use crate::roster::{RosterError, RosterService};
use crate::web::web_state;

fn status_for(err: &RosterError) -> StatusCode {
    match err {
        RosterError::NotFound(_) => StatusCode::NOT_FOUND,
        RosterError::Validation(_) => StatusCode::BAD_REQUEST,
        RosterError::Locked(_) => StatusCode::CONFLICT,
        RosterError::Transport(_) | RosterError::Database(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Resolves the `{id}` path parameter and the service, rendering the error
/// response itself when either is unavailable.
fn lookup(req: &mut Request, res: &mut Response) -> Option<(&'static RosterService, Uuid)> {
    let Some(state) = web_state() else {
        render_error(res, StatusCode::SERVICE_UNAVAILABLE, "roster service not ready");
        return None;
    };
    let raw = req.param::<String>("id").unwrap_or_default();
    match Uuid::parse_str(&raw) {
        Ok(id) => Some((state.roster.as_ref(), id)),
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "event id must be a UUID");
            None
        }
    }
}

fn render_failure(res: &mut Response, err: RosterError) {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("roster request failed: {}", err);
    }
    render_error(res, status, &err.to_string());
}

#[handler]
pub async fn event_roster(req: &mut Request, res: &mut Response) {
    let Some((roster, id)) = lookup(req, res) else {
        return;
    };
    match roster.render(id).await {
        Ok(view) => res.render(Json(view)),
        Err(err) => render_failure(res, err),
    }
}

#[handler]
pub async fn event_roster_text(req: &mut Request, res: &mut Response) {
    let Some((roster, id)) = lookup(req, res) else {
        return;
    };
    match roster.roster_text(id).await {
        Ok(text) => res.render(Text::Plain(text)),
        Err(err) => render_failure(res, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseError;

    #[test]
    fn errors_map_to_http_statuses() {
        let id = Uuid::nil();
        assert_eq!(status_for(&RosterError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RosterError::Locked(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&RosterError::from(DatabaseError::NotFound(id))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&RosterError::Database(DatabaseError::Query("boom".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
