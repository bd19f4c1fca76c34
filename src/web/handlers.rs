pub mod health;
pub mod roster;

use salvo::prelude::*;
use serde_json::json;

fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}
