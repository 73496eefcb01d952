pub mod queues;

use axum::Router;
use axum::routing::get;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/v1/queues/{pipeline}",
            get(queues::stats).post(queues::process),
        )
        .route(
            "/api/v1/queues/{pipeline}/items",
            get(queues::list_items).post(queues::enqueue),
        )
}
