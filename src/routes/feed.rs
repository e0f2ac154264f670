use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use tracing::debug;

use crate::{
    dao::feed::{ChangeEvent, FeedTable},
    dto::feed::FeedAck,
    error::AppError,
    state::SharedState,
};

/// Webhook receiving row change notifications from the database.
pub fn router() -> Router<SharedState> {
    Router::new().route("/feed/{table}", post(ingest))
}

/// Publish a change notification for `table` to the live subscriptions.
pub async fn ingest(
    State(state): State<SharedState>,
    Path(table): Path<String>,
    Json(event): Json<ChangeEvent>,
) -> Result<Json<FeedAck>, AppError> {
    let table: FeedTable = table.parse().map_err(AppError::NotFound)?;
    let delivered = state.feed().publish(table, event);
    debug!(%table, delivered, "ingested change notification");
    Ok(Json(FeedAck {
        table: table.to_string(),
        delivered,
    }))
}
