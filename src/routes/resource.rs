//! Resource routes: collections, items, children and child items.
//! Unsupported verbs on a known path answer `400 bad_verb` rather than 405.

use crate::handlers::resource::{
    child_associate, child_create, child_delete, child_fallback, child_item_fallback, child_list, child_read,
    child_update, collection_fallback, create, delete as delete_handler, item_fallback, list, no_path, read,
    update,
};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn resource_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(no_path))
        .route("/:collection", get(list).post(create).fallback(collection_fallback))
        .route(
            "/:collection/:id",
            get(read).patch(update).delete(delete_handler).fallback(item_fallback),
        )
        .route(
            "/:collection/:id/:child",
            get(child_list).post(child_create).fallback(child_fallback),
        )
        .route(
            "/:collection/:id/:child/:child_id",
            get(child_read)
                .put(child_associate)
                .patch(child_update)
                .delete(child_delete)
                .fallback(child_item_fallback),
        )
        .with_state(state)
}
