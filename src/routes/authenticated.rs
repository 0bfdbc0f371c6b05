use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// User Router Module
///
/// The `/api/users` surface. Every route requires an authenticated caller (enforced by the
/// layer applied in `create_router`); list/export/create/update/delete additionally check
/// the `user:*` permissions inside the handlers.
pub fn user_routes(avatar_max_bytes: usize) -> Router<AppState> {
    Router::<AppState>::new()
        // GET /api/users?deptId=&blurry=&page=&size=&sort=
        // Paged listing narrowed to the caller's department data scope.
        // POST /api/users creates, PUT /api/users updates (id in the body).
        .route(
            "/",
            get(handlers::get_users)
                .post(handlers::create_user)
                .put(handlers::update_user),
        )
        // GET /api/users/download
        // CSV export of every user matching the filters.
        .route("/download", get(handlers::download_users))
        // DELETE /api/users/{id}
        .route("/{id}", delete(handlers::delete_user))
        // --- Self-service ---
        .route("/updatePass", post(handlers::update_pass))
        .route(
            "/updateAvatar",
            post(handlers::update_avatar)
                .layer(DefaultBodyLimit::max(avatar_max_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/updateEmail/{code}", post(handlers::update_email))
}
