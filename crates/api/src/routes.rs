use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{
    device_list, task_create, task_download, task_kill, task_list, task_log, task_query,
    task_upload,
};
use crate::state::AppState;

pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .route("/device/list", get(device_list))
        .route("/task/create", post(task_create))
        .route("/task/upload/:id", post(task_upload))
        .route("/task/download/:id", get(task_download))
        .route("/task/query/:id", get(task_query))
        .route("/task/log/:id/:stream", get(task_log))
        .route("/task/list", get(task_list))
        .route("/task/kill/:id", delete(task_kill))
}
