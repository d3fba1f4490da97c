use std::time::Duration;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use task_core::{validate_new_task, DeviceInventory, NewTask, Task};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskCmd {
    pub shell: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskOutput {
    pub files: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub cmd: CreateTaskCmd,
    pub output: CreateTaskOutput,
    pub hint_device_id: String,
    pub create_user: String,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
}

pub async fn device_list(
    State(state): State<AppState>,
) -> Result<Json<DeviceInventory>, ApiError> {
    let inventory = state.device_store.get_inventory().await?;
    Ok(Json(inventory))
}

pub async fn task_create(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    let new_task = NewTask {
        cmd_shell: req.cmd.shell,
        output_files: req.output.files,
        hint_device_id: req.hint_device_id,
        create_user: req.create_user,
    };
    validate_new_task(&new_task).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let task = Task::new(new_task);
    let id = task.id;
    state.task_store.insert(&task).await?;
    info!(task_id = %id, "task created");
    Ok(Json(CreateTaskResponse { id }))
}

pub async fn task_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    if state.task_store.find_one(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    std::fs::create_dir_all(state.config.cache.input_archive_dir())?;
    let dest = state.config.cache.input_archive_dir().join(format!("{id}.tar"));

    let mut wrote_field = false;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        tokio::fs::write(&dest, &bytes).await?;
        wrote_field = true;
        break;
    }

    if !wrote_field {
        return Err(ApiError::BadRequest("missing multipart field 'file'".to_string()));
    }

    state.task_store.set_input_archive_ready(id).await?;
    info!(task_id = %id, "input archive uploaded");
    Ok(StatusCode::OK)
}

pub async fn task_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    if state.task_store.find_one(id).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let path = state.config.cache.output_archive_dir().join(format!("{id}.tar"));
    let file = tokio::fs::File::open(&path).await.map_err(|_| ApiError::NotFound)?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{id}.tar\""),
        )
        .body(body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

pub async fn task_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    state.task_store.touch_active_time(id, Utc::now()).await?;
    let task = state.task_store.find_one(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(task))
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
}

pub async fn task_list(State(state): State<AppState>) -> Result<Json<TaskListResponse>, ApiError> {
    let tasks = state.task_store.list_non_terminal().await?;
    Ok(Json(TaskListResponse { tasks }))
}

pub async fn task_kill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.task_store.cas_alive_to_killing(id).await? {
        info!(task_id = %id, "kill requested");
        Ok(StatusCode::NO_CONTENT)
    } else {
        warn!(task_id = %id, "kill requested but task was not alive");
        Ok(StatusCode::CONFLICT)
    }
}

/// Streams a worker log file, polling for new bytes appended by the
/// in-flight command and closing once the task reaches a terminal status.
pub async fn task_log(
    State(state): State<AppState>,
    Path((id, stream_name)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    let task = state.task_store.find_one(id).await?.ok_or(ApiError::NotFound)?;
    let log_path = match stream_name.as_str() {
        "stdout" => task.stdout.clone(),
        "stderr" => task.stderr.clone(),
        other => return Err(ApiError::BadRequest(format!("unknown log stream '{other}'"))),
    };
    let Some(log_path) = log_path else {
        return Err(ApiError::NotFound);
    };

    let poll_interval = Duration::from_millis(state.config.timing.poll_interval_ms);
    let task_store = state.task_store.clone();

    let body_stream = stream::unfold(
        (log_path, 0u64, task_store, poll_interval),
        move |(path, offset, task_store, poll_interval)| async move {
            loop {
                let chunk = match tokio::fs::File::open(&path).await {
                    Ok(mut file) => {
                        use tokio::io::AsyncSeekExt;
                        if file.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
                            Vec::new()
                        } else {
                            let mut buf = Vec::new();
                            let _ = file.read_to_end(&mut buf).await;
                            buf
                        }
                    }
                    Err(_) => Vec::new(),
                };

                if !chunk.is_empty() {
                    let new_offset = offset + chunk.len() as u64;
                    return Some((
                        Ok::<_, std::io::Error>(bytes::Bytes::from(chunk)),
                        (path, new_offset, task_store, poll_interval),
                    ));
                }

                let terminal = task_store
                    .find_one(id)
                    .await
                    .ok()
                    .flatten()
                    .map(|t| t.status.is_terminal())
                    .unwrap_or(true);
                if terminal {
                    return None;
                }
                tokio::time::sleep(poll_interval).await;
            }
        },
    );

    let body = Body::from_stream(body_stream);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}
