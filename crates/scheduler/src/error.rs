use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("failed to spawn worker for task {task_id}: {source}")]
    WorkerSpawn {
        task_id: uuid::Uuid,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
