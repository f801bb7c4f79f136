use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-firewatch-config-1 Invalid numeric value for {var_name}: {value}")]
    InvalidNumber { var_name: String, value: String },

    #[error("error-firewatch-config-2 Invalid boolean value for {var_name}: {value}")]
    InvalidBool { var_name: String, value: String },
}

#[derive(Error, Debug)]
pub enum KvError {
    #[error("error-firewatch-kv-1 Redis connection failed: {details}")]
    ConnectionFailed { details: String },

    #[error("error-firewatch-kv-2 Redis operation failed: {operation}: {source}")]
    RedisOperationFailed {
        operation: String,
        #[source]
        source: deadpool_redis::redis::RedisError,
    },

    #[error("error-firewatch-kv-3 Value encoding failed for key {key}: {source}")]
    ValueEncodingFailed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("error-firewatch-storage-1 Query execution failed: {source}")]
    QueryFailed {
        #[source]
        source: sqlx::Error,
    },

    #[error("error-firewatch-storage-2 Invalid identifier: {name}")]
    InvalidIdentifier { name: String },

    #[error("error-firewatch-storage-3 Invalid input data: {details}")]
    InvalidInput { details: String },

    #[error("error-firewatch-storage-4 Row decoding failed: {details}")]
    RowDecodingFailed { details: String },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("error-firewatch-task-1 Unknown task handler: {handler}")]
    UnknownHandler { handler: String },

    #[error("error-firewatch-task-2 Task record decoding failed: {task_id}: {source}")]
    RecordDecodingFailed {
        task_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("error-firewatch-task-3 Task handler panicked: {details}")]
    HandlerPanicked { details: String },
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("error-firewatch-plugin-1 Unknown command: {command}")]
    UnknownCommand { command: String },

    #[error("error-firewatch-plugin-2 Invalid command arguments: {command}: {details}")]
    InvalidArguments { command: String, details: String },
}
