//! Task record and lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Priority lane a task is queued on.
///
/// Priority is lane segregation, not preemption: each lane has its own
/// consumer loop, and a burst of high-priority work never suspends
/// in-flight low-priority execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

impl TaskPriority {
    /// Lane name used in queue keys.
    pub fn lane(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// All lanes, high first.
    pub fn all() -> [TaskPriority; 3] {
        [Self::High, Self::Normal, Self::Low]
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Task lifecycle status.
///
/// Transitions only along
/// pending → running → (completed | failed → pending\[retry\] | canceled);
/// once retries exhaust, failed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a registered task handler.
///
/// Handlers are resolved through the task registry by their stable
/// string key; an optional namespace groups related handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl HandlerRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Registry lookup key: `namespace.name` when a namespace is set.
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}.{}", namespace, self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Request to create a task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub name: String,
    pub handler: HandlerRef,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub max_retries: u32,
}

impl TaskRequest {
    pub fn new(name: impl Into<String>, handler: HandlerRef) -> Self {
        Self {
            name: name.into(),
            handler,
            args: Vec::new(),
            kwargs: Map::new(),
            priority: TaskPriority::default(),
            max_retries: 0,
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A unit of background work.
///
/// Owned exclusively by the task manager: persisted as JSON in the
/// key-value store under `task:<id>`, mirrored in the manager's
/// in-process cache, and mutated only during creation, dispatch,
/// progress updates, and completion/failure. The retry counter is
/// updated in place; no per-attempt records are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub handler: HandlerRef,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress: f64,
    pub retries: u32,
    pub max_retries: u32,
}

impl Task {
    /// Build a new pending task from a request, allocating a ULID id.
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            id: Ulid::new().to_string(),
            name: request.name,
            handler: request.handler,
            args: request.args,
            kwargs: request.kwargs,
            priority: request.priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            progress: 0.0,
            retries: 0,
            max_retries: request.max_retries,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
