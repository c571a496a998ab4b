use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task as submitted to an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskInput {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Task text with surrounding whitespace removed.
    pub fn normalized(&self) -> &str {
        self.task.trim()
    }

    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Arith,
    List,
    World,
    Bvps,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Arith => "arith",
            TaskKind::List => "list",
            TaskKind::World => "world",
            TaskKind::Bvps => "bvps",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reading of a task, proposed by the controller or a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub id: String,
    pub kind: TaskKind,
    pub summary: String,
    #[serde(default)]
    pub params: Value,
}

impl Interpretation {
    pub fn new(
        id: impl Into<String>,
        kind: TaskKind,
        summary: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            summary: summary.into(),
            params,
        }
    }
}
