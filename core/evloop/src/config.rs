//! Event loop configuration.
//!
//! A loop is configured with a queue size and, optionally, a dedicated worker
//! thread. Without a [`TaskConfig`] the loop only dispatches when a caller runs
//! [`EventLoop::pump`](crate::EventLoop::pump).
//!
//! Configs can be built in code or loaded from TOML:
//!
//! ```toml
//! queue_size = 16
//!
//! [task]
//! name = "net_evt"
//! stack_size = 65536
//! ```

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Default queue depth, shared by manual loops and the default loop.
pub const DEFAULT_QUEUE_SIZE: usize = 32;

/// Name of the default loop's worker thread.
pub const DEFAULT_TASK_NAME: &str = "sys_evt";

/// Settings for a loop's dedicated dispatch thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Thread name, also used as the loop name in logs and dumps.
    pub name: String,

    /// Stack size in bytes. `None` keeps the platform default.
    #[serde(default)]
    pub stack_size: Option<usize>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
        }
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Configuration passed to [`EventLoop::new`](crate::EventLoop::new).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum number of queued events. Must be at least 1.
    pub queue_size: usize,

    /// Dedicated dispatch thread; `None` for a caller-pumped loop.
    pub task: Option<TaskConfig>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            task: None,
        }
    }
}

impl LoopConfig {
    /// Loop without a dedicated thread; events are dispatched by `pump`.
    pub fn manual(queue_size: usize) -> Self {
        Self {
            queue_size,
            task: None,
        }
    }

    /// Loop with a dedicated dispatch thread called `name`.
    pub fn dedicated(queue_size: usize, name: impl Into<String>) -> Self {
        Self {
            queue_size,
            task: Some(TaskConfig::new(name)),
        }
    }

    /// Configuration used by [`create_default`](crate::create_default).
    pub fn default_loop() -> Self {
        Self::dedicated(DEFAULT_QUEUE_SIZE, DEFAULT_TASK_NAME)
    }

    /// Parse a config from TOML. Missing keys fall back to [`LoopConfig::default`].
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: LoopConfig =
            toml::from_str(input).context("failed to parse event loop config")?;
        Ok(config)
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }
}
