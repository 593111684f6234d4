//! Shared types used across Rinzler crates.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to a worker when it joins the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifier correlating a job with its `accepted` and `completed` messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Data handed to or returned from an execution unit.
///
/// `data` is opaque structured content. `transfer` carries buffers that
/// move to the unit by reference count instead of being copied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub data: serde_json::Value,
    pub transfer: Vec<Bytes>,
}

impl Payload {
    pub fn new(data: impl Into<serde_json::Value>) -> Self {
        Self {
            data: data.into(),
            transfer: Vec::new(),
        }
    }

    pub fn with_transfer(mut self, buffers: Vec<Bytes>) -> Self {
        self.transfer = buffers;
        self
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl From<serde_json::Value> for Payload {
    fn from(data: serde_json::Value) -> Self {
        Self::new(data)
    }
}

/// Lifecycle of a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Execution unit launched, waiting for the ready handshake.
    Spawning,
    /// Ready with an empty queue.
    Idle,
    /// At least one job queued or running.
    Busy,
    /// No longer accepting jobs, finishing its queue.
    Draining,
    /// Execution unit torn down.
    Terminated,
    /// Execution unit crashed or sent an undecodable message.
    Failed,
}

impl WorkerState {
    pub fn label(&self) -> &'static str {
        match self {
            WorkerState::Spawning => "spawning",
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
            WorkerState::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
