//! Step cursor shared by readers and writers.
//!
//! The cursor points at the step that must be driven next.  While it rests on
//! a stream step it additionally tracks whether items have been exchanged.
//! Ending a stream advances the cursor, so an ended stream is never current.
//! Moving past the last step is the terminal Complete state.

use serde::{Deserialize, Serialize};

use crate::error::{Result, YardlError};
use crate::schema::types::{StepDef, StepKind};

/// What `close` demands of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Every step must be complete (and, for readers, the input exhausted).
    #[default]
    Strict,
    /// Readers discard unread data; writers may stop early.
    AllowPartial,
}

/// Stream progress of the step under the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    /// Nothing exchanged yet for this step.
    #[default]
    Idle,
    /// At least one stream block has been exchanged.
    Open,
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolCursor {
    index: usize,
    phase: StreamPhase,
    closed: bool,
}

impl ProtocolCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_complete(&self, steps: &[StepDef]) -> bool {
        self.index >= steps.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Checks that `name` is the step under the cursor and has one of the
    /// `allowed` kinds, returning its index.
    ///
    /// # Errors
    ///
    /// [`YardlError::ProtocolState`] when the session is closed, complete, or
    /// positioned on another step.
    pub fn expect(
        &self,
        steps: &[StepDef],
        name: &str,
        allowed: &[StepKind],
        operation: &str,
    ) -> Result<usize> {
        if self.closed {
            return Err(YardlError::ProtocolState(format!(
                "cannot {operation} '{name}': the session is closed"
            )));
        }
        let current = steps.get(self.index).ok_or_else(|| {
            YardlError::ProtocolState(format!(
                "cannot {operation} '{name}': the protocol is already complete"
            ))
        })?;
        if current.name != name {
            let position = match steps.iter().position(|s| s.name == name) {
                Some(i) if i < self.index => "it was already completed",
                Some(_) => "an earlier step has not completed",
                None => "no such step exists",
            };
            return Err(YardlError::ProtocolState(format!(
                "cannot {operation} '{name}': expected step '{}', {position}",
                current.name
            )));
        }
        if !allowed.contains(&current.kind) {
            return Err(YardlError::ProtocolState(format!(
                "cannot {operation} '{name}': it is a {:?} step",
                current.kind
            )));
        }
        Ok(self.index)
    }

    /// Marks the current stream as having exchanged items.
    pub fn open_stream(&mut self) {
        self.phase = StreamPhase::Open;
    }

    /// Moves to the next step.
    pub fn advance(&mut self) {
        self.index += 1;
        self.phase = StreamPhase::Idle;
    }

    /// Marks the session closed.  Fails if it already was.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(YardlError::ProtocolState(
                "the session is already closed".to_string(),
            ));
        }
        self.closed = true;
        Ok(())
    }

    /// Name of the step under the cursor, for error messages.
    pub fn describe(&self, steps: &[StepDef]) -> String {
        match (steps.get(self.index), self.phase) {
            (Some(step), StreamPhase::Open) => format!("stream '{}' was never ended", step.name),
            (Some(step), StreamPhase::Idle) => format!("step '{}' has not completed", step.name),
            (None, _) => "the protocol is complete".to_string(),
        }
    }
}
