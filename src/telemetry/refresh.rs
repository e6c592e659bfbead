use tracing::{Level, event};
use uuid::Uuid;

use crate::errors::Error;
use crate::token::LogoutReason;

/// Correlates the log events of one refresh attempt.
#[derive(Clone, Debug)]
pub struct RefreshTelemetry {
    attempt_id: Uuid,
    context: String,
    generation: u64,
}

impl RefreshTelemetry {
    pub fn new(context: impl Into<String>, generation: u64) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            context: context.into(),
            generation,
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn emit_start(&self) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            context = %self.context,
            generation = self.generation,
            "refresh.start"
        );
    }

    pub fn emit_success(&self, expires_in: u64) {
        event!(
            Level::INFO,
            attempt_id = %self.attempt_id,
            context = %self.context,
            generation = self.generation,
            expires_in,
            "refresh.success"
        );
    }

    pub fn emit_superseded(&self) {
        event!(
            Level::DEBUG,
            attempt_id = %self.attempt_id,
            context = %self.context,
            generation = self.generation,
            "refresh.superseded"
        );
    }

    pub fn emit_failure(&self, error: &Error) {
        event!(
            Level::ERROR,
            attempt_id = %self.attempt_id,
            context = %self.context,
            generation = self.generation,
            error = %error,
            "refresh.failure"
        );
    }
}

pub fn emit_logout(reason: LogoutReason, generation: u64) {
    event!(
        Level::INFO,
        reason = %reason,
        generation,
        "session.logout"
    );
}
