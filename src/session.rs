//! Per-session interaction state
//!
//! Chat history, the responder mode toggle, and the metered live-use
//! counter live in one explicit struct that handlers take and return;
//! nothing ambient, nothing global.

use crate::config::LIVE_USE_CAP;
use crate::investigate::Investigation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier for correlating log lines to one conversation.
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
    /// True = free pre-built responder, false = metered live responder.
    pub demo_mode: bool,
    /// Live responder calls consumed so far this session.
    pub live_uses: u32,
    /// Most recent investigation, kept so a recommendation request can
    /// package it without re-running the queries.
    pub last_investigation: Option<Investigation>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            demo_mode: true,
            live_uses: 0,
            last_investigation: None,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    /// Whether another metered call is allowed this session.
    pub fn can_use_live(&self) -> bool {
        self.live_uses < LIVE_USE_CAP
    }

    /// Consume one metered use. Returns false (and consumes nothing) once
    /// the cap is reached.
    pub fn take_live_use(&mut self) -> bool {
        if !self.can_use_live() {
            return false;
        }
        self.live_uses += 1;
        true
    }

    pub fn clear_chat(&mut self) {
        self.messages.clear();
    }
}
