//! One-shot command mailbox over the writable string characteristic.
//!
//! A peer writes a UTF-8 token; the polling loop calls
//! [`CommandChannel::process_pending_command`], which runs the matching
//! action to completion and then resets the characteristic to
//! [`COMMAND_SENTINEL`](super::server::COMMAND_SENTINEL).  Unknown tokens
//! are dropped without error.
//!
//! Actions run synchronously on the caller's thread, so a slow action
//! (the three-pulse blink takes three seconds) stalls sampling for its
//! whole duration.

use log::{debug, info, warn};

use crate::app::ports::BleStack;
use crate::gatt::server::{COMMAND_SENTINEL, EnvironmentServer};

/// Tokens recognised by the shipped firmware.
pub const BLINK_TOKEN: &str = "blink";

/// Most distinct tokens one channel holds.
pub const MAX_COMMANDS: usize = 8;
const MAX_TOKEN_LEN: usize = 16;

pub type Token = heapless::String<MAX_TOKEN_LEN>;

/// Zero-argument action bound to a token.
pub type Action = Box<dyn FnMut()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Mailbox held nothing (or only the sentinel).
    Empty,
    /// The token matched and its action ran.
    Executed(Token),
    /// Content did not match any token.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    TokenTooLong,
    TableFull,
}

impl core::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TokenTooLong => write!(f, "command token longer than {} bytes", MAX_TOKEN_LEN),
            Self::TableFull => write!(f, "command table holds at most {} tokens", MAX_COMMANDS),
        }
    }
}

impl core::error::Error for RegisterError {}

struct Entry {
    token: Token,
    action: Action,
}

/// Token → action table.
#[derive(Default)]
pub struct CommandChannel {
    entries: heapless::Vec<Entry, MAX_COMMANDS>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `action`.  Re-registering a token replaces its action.
    pub fn register<F>(&mut self, token: &str, action: F) -> Result<(), RegisterError>
    where
        F: FnMut() + 'static,
    {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.token.as_str() == token) {
            entry.action = Box::new(action);
            return Ok(());
        }
        let token = Token::try_from(token).map_err(|()| RegisterError::TokenTooLong)?;
        self.entries
            .push(Entry {
                token,
                action: Box::new(action),
            })
            .map_err(|_| RegisterError::TableFull)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.token.as_str())
    }

    /// Run the action for `bytes`, if any.  Matching is exact byte equality.
    pub fn dispatch(&mut self, bytes: &[u8]) -> CommandOutcome {
        if bytes.is_empty() || bytes == COMMAND_SENTINEL.as_slice() {
            return CommandOutcome::Empty;
        }
        match self.entries.iter_mut().find(|e| e.token.as_bytes() == bytes) {
            Some(entry) => {
                info!("CMD: running '{}'", entry.token);
                (entry.action)();
                CommandOutcome::Executed(entry.token.clone())
            }
            None => {
                debug!("CMD: ignoring {} unrecognised bytes", bytes.len());
                CommandOutcome::Ignored
            }
        }
    }

    /// Read the mailbox, act on a recognised token, then clear it.
    ///
    /// The clear happens whatever the outcome, including when the read
    /// itself failed.
    pub fn process_pending_command<S: BleStack>(
        &mut self,
        server: &EnvironmentServer<S>,
    ) -> CommandOutcome {
        let outcome = match server.read_command() {
            Ok(value) => self.dispatch(&value),
            Err(e) => {
                warn!("CMD: mailbox read failed: {}", e);
                CommandOutcome::Empty
            }
        };
        if let Err(e) = server.clear_command() {
            warn!("CMD: mailbox clear failed: {}", e);
        }
        outcome
    }
}

impl core::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.tokens()).finish()
    }
}
