//! Session lifecycle state machine.
//!
//! ```text
//! Dead --Spawn--> Starting --Ready--> Alive --Begin--> Executing
//!  ^                 |                  ^                  |
//!  |                 |                  +-----Finish-------+
//!  +------Kill-------+------------------+------------------+
//! ```
//!
//! Every fault path goes through `Kill` back to `Dead`, and the session is
//! expected to `Spawn` again immediately so it is never left stuck in `Dead`.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Dead,
    Starting,
    Alive,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new interpreter process is being launched.
    Spawn,
    /// The process is running and its stream is being drained.
    Ready,
    /// A command has been written to the process.
    Begin,
    /// The command's sentinel was observed.
    Finish,
    /// The process was terminated (timeout, fault, restart, or close).
    Kill,
}

impl SessionState {
    /// Apply `event`, returning the next state or an error for an illegal move.
    pub fn next(self, event: SessionEvent) -> Result<SessionState> {
        use SessionEvent::{Begin, Finish, Kill, Ready, Spawn};
        use SessionState::{Alive, Dead, Executing, Starting};

        match (self, event) {
            (_, Kill) => Ok(Dead),
            (Dead, Spawn) => Ok(Starting),
            (Starting, Ready) => Ok(Alive),
            (Alive, Begin) => Ok(Executing),
            (Executing, Finish) => Ok(Alive),
            (state, event) => Err(anyhow!(
                "invalid session transition: {event:?} while {state}"
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Dead => "dead",
            SessionState::Starting => "starting",
            SessionState::Alive => "alive",
            SessionState::Executing => "executing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
