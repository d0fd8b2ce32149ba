//! Worker lifecycle states.
//!
//! ```text
//! Idle ─► Forking(n) ─► OnlineWait(n) ─► Initializing(n) ─► Ready ─► Terminated
//!             ▲              │                 │                        ▲
//!             │              ▼                 ▼                        │
//!             └──────── Failed(n) ◄────────────┘                        │
//!               n < max                 n == max ───────────────────────┘
//! ```
//!
//! `n` is the 1-based attempt number.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Forking { attempt: u32 },
    OnlineWait { attempt: u32 },
    Initializing { attempt: u32 },
    Ready,
    Failed { attempt: u32 },
    Terminated,
}

impl WorkerState {
    /// A start is underway.
    #[must_use]
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            Self::Forking { .. } | Self::OnlineWait { .. } | Self::Initializing { .. } | Self::Failed { .. }
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Forking { attempt } => write!(f, "forking (attempt {attempt})"),
            Self::OnlineWait { attempt } => write!(f, "waiting for online (attempt {attempt})"),
            Self::Initializing { attempt } => write!(f, "initializing (attempt {attempt})"),
            Self::Ready => write!(f, "ready"),
            Self::Failed { attempt } => write!(f, "failed (attempt {attempt})"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}
