//! Conversations: timers, per-user state, the state machine and dispatch

pub mod dispatch;
pub mod engine;
pub mod state;
pub mod timer;

pub use dispatch::Dispatcher;
pub use engine::{ConversationEngine, EngineParts, MAX_VOICE_SECS};
pub use state::{SessionPhase, SessionState};
pub use timer::SessionTimer;
