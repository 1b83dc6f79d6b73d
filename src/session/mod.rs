pub mod configure;
pub mod controller;
pub mod state;

pub use configure::{ConfigFailure, ConfigReport};
pub use controller::{ConnectOutcome, SessionController, SessionEvent};
pub use state::{SessionSnapshot, SessionState, SessionStatus};
