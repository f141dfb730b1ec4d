//! Connection session
//!
//! Owns the single live connection to the bridge, reconnects with a bounded
//! budget, and fans incoming machine states out to subscribers.
//!
//! ```text
//!            connect()                 link opened
//!   Idle ─────────────▶ Connecting ─────────────────▶ Open
//!    ▲                      │  failed                  │ closed / error
//!    │ budget spent         ▼                          ▼
//!    └──────────────── Reconnecting ◀──────────────────┘
//!                           │ timer (2000 ms)
//!                           └────────▶ Connecting
//! ```

mod error;
mod manager;
pub mod message;
mod subscribers;
pub mod transport;

pub use error::SessionError;
pub use manager::{SessionManager, SessionState, SessionStatus};
pub use message::{ClientMessage, DiagnosisFeedback, Envelope, ServerMessage};
pub use subscribers::{Listener, SubscriberList, Subscription};
pub use transport::{
    transport_for, LineLink, LineTransport, Link, Transport, WebSocketLink, WebSocketTransport,
};
