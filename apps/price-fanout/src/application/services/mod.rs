//! Application Services
//!
//! The fan-out pipeline:
//!
//! ```text
//! Poller ──► PriceSource ──► Publisher ──► broker topic
//!                                               │
//! StreamSession ◄── PriceHub ◄── Subscriber ◄───┘
//! ```
//!
//! [`FanoutService`] owns all of it.

mod error;
mod lifecycle;
mod poller;
mod publisher;
mod session;
mod state;
mod subscriber;

pub use error::FanoutError;
pub use lifecycle::{FanoutService, PollerMode, ServiceOptions};
pub use poller::Poller;
pub use publisher::Publisher;
pub use session::StreamSession;
pub use state::{ServiceState, ServiceStateSnapshot};
pub use subscriber::{EventHandler, Subscriber};
