//! Realtime call engine: WebRTC transport, protocol event reduction,
//! session bookkeeping, and the lifecycle manager that ties them together.

pub mod manager;
pub mod reducer;
pub mod session;
pub mod transport;

pub use manager::{CallConfig, CallManager, CallOptions};
pub use reducer::{Effect, EventReducer, HANGUP_GRACE};
pub use session::{CallEvent, CallSession};
pub use transport::{RealtimeTransport, TransportEvent};
