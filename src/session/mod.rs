//! Call negotiation: one call at a time, local media before remote media

mod call;
mod negotiator;
mod state;

pub use call::{CallSession, CallSummary};
pub use negotiator::SessionNegotiator;
pub use state::{CallDirection, CallState, EndReason, SessionEvent};
