// Job state machine
//
// The transition table lives in `guards` as pure functions so both job store
// implementations apply identical rules inside their own transactions.

pub mod events;
pub mod guards;
pub mod states;

pub use events::JobEvent;
pub use guards::{evaluate, StateGuard, TransitionDecision};
pub use states::JobStatus;
