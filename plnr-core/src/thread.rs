mod context;
mod scheduler;

pub use context::{ThreadContext, ThreadHandle, Variables};
pub use scheduler::{PlanThread, StopReason, ThreadMonitor, ThreadState, ThreadSummary};
