//! State that is shared between plan threads.
//!
//! Everything else a thread touches is its own clone; the types here are the exceptions and are
//! safe to hand around behind an `Arc`.

pub mod cache;
pub mod stop;

pub use cache::{CacheError, CacheKey, CompileCache};
pub use stop::StopSignal;
