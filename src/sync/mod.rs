//! Thread coordination used by transfer objects and their streams.
//!
//! The shell thread owns a [`TaskQueue`]; producers running elsewhere post
//! their callbacks onto it. Blocking readers on the shell thread pump that
//! queue instead of parking, while readers on other threads park on a
//! [`ManualResetEvent`].

pub mod event;
pub mod queue;
pub mod region;

pub use event::{CompletionGuard, ManualResetEvent};
pub use queue::{QueueError, TaskQueue};
pub use region::SharedRegion;
