//! Completion tracking for pipeline stages.
//!
//! [`CompletionCell`] is a value written once and read many times.
//! [`CompletionCounter`] builds on it: leaf counters are incremented by the
//! stage doing the work and finalized when it is done, and aggregates sum
//! any tree of counters so a coordinator can wait for all of them at once.
//!
//! ```rust
//! use std::sync::Arc;
//! use packetflow::{CompletionCounter, Result};
//!
//! fn main() -> Result<()> {
//!     let decode = Arc::new(CompletionCounter::leaf());
//!     let encode = Arc::new(CompletionCounter::leaf());
//!     let total = CompletionCounter::aggregate([Arc::clone(&decode), Arc::clone(&encode)]);
//!
//!     decode.increment()?;
//!     encode.increment()?;
//!     encode.increment()?;
//!     assert_eq!(total.read_now(), 3);
//!
//!     decode.finalize()?;
//!     encode.finalize()?;
//!     assert_eq!(total.read_blocking(), 3);
//!     Ok(())
//! }
//! ```

mod cell;
mod counter;

pub use cell::CompletionCell;
pub use counter::CompletionCounter;
