#![forbid(unsafe_code)]

//! The OFFERED → CLAIMED → FINISHED handoff between the bot and the tester.
//!
//! Ownership: the producer creates OFFERED and deletes FINISHED; the consumer creates
//! CLAIMED and FINISHED and deletes OFFERED and CLAIMED. Anything else observed in the
//! store is corruption and gets cleared, or a violation and is fatal.

mod consumer;
mod error;
mod producer;

pub use consumer::{Consumer, ConsumerConfig, ConsumerExit, PollOutcome, StartMode, WorkContext};
pub use error::HandoffError;
pub use producer::{Producer, ProducerConfig, ProducerReport};
