//! # Messaging
//!
//! Task envelopes and the queue gateway the core publishes through.
//!
//! - [`message`] - envelope, tracking metadata and resume-trigger formats
//! - [`gateway`] - [`TaskQueueGateway`] / [`TaskQueueConsumer`] traits with pgmq and in-memory backends
//! - [`errors`] - [`MessagingError`] and its mapping onto [`crate::error::JobServiceError`]

pub mod errors;
pub mod gateway;
pub mod message;

pub use errors::{MessagingError, MessagingResult};
pub use gateway::{
    pgmq_queue_name, Delivery, InMemoryQueueGateway, PgmqQueueGateway, TaskQueueConsumer,
    TaskQueueGateway,
};
pub use message::{url_encode, ResumeJobMessage, SourceInfo, TaskEnvelope, TaskStatus, TrackingInfo};
