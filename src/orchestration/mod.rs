//! # Orchestration
//!
//! The services that move jobs through their lifecycle.
//!
//! ## Components
//!
//! - [`JobLifecycleManager`] - client operations (create, get, list, delete, cancel, pause, resume, fail)
//! - [`DependencyResolver`] - eligibility rules and the completion cascade
//! - [`TaskDispatcher`] - builds tracked envelopes and publishes them, recording publish failures
//! - [`DelayedJobScheduler`] - releases delayed jobs and handles resume triggers
//! - [`JobServiceSystem`] - wires everything above from one configuration
//!
//! All components share one `Arc<dyn JobStore>`; none of them hold locks of
//! their own, so concurrent callers serialize only inside the store.

pub mod bootstrap;
pub mod delayed_job_scheduler;
pub mod dependency_resolver;
pub mod job_lifecycle;
pub mod task_dispatcher;

pub use bootstrap::{JobServiceSystem, SystemHandle};
pub use delayed_job_scheduler::DelayedJobScheduler;
pub use dependency_resolver::{DependencyResolver, Eligibility, EligibilityCheck};
pub use job_lifecycle::{JobCreation, JobLifecycleManager};
pub use task_dispatcher::{FailureSource, TaskDispatcher};
