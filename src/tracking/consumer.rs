//! # Tracking Consumer
//!
//! Drains the tracking queue into the [`JobTrackingProxy`] and the resume
//! queue into the [`DelayedJobScheduler`]. A message is acknowledged once it
//! has been handled, or when handling failed for a reason redelivery cannot
//! fix. Transient failures leave it unacknowledged for redelivery.

use super::proxy::JobTrackingProxy;
use crate::config::{QueueConfig, TrackingConfig};
use crate::error::{JobServiceError, Result};
use crate::logging::log_error;
use crate::messaging::{Delivery, ResumeJobMessage, TaskQueueConsumer};
use crate::orchestration::DelayedJobScheduler;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct TrackingConsumer {
    consumer: Arc<dyn TaskQueueConsumer>,
    proxy: Arc<JobTrackingProxy>,
    scheduler: Arc<DelayedJobScheduler>,
    queues: QueueConfig,
    config: TrackingConfig,
    shutdown_notify: Notify,
}

impl TrackingConsumer {
    pub fn new(
        consumer: Arc<dyn TaskQueueConsumer>,
        proxy: Arc<JobTrackingProxy>,
        scheduler: Arc<DelayedJobScheduler>,
        queues: QueueConfig,
        config: TrackingConfig,
    ) -> Self {
        Self {
            consumer,
            proxy,
            scheduler,
            queues,
            config,
            shutdown_notify: Notify::new(),
        }
    }

    /// Handle one batch from the tracking queue; returns messages acknowledged
    pub async fn poll_tracking_queue(&self) -> Result<usize> {
        let deliveries = self
            .consumer
            .receive(
                &self.queues.tracking_queue,
                self.config.consumer_batch_size,
                self.config.consumer_visibility_timeout_seconds,
            )
            .await?;

        let mut acknowledged = 0;
        for delivery in deliveries {
            let outcome = self.proxy.handle_envelope(delivery.envelope.clone()).await;
            if self.settle(&delivery, outcome).await? {
                acknowledged += 1;
            }
        }
        Ok(acknowledged)
    }

    /// Handle one batch from the resume queue; returns messages acknowledged
    pub async fn poll_resume_queue(&self) -> Result<usize> {
        let deliveries = self
            .consumer
            .receive(
                &self.queues.resume_job_queue,
                self.config.consumer_batch_size,
                self.config.consumer_visibility_timeout_seconds,
            )
            .await?;

        let mut acknowledged = 0;
        for delivery in deliveries {
            let outcome = match ResumeJobMessage::from_envelope(&delivery.envelope) {
                Some(message) => self.scheduler.handle_resume(&message).await.map(|_| ()),
                None => Err(JobServiceError::bad_request(
                    "Resume trigger is missing partitionId or jobId.",
                )),
            };
            if self.settle(&delivery, outcome).await? {
                acknowledged += 1;
            }
        }
        Ok(acknowledged)
    }

    /// Acknowledge unless the failure is transient
    async fn settle(&self, delivery: &Delivery, outcome: Result<()>) -> Result<bool> {
        match outcome {
            Err(err) if err.is_transient() => {
                warn!(
                    queue = %delivery.queue_name,
                    message_id = delivery.message_id,
                    error = %err,
                    "Leaving message for redelivery"
                );
                Ok(false)
            }
            Err(err) => {
                log_error(
                    "tracking_consumer",
                    "handle_message",
                    &err.to_string(),
                    Some(&delivery.queue_name),
                );
                self.consumer.acknowledge(delivery).await?;
                Ok(true)
            }
            Ok(()) => {
                self.consumer.acknowledge(delivery).await?;
                Ok(true)
            }
        }
    }

    /// Spawn the polling loop; it runs until [`Self::shutdown`]
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                tracking_queue = %self.queues.tracking_queue,
                resume_queue = %self.queues.resume_job_queue,
                "🚀 Tracking consumer started"
            );

            loop {
                let mut handled = 0;
                match self.poll_tracking_queue().await {
                    Ok(count) => handled += count,
                    Err(e) => error!(error = %e, "Tracking queue poll failed"),
                }
                match self.poll_resume_queue().await {
                    Ok(count) => handled += count,
                    Err(e) => error!(error = %e, "Resume queue poll failed"),
                }

                // Keep draining while there is work
                let wait = if handled > 0 {
                    std::time::Duration::ZERO
                } else {
                    self.config.consumer_poll_interval()
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {},
                    _ = self.shutdown_notify.notified() => {
                        debug!("Shutdown notification received");
                        break;
                    }
                }
            }

            info!("🛑 Tracking consumer stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_notify.notify_one();
    }
}
