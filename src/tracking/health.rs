use crate::store::JobStore;
use serde::Serialize;
use std::sync::Arc;

/// Result of a connectivity probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub component: String,
    pub message: String,
}

/// Checks the job store is reachable without reading or writing job state
#[derive(Debug, Clone)]
pub struct HealthProbe {
    store: Arc<dyn JobStore>,
}

impl HealthProbe {
    pub const COMPONENT: &'static str = "job-store";

    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self) -> HealthStatus {
        match self.store.health_check().await {
            Ok(()) => HealthStatus {
                healthy: true,
                component: Self::COMPONENT.to_string(),
                message: "Job store is reachable.".to_string(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "💔 Job store health check failed");
                HealthStatus {
                    healthy: false,
                    component: Self::COMPONENT.to_string(),
                    message: err.to_string(),
                }
            }
        }
    }
}
