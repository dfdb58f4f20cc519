//! Per-request caller credentials and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use crate::domain::SecretString;
use crate::errors::{CertsError, Result};

/// Everything a service operation needs to know about its caller.
///
/// The deadline is absolute: every collaborator call made on behalf of the
/// request shares the same budget.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: SecretString,
    deadline: Instant,
}

impl RequestContext {
    pub fn new(token: impl Into<SecretString>, timeout: Duration) -> Self {
        Self::with_deadline(token, Instant::now() + timeout)
    }

    pub fn with_deadline(token: impl Into<SecretString>, deadline: Instant) -> Self {
        Self { token: token.into(), deadline }
    }

    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run `fut` under the request deadline; expiry becomes `Timeout`.
    pub async fn within<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let budget = self.remaining();
        match timeout_at(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(CertsError::timeout(operation, budget.as_millis() as u64)),
        }
    }
}
