use crate::email::client::{EmailError, EmailSender, OutgoingEmail, SendReceipt};
use std::time::Duration;
use tracing::warn;

pub mod client;
pub mod model;
pub mod render;
pub mod repository;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Sends `email`, retrying transient failures with a fixed backoff. Returns the final result
/// together with the number of attempts made.
pub async fn send_with_retry(
    sender: &dyn EmailSender,
    email: &OutgoingEmail,
    policy: RetryPolicy,
) -> (Result<SendReceipt, EmailError>, u32) {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match sender.send(email).await {
            Ok(receipt) => return (Ok(receipt), attempt),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "send attempt {}/{} failed, retrying in {:?}: {}",
                    attempt, max_attempts, policy.backoff, e
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => return (Err(e), attempt),
        }
    }
}
