use crate::common::time::now_utc;
use crate::context::AppContext;
use crate::delivery::{run_delivery, DeliveryMode};
use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Registers the delivery and retry jobs. The returned scheduler has to be kept alive.
pub async fn start_scheduler(ctx: AppContext) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let delivery_cron = ctx.config.scheduler.delivery_cron.clone();
    let retry_cron = ctx.config.scheduler.retry_cron.clone();

    scheduler
        .add(delivery_job(&delivery_cron, ctx.clone(), DeliveryMode::Scheduled)?)
        .await?;
    scheduler
        .add(delivery_job(&retry_cron, ctx, DeliveryMode::Retry)?)
        .await?;

    scheduler.start().await?;
    info!(
        "scheduler started: delivery '{}', retry '{}'",
        delivery_cron, retry_cron
    );

    Ok(scheduler)
}

fn delivery_job(cron_expression: &str, ctx: AppContext, mode: DeliveryMode) -> Result<Job> {
    let job = Job::new_async(cron_expression, move |_uuid, _l| {
        let ctx = ctx.clone();
        let mode = mode.clone();
        Box::pin(async move {
            if let Err(e) = run_delivery(&ctx, mode.clone(), now_utc()).await {
                error!("scheduled {:?} run failed: {}", mode, e);
            }
        })
    })?;

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::curation::tests::FakeNews;
    use crate::database::test_pool;
    use crate::email::tests::FakeMailer;
    use std::sync::Arc;

    #[tokio::test]
    async fn rejects_invalid_cron_expressions() {
        let ctx = AppContext::new(
            test_pool().await,
            test_config(),
            Arc::new(FakeNews::new(vec![])),
            Arc::new(FakeMailer::default()),
        )
        .unwrap();

        assert!(delivery_job("0 0 * * * *", ctx.clone(), DeliveryMode::Scheduled).is_ok());
        assert!(delivery_job("every hour", ctx, DeliveryMode::Scheduled).is_err());
    }
}
