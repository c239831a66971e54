use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::affiliate::AffiliateConverter;
use crate::config::ScheduleSettings;
use crate::pipeline::CrawlPipeline;
use crate::refresh::RefreshPass;

/// The batch stages a scheduler can trigger.
pub struct Stages {
    pub crawl: Arc<CrawlPipeline>,
    pub affiliate: Option<Arc<AffiliateConverter>>,
    pub refresh: Arc<RefreshPass>,
}

async fn add_job<S, F, Fut>(sched: &JobScheduler, stage: &'static str, cron: &str, state: Arc<S>, run: F) -> Result<()>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>) -> Fut + Send + Sync + Copy + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let state = Arc::clone(&state);
        Box::pin(async move {
            info!(stage, "scheduled run starting");
            run(state).await;
        })
    })
    .with_context(|| format!("creating {stage} job for cron `{cron}`"))?;
    sched
        .add(job)
        .await
        .with_context(|| format!("adding {stage} job"))?;
    Ok(())
}

/// `None` when no stage has a cron expression.
pub async fn maybe_build_scheduler(
    schedule: &ScheduleSettings,
    stages: Stages,
) -> Result<Option<JobScheduler>> {
    if schedule.crawl.is_none() && schedule.affiliate.is_none() && schedule.refresh.is_none() {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    if let Some(cron) = &schedule.crawl {
        add_job(&sched, "crawl", cron, stages.crawl, |crawl| async move {
            if let Err(err) = crawl.run_once().await {
                error!(error = %err, "scheduled crawl failed");
            }
        })
        .await?;
    }

    if let Some(cron) = &schedule.affiliate {
        let converter = stages
            .affiliate
            .context("affiliate schedule set but config has no affiliate section")?;
        add_job(&sched, "affiliate", cron, converter, |converter| async move {
            if let Err(err) = converter.run_once().await {
                error!(error = %err, "scheduled affiliate pass failed");
            }
        })
        .await?;
    }

    if let Some(cron) = &schedule.refresh {
        add_job(&sched, "refresh", cron, stages.refresh, |refresh| async move {
            if let Err(err) = refresh.run_once().await {
                error!(error = %err, "scheduled refresh failed");
            }
        })
        .await?;
    }

    Ok(Some(sched))
}
