use std::sync::Arc;
use tracing::{Instrument, info, trace_span};
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use pgportal::{JobsLogs, Result, SessionConfig};

mod table;
mod simple;
mod bulk;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = SessionConfig::from_env();
    let jobs = Arc::new(JobsLogs::from_config(&config));

    simple::main(config.clone(), jobs.clone()).instrument(trace_span!("simple")).await?;
    bulk::main(config, jobs.clone()).instrument(trace_span!("bulk")).await?;

    for job in jobs.finished_jobs() {
        info!("job {} `{}` by {}: {:?}", job.id, job.statement, job.user, job.error);
    }

    Ok(())
}
