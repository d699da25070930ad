use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use resumeflow_infra::{Backend, CleanupQueue, JobStore, RedisBackend, TaskQueue};
use resumeflow_worker::{
    Cli, CleanupPump, HttpProcessor, HttpResourceCleaner, LocalFileStore, Shutdown, Supervisor,
    TaskGc, Worker, spawn_signal_listener,
};

async fn log_stats(queue: &TaskQueue, phase: &'static str) {
    match queue.stats().await {
        Ok(stats) => info!(phase, ?stats, "queue stats"),
        Err(e) => warn!(phase, error = %e, "could not read queue stats"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    resumeflow_observability::init();

    let settings = Cli::parse().into_settings()?;

    let backend: Arc<dyn Backend> = Arc::new(
        RedisBackend::connect(&settings.redis_url)
            .await
            .context("failed to connect to redis")?,
    );
    let queue = TaskQueue::new(backend.clone(), settings.queue.clone());
    let jobs = JobStore::new(backend.clone(), settings.queue.clone());
    let cleanup_queue = CleanupQueue::new(backend, &settings.queue.keys);

    let processor = HttpProcessor::new(&settings.processor_url, settings.processor_timeout)
        .context("failed to build processor client")?;

    let mut pump = CleanupPump::new(cleanup_queue.clone(), jobs.clone(), settings.cleanup.clone());
    if let Some(dir) = &settings.upload_dir {
        let uploads = LocalFileStore::new(dir);
        pump = pump
            .with_cleaner(Arc::new(uploads.clone()))
            .with_uploads(uploads);
    }
    for (name, url) in [
        ("graph", &settings.graph_cleanup_url),
        ("vectors", &settings.vector_cleanup_url),
    ] {
        if let Some(url) = url {
            let cleaner = HttpResourceCleaner::new(name, url, settings.cleanup_timeout)
                .with_context(|| format!("failed to build {name} cleanup client"))?;
            pump = pump.with_cleaner(Arc::new(cleaner));
        }
    }

    let task_gc = TaskGc::new(queue.clone(), jobs.clone(), settings.queue.job_timeout);
    let worker = Worker::new(
        queue.clone(),
        jobs,
        cleanup_queue,
        Arc::new(processor),
        settings.worker.clone(),
    );

    log_stats(&queue, "startup").await;

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let mut supervisor = Supervisor::new(shutdown.clone());
    supervisor.spawn("worker", {
        let shutdown = shutdown.clone();
        async move {
            worker.run(shutdown).await;
        }
    });
    supervisor.spawn("cleanup", pump.run(shutdown.clone()));
    supervisor.spawn("task-gc", task_gc.run(settings.cleanup.sweep_interval, shutdown));

    info!(
        concurrency = settings.worker.concurrency,
        prefix = ?settings.queue.keys,
        "resumeflow worker running"
    );
    supervisor.wait().await;

    log_stats(&queue, "shutdown").await;
    info!("resumeflow worker exited");
    Ok(())
}
