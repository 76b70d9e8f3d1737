//! Worker command: execute queued jobs in this process

use crate::error::Result;
use crate::jobs::JobEngine;
use crate::meta::MetaDb;
use crate::progress::{add_job_bar, add_spinner};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct WorkStats {
    pub attempts: usize,
    pub elapsed_ms: u64,
}

/// Mirror RUNNING jobs onto progress bars until `stop` flips
async fn watch_progress(db: MetaDb, mut stop: watch::Receiver<bool>) {
    let idle = add_spinner("waiting for jobs");
    let mut bars: HashMap<String, ProgressBar> = HashMap::new();

    loop {
        if let Ok(running) = db.running_jobs().await {
            let live: Vec<&str> = running.iter().map(|j| j.id.as_str()).collect();
            bars.retain(|id, bar| {
                let keep = live.contains(&id.as_str());
                if !keep {
                    bar.finish_and_clear();
                }
                keep
            });
            for job in &running {
                let bar = bars
                    .entry(job.id.clone())
                    .or_insert_with(|| add_job_bar(&job.kind));
                bar.set_position(job.progress.clamp(0, 100) as u64);
                bar.set_message(format!("attempt {}", job.attempt_count));
            }
            if running.is_empty() {
                idle.set_message("waiting for jobs");
            } else {
                idle.set_message(format!("{} running", running.len()));
            }
        }

        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }

    for bar in bars.values() {
        bar.finish_and_clear();
    }
    idle.finish_and_clear();
}

/// Drain the queue, or with `follow` keep polling until Ctrl-C
pub async fn cmd_work(engine: Arc<JobEngine>, follow: bool, show_progress: bool) -> Result<WorkStats> {
    let started = Instant::now();
    let (stop_tx, stop_rx) = watch::channel(false);

    let watcher = show_progress.then(|| {
        tokio::spawn(watch_progress(engine.context().db.clone(), stop_rx.clone()))
    });

    let attempts = if follow {
        info!(
            workers = engine.context().config.jobs.workers,
            "Worker pool started; press Ctrl-C to stop"
        );
        let handles = engine.spawn_workers(stop_rx);
        tokio::signal::ctrl_c().await?;
        info!("Shutting down workers");
        let _ = stop_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
        0
    } else {
        let attempts = engine.run_until_idle().await;
        let _ = stop_tx.send(true);
        attempts?
    };

    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }

    Ok(WorkStats {
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

pub fn print_work_stats(stats: &WorkStats) {
    println!("\n✓ Queue drained");
    println!("  Job attempts: {}", stats.attempts);
    println!("  Elapsed: {:.1}s", stats.elapsed_ms as f64 / 1000.0);
}
