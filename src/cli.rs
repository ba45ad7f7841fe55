// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Simulating concurrent camera sessions against one camera thread
//! - Showing the effective configuration

use camera_worker::constants::timing;
use camera_worker::{AppError, CameraSession, CameraThread, Config, WorkerResult};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Run `owners` sessions at once, each submitting `tasks` tasks, `rounds` times
pub fn simulate(
    config: Config,
    owners: usize,
    tasks: usize,
    rounds: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if owners == 0 {
        return Err(AppError::Other("--owners must be at least 1".to_string()).into());
    }

    let camera = CameraThread::new(config);
    let executed = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    println!(
        "Simulating {} owners x {} tasks over {} rounds",
        owners, tasks, rounds
    );
    println!();

    for round in 1..=rounds {
        let barrier = Arc::new(Barrier::new(owners));

        let handles: Vec<_> = (0..owners)
            .map(|owner| {
                let camera = camera.clone();
                let barrier = Arc::clone(&barrier);
                let executed = Arc::clone(&executed);
                thread::Builder::new()
                    .name(format!("owner-{}", owner))
                    .spawn(move || run_owner(&camera, &barrier, &executed, tasks))
            })
            .collect::<Result<_, _>>()?;

        for handle in handles {
            handle
                .join()
                .map_err(|_| AppError::Other("owner thread panicked".to_string()))??;
        }

        if !camera.wait_until_idle(timing::TEARDOWN_WAIT) {
            return Err(AppError::Other(format!(
                "camera thread still running {:?} after round {}",
                timing::TEARDOWN_WAIT,
                round
            ))
            .into());
        }

        let status = camera.status();
        println!(
            "  round {}: {} tasks executed, {} camera threads opened so far, state {}",
            round,
            executed.load(Ordering::SeqCst),
            status.contexts_started,
            status.state
        );
    }

    let status = camera.status();
    println!();
    println!("Finished in {}", format_elapsed(started.elapsed()));
    println!("  Tasks executed:        {}", executed.load(Ordering::SeqCst));
    println!("  Camera threads opened: {}", status.contexts_started);
    println!("  Final state:           {}", status.state);

    Ok(())
}

/// One simulated owner: open, submit, ask the thread for its name, close
fn run_owner(
    camera: &CameraThread,
    barrier: &Barrier,
    executed: &Arc<AtomicUsize>,
    tasks: usize,
) -> WorkerResult<()> {
    barrier.wait();

    let counter = Arc::clone(executed);
    let session = CameraSession::open(camera, move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })?;

    for _ in 0..tasks {
        let counter = Arc::clone(executed);
        session.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
    }

    let thread_name = session.call(|| thread::current().name().map(str::to_string))?;
    if let Ok(Some(name)) = pollster::block_on(thread_name) {
        tracing::debug!(session = %session.id(), thread = %name, "Tasks ran on camera thread");
    }

    session.close()
}

/// Print the effective configuration as JSON
pub fn show_config(config: &Config, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(path) if path.exists() => println!("Loaded from: {}", path.display()),
        Some(path) => println!("Defaults ({} does not exist)", path.display()),
        None => println!("Defaults (no config directory)"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() > 0 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
