//! The master loop: spawns the child pool, multiplexes their events to the
//! registered plugins, and turns Unix signals into warm or cold shutdown, via
//! a `tokio::signal::unix` + `tokio::select!` loop with two escalation levels
//! (a first INT/TERM requests a warm shutdown, a second or any QUIT aborts).

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

use parcel_core::Application;

use crate::child::{now_epoch, run_child, ChildConfig};
use crate::error::SupervisorError;
use crate::gate::ChildGate;
use crate::plugin::{Plugin, WorkerContext};

pub struct Supervisor {
    app: Application,
    concurrency: usize,
    queues: Vec<String>,
    fetch_timeout: f64,
    error_timeout: f64,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Supervisor {
    pub fn new(
        app: Application,
        concurrency: usize,
        queues: Vec<String>,
        fetch_timeout: f64,
        error_timeout: f64,
        plugins: Vec<Box<dyn Plugin>>,
    ) -> Self {
        Self {
            app,
            concurrency,
            queues,
            fetch_timeout,
            error_timeout,
            plugins,
        }
    }

    /// Runs until every child has exited after a shutdown. SIGINT and SIGTERM
    /// request a warm shutdown the first time and a cold one (task abort) the
    /// second; SIGQUIT aborts immediately, matching the signal table.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let mut sigint = signal(SignalKind::interrupt()).map_err(SupervisorError::SignalSetup)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(SupervisorError::SignalSetup)?;
        let mut sigquit = signal(SignalKind::quit()).map_err(SupervisorError::SignalSetup)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut gates = Vec::with_capacity(self.concurrency);
        let mut handles = Vec::with_capacity(self.concurrency);
        for id in 0..self.concurrency {
            let gate = Arc::new(ChildGate::new());
            let config = ChildConfig {
                queues: self.queues.clone(),
                fetch_timeout: self.fetch_timeout,
                error_timeout: self.error_timeout,
            };
            let handle = tokio::spawn(run_child(id, self.app.clone(), config, gate.clone(), tx.clone()));
            gates.push(gate);
            handles.push(handle);
        }
        drop(tx);

        let mut warm_requested = false;

        loop {
            let wait = self
                .plugins
                .iter()
                .filter_map(|p| p.master_idle(now_epoch()))
                .fold(f64::INFINITY, f64::min);
            let wait = if wait.is_finite() {
                Duration::from_secs_f64(wait.max(0.0))
            } else {
                Duration::from_secs(3600)
            };

            tokio::select! {
                biased;
                _ = sigquit.recv() => {
                    warn!("SIGQUIT received, aborting all children");
                    abort_all(&handles);
                    break;
                }
                _ = sigint.recv() => {
                    if warm_requested {
                        warn!("second SIGINT received, aborting all children");
                        abort_all(&handles);
                        break;
                    }
                    info!("SIGINT received, requesting warm shutdown");
                    warm_requested = true;
                    for gate in &gates {
                        gate.request_warm_shutdown();
                    }
                }
                _ = sigterm.recv() => {
                    if warm_requested {
                        warn!("second SIGTERM received, aborting all children");
                        abort_all(&handles);
                        break;
                    }
                    info!("SIGTERM received, requesting warm shutdown");
                    warm_requested = true;
                    for gate in &gates {
                        gate.request_warm_shutdown();
                    }
                }
                event = rx.recv() => {
                    match event {
                        Some((child_id, event)) => {
                            let ctx = WorkerContext { app: &self.app, children: &gates };
                            for plugin in &self.plugins {
                                plugin.handle_event(&ctx, child_id, &event).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(wait) => {
                    let ctx = WorkerContext { app: &self.app, children: &gates };
                    let now = now_epoch();
                    for plugin in &self.plugins {
                        plugin.on_idle(&ctx, now).await;
                    }
                }
            }
        }

        for gate in &gates {
            gate.set_terminated();
        }
        for handle in handles {
            if !handle.is_finished() {
                let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
            }
        }
        Ok(())
    }
}

fn abort_all(handles: &[tokio::task::JoinHandle<()>]) {
    for handle in handles {
        handle.abort();
    }
}
