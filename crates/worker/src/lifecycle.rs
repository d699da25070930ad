//! Run/shutdown coordination shared by the worker and the pumps.
//!
//! Shutdown has two stages. The first termination signal moves the process to
//! `Draining`: loops stop taking new work and in-flight work runs to its end.
//! A second signal moves it to `Forced`, which stops waiting for the drain.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Upper bound for loop error backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Floor for periods and backoff bases; zero would spin (or panic in
/// `tokio::time::interval`).
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    Draining,
    Forced,
}

/// Cloneable shutdown flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    state: Arc<watch::Sender<ShutdownState>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Request a graceful drain. Returns `false` if already requested.
    pub fn trigger(&self) -> bool {
        self.advance(ShutdownState::Draining)
    }

    /// Stop waiting for in-flight work. Returns `false` if already forced.
    pub fn force(&self) -> bool {
        self.advance(ShutdownState::Forced)
    }

    fn advance(&self, to: ShutdownState) -> bool {
        self.state.send_if_modified(|state| {
            if *state < to {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        self.state() >= ShutdownState::Draining
    }

    pub fn is_forced(&self) -> bool {
        self.state() == ShutdownState::Forced
    }

    /// Resolves once a drain (or a forced stop) has been requested.
    pub async fn triggered(&self) {
        self.reached(ShutdownState::Draining).await;
    }

    /// Resolves once a forced stop has been requested.
    pub async fn forced(&self) {
        self.reached(ShutdownState::Forced).await;
    }

    async fn reached(&self, target: ShutdownState) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on a match.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

async fn termination_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Translate SIGINT/SIGTERM into shutdown stages: first drains, second forces.
pub fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = termination_signal().await {
                error!(error = %e, "failed to listen for termination signals");
                return;
            }
            if shutdown.trigger() {
                info!("shutdown requested, draining in-flight work (signal again to force)");
            } else {
                warn!("second shutdown signal, forcing exit");
                shutdown.force();
                return;
            }
        }
    })
}

/// Consecutive-failure backoff for long-running loops.
#[derive(Debug, Clone)]
pub struct ErrorBackoff {
    base: Duration,
    cap: Duration,
    consecutive_failures: u32,
}

impl ErrorBackoff {
    pub fn new(base: Duration) -> Self {
        let base = base.max(MIN_PERIOD);
        Self {
            base,
            cap: MAX_BACKOFF.max(base),
            consecutive_failures: 0,
        }
    }

    /// Record a failure and return how long to pause.
    pub fn failure(&mut self) -> Duration {
        let exp = self.consecutive_failures.min(5);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.base.saturating_mul(1 << exp).min(self.cap)
    }

    pub fn success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Sleep for `delay`, returning early (with `false`) if shutdown is requested.
pub async fn pause(shutdown: &Shutdown, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.triggered() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Drive `tick` every `period` until shutdown.
///
/// A tick that is running when shutdown arrives completes; no new tick starts
/// afterwards. Failed ticks add a growing pause before the next one.
pub async fn run_periodic<F, Fut, E>(
    name: &'static str,
    period: Duration,
    shutdown: Shutdown,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let period = period.max(MIN_PERIOD);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut backoff = ErrorBackoff::new(period);

    info!(service = name, period_secs = period.as_secs_f64(), "periodic service started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            _ = interval.tick() => {}
        }

        match tick().await {
            Ok(()) => backoff.success(),
            Err(e) => {
                let delay = backoff.failure();
                error!(
                    service = name,
                    error = %e,
                    failures = backoff.consecutive_failures(),
                    backoff_secs = delay.as_secs_f64(),
                    "periodic run failed"
                );
                if !pause(&shutdown, delay).await {
                    break;
                }
            }
        }
    }
    info!(service = name, "periodic service stopped");
}

/// Named long-running services sharing one [`Shutdown`].
#[derive(Debug)]
pub struct Supervisor {
    shutdown: Shutdown,
    services: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            services: Vec::new(),
        }
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn spawn<F>(&mut self, name: &'static str, service: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(service = name, "spawning service");
        let span = info_span!("service", service = name);
        self.services
            .push((name, tokio::spawn(service.instrument(span))));
    }

    /// Wait for every service to stop.
    ///
    /// A panicked service is logged and triggers shutdown of the others. On a
    /// forced stop, services still running are aborted.
    pub async fn wait(self) {
        let Self { shutdown, services } = self;
        let aborts: Vec<AbortHandle> = services.iter().map(|(_, h)| h.abort_handle()).collect();
        let mut running: FuturesUnordered<_> = services
            .into_iter()
            .map(|(name, handle)| async move { (name, handle.await) })
            .collect();

        loop {
            let next = tokio::select! {
                _ = shutdown.forced() => {
                    warn!(remaining = running.len(), "forced shutdown, aborting remaining services");
                    aborts.iter().for_each(AbortHandle::abort);
                    return;
                }
                next = running.next() => next,
            };
            let Some((name, result)) = next else {
                break;
            };

            match result {
                Ok(()) => info!(service = name, "service stopped"),
                Err(e) if e.is_panic() => {
                    warn!(service = name, error = %e, "service panicked, shutting down");
                    shutdown.trigger();
                }
                Err(e) => warn!(service = name, error = %e, "service cancelled"),
            }
        }
    }
}
