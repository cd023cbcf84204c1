use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::display::{Rotation, RotationTiming};
use crate::events::{RotatorCommand, RotatorEvent, RotatorReason};
use crate::tasks::loader::{ImageLoader, LoadSet};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Owner of a running rotator task. Dropping the handle cancels the task,
/// which releases its timer and aborts any loads still in flight.
pub struct RotatorHandle {
    commands: Sender<RotatorCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl RotatorHandle {
    pub fn spawn<L: ImageLoader>(
        sources: Vec<String>,
        timing: RotationTiming,
        loader: Arc<L>,
        events: Sender<RotatorEvent>,
        max_in_flight: usize,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel::<RotatorCommand>(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            Rotation::new(sources, timing),
            loader,
            commands_rx,
            events,
            cancel.clone(),
            max_in_flight,
        ));
        Self {
            commands,
            cancel,
            task: Some(task),
        }
    }

    pub async fn set_sources(&self, sources: Vec<String>) -> Result<()> {
        self.send(RotatorCommand::SetSources(sources)).await
    }

    pub async fn set_timing(&self, timing: RotationTiming) -> Result<()> {
        self.send(RotatorCommand::SetTiming(timing)).await
    }

    /// Cancel the task and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await.context("rotator task panicked")?,
            None => Ok(()),
        }
    }

    async fn send(&self, cmd: RotatorCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| anyhow!("rotator task has stopped"))
    }
}

impl Drop for RotatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drives one [`Rotation`]: ticks it on a repeating timer, finishes fades,
/// feeds load outcomes back, and applies parameter changes. Every change to
/// the rendered view is published on `events`.
#[instrument(skip_all, fields(sources = rotation.sources().len()))]
pub async fn run<L: ImageLoader>(
    mut rotation: Rotation,
    loader: Arc<L>,
    mut commands: Receiver<RotatorCommand>,
    events: Sender<RotatorEvent>,
    cancel: CancellationToken,
    max_in_flight: usize,
) -> Result<()> {
    let mut loads = LoadSet::new(loader, max_in_flight);
    let mut ticker = schedule(&rotation);
    request_loads(&mut rotation, &mut loads);
    emit(&events, &cancel, &rotation, RotatorReason::Started).await;

    loop {
        let fade_deadline = rotation.fade_deadline();
        let fade_generation = rotation.generation();

        select! {
            biased;

            _ = cancel.cancelled() => break,

            maybe_cmd = commands.recv() => {
                let Some(cmd) = maybe_cmd else {
                    debug!("command channel closed; stopping rotator");
                    break;
                };
                let reason = match cmd {
                    RotatorCommand::SetSources(sources) => {
                        if !rotation.set_sources(sources) {
                            continue;
                        }
                        info!(sources = rotation.sources().len(), "rotation sources replaced");
                        loads.retain_queued(|url| rotation.sources().iter().any(|s| s == url));
                        RotatorReason::SourcesChanged
                    }
                    RotatorCommand::SetTiming(timing) => {
                        if !rotation.set_timing(timing) {
                            continue;
                        }
                        info!(interval = ?timing.interval, fade = ?timing.fade, "rotation timing replaced");
                        RotatorReason::TimingChanged
                    }
                };
                // The previous timer is dropped here; the new one starts a full
                // interval from now.
                ticker = schedule(&rotation);
                request_loads(&mut rotation, &mut loads);
                emit(&events, &cancel, &rotation, reason).await;
            }

            _ = next_tick(&mut ticker) => {
                if let Some(change) = rotation.tick(Instant::now()) {
                    debug!(previous = change.previous, current = change.current, "rotation tick");
                    request_loads(&mut rotation, &mut loads);
                    emit(&events, &cancel, &rotation, RotatorReason::Rotated(change)).await;
                }
            }

            _ = fade_finished(fade_deadline) => {
                if rotation.finish_fade(fade_generation) {
                    emit(&events, &cancel, &rotation, RotatorReason::FadeFinished).await;
                }
            }

            Some((url, result)) = loads.join_next() => {
                if rotation.on_load_result(&url, &result) {
                    emit(&events, &cancel, &rotation, RotatorReason::LoadFailed(url)).await;
                }
            }
        }
    }

    debug!("rotator stopped");
    Ok(())
}

fn schedule(rotation: &Rotation) -> Option<Interval> {
    if !rotation.rotates() {
        return None;
    }
    let period = rotation.timing().interval.max(MIN_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn fade_finished(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}

fn request_loads<L: ImageLoader>(rotation: &mut Rotation, loads: &mut LoadSet<L>) {
    for url in rotation.take_pending_loads() {
        loads.request(url);
    }
}

async fn emit(
    events: &Sender<RotatorEvent>,
    cancel: &CancellationToken,
    rotation: &Rotation,
    reason: RotatorReason,
) {
    let at = Instant::now();
    let event = RotatorEvent {
        at,
        reason,
        view: rotation.view(at),
    };
    select! {
        _ = cancel.cancelled() => {}
        res = events.send(event) => {
            if res.is_err() {
                debug!("rotator event receiver dropped");
            }
        }
    }
}
