use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::contracts;
use crate::engine::discovery::{DiscoveryFeed, FeedQuery, FetchOutcome, FetchTicket};
use crate::error::AppError;
use crate::models::contract::{Contract, GeoPoint};
use crate::models::filter::{FilterParams, Viewport};
use crate::models::marker::Marker;
use crate::observability::metrics::Metrics;
use crate::state::AppState;

/// Where a feed fetches its candidate contracts from.
pub trait ContractSource: Send + Sync + 'static {
    fn list_contracts(
        &self,
        center: GeoPoint,
        filter: FilterParams,
    ) -> impl Future<Output = Result<Vec<Contract>, AppError>> + Send;
}

impl ContractSource for AppState {
    fn list_contracts(
        &self,
        center: GeoPoint,
        filter: FilterParams,
    ) -> impl Future<Output = Result<Vec<Contract>, AppError>> + Send {
        async move { Ok(contracts::list_contracts(self, &center, &filter)) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshSettings {
    pub interval: Duration,
    /// Polling stops once this much time has passed without viewer activity.
    pub window: Duration,
    pub command_buffer: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            window: Duration::from_secs(300),
            command_buffer: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FeedCommand {
    /// The map stopped panning or zooming.
    ViewportIdle(Viewport),
    Query(FeedQuery),
    RefreshNow,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub fetches_started: u64,
    pub fetches_applied: u64,
    pub fetches_failed: u64,
    pub fetches_dropped: u64,
    pub fetches_stale: u64,
}

pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    markers: watch::Receiver<Vec<Marker>>,
    cancel: CancellationToken,
    task: JoinHandle<FeedStats>,
}

impl FeedHandle {
    pub async fn send(&self, command: FeedCommand) -> Result<(), AppError> {
        self.commands
            .send(command)
            .await
            .map_err(|err| AppError::Internal(format!("feed command send failed: {err}")))
    }

    pub async fn viewport_idle(&self, viewport: Viewport) -> Result<(), AppError> {
        self.send(FeedCommand::ViewportIdle(viewport)).await
    }

    pub fn markers(&self) -> Vec<Marker> {
        self.markers.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Marker>> {
        self.markers.clone()
    }

    /// Stops the timer and abandons any in-flight fetch.
    pub async fn shutdown(self) -> Result<FeedStats, AppError> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|err| AppError::Internal(format!("feed task failed: {err}")))
    }
}

pub fn spawn_feed<S: ContractSource>(
    source: Arc<S>,
    feed: DiscoveryFeed,
    settings: RefreshSettings,
    metrics: Metrics,
) -> FeedHandle {
    let (command_tx, command_rx) = mpsc::channel(settings.command_buffer.max(1));
    let (markers_tx, markers_rx) = watch::channel(feed.markers().to_vec());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_feed(
        source,
        feed,
        settings,
        command_rx,
        markers_tx,
        cancel.clone(),
        metrics,
    ));

    FeedHandle {
        commands: command_tx,
        markers: markers_rx,
        cancel,
        task,
    }
}

type FetchResult = (FetchTicket, Result<Vec<Contract>, AppError>);

struct InFlight {
    seq: u64,
    started: Instant,
    task: JoinHandle<()>,
}

struct FeedRunner<S> {
    source: Arc<S>,
    feed: DiscoveryFeed,
    markers_tx: watch::Sender<Vec<Marker>>,
    done_tx: mpsc::Sender<FetchResult>,
    in_flight: Option<InFlight>,
    metrics: Metrics,
    stats: FeedStats,
}

impl<S: ContractSource> FeedRunner<S> {
    /// Starts a fetch unless one is already running. Returns whether it started.
    fn try_fetch(&mut self) -> bool {
        if self.in_flight.is_some() {
            self.stats.fetches_dropped += 1;
            self.count("dropped");
            debug!("fetch still in flight; dropping scheduled refresh");
            return false;
        }

        let (ticket, query) = self.feed.begin_fetch();
        let source = self.source.clone();
        let done_tx = self.done_tx.clone();
        let task = tokio::spawn(async move {
            let result = source.list_contracts(query.center, query.filter).await;
            let _ = done_tx.send((ticket, result)).await;
        });

        self.stats.fetches_started += 1;
        self.in_flight = Some(InFlight {
            seq: ticket.seq,
            started: Instant::now(),
            task,
        });
        true
    }

    fn abandon_fetch(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.task.abort();
            debug!(seq = in_flight.seq, "abandoned in-flight fetch");
        }
    }

    fn finish_fetch(&mut self, ticket: FetchTicket, result: Result<Vec<Contract>, AppError>) {
        if let Some(in_flight) = &self.in_flight {
            if in_flight.seq == ticket.seq {
                self.metrics
                    .feed_fetch_latency_seconds
                    .observe(in_flight.started.elapsed().as_secs_f64());
                self.in_flight = None;
            }
        }

        match self.feed.complete_fetch(ticket, result) {
            FetchOutcome::Applied => {
                self.stats.fetches_applied += 1;
                self.count("success");
                self.publish();
            }
            FetchOutcome::Failed => {
                self.stats.fetches_failed += 1;
                self.count("failure");
            }
            FetchOutcome::Stale => {
                self.stats.fetches_stale += 1;
                self.count("stale");
            }
        }
    }

    fn publish(&self) {
        self.markers_tx.send_replace(self.feed.markers().to_vec());
    }

    fn count(&self, outcome: &str) {
        self.metrics
            .feed_fetches_total
            .with_label_values(&[outcome])
            .inc();
    }
}

async fn run_feed<S: ContractSource>(
    source: Arc<S>,
    feed: DiscoveryFeed,
    settings: RefreshSettings,
    mut commands: mpsc::Receiver<FeedCommand>,
    markers_tx: watch::Sender<Vec<Marker>>,
    cancel: CancellationToken,
    metrics: Metrics,
) -> FeedStats {
    let (done_tx, mut done_rx) = mpsc::channel::<FetchResult>(4);
    metrics.active_feeds.inc();

    let mut runner = FeedRunner {
        source,
        feed,
        markers_tx,
        done_tx,
        in_flight: None,
        metrics,
        stats: FeedStats::default(),
    };

    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let window = sleep(settings.window);
    tokio::pin!(window);
    let mut polling = true;

    info!(
        interval_secs = settings.interval.as_secs(),
        window_secs = settings.window.as_secs(),
        "discovery feed started"
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = &mut window, if polling => {
                polling = false;
                info!("polling window elapsed; scheduled refresh stopped");
            }

            Some((ticket, result)) = done_rx.recv() => {
                runner.finish_fetch(ticket, result);
            }

            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    FeedCommand::ViewportIdle(viewport) => {
                        runner.feed.set_viewport(viewport);
                        runner.publish();
                    }
                    FeedCommand::Query(query) => {
                        if runner.feed.set_query(query) {
                            runner.publish();
                            runner.abandon_fetch();
                            runner.try_fetch();
                        }
                        polling = true;
                        window.as_mut().reset(tokio::time::Instant::now() + settings.window);
                    }
                    FeedCommand::RefreshNow => {
                        runner.try_fetch();
                        polling = true;
                        window.as_mut().reset(tokio::time::Instant::now() + settings.window);
                    }
                }
            }

            _ = ticker.tick(), if polling => {
                runner.try_fetch();
            }
        }
    }

    runner.abandon_fetch();
    runner.metrics.active_feeds.dec();
    info!(stats = ?runner.stats, "discovery feed stopped");
    runner.stats
}
