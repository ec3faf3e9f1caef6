//! Authoritative tick loop
//!
//! Every step: advance the game (or start the next one), drain the socket,
//! dispatch, send replies, then broadcast a snapshot to spectators.

use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::game::layout::{self, LayoutError};
use crate::game::snapshot::SnapshotBuilder;
use crate::game::step::step;
use crate::game::world::{Phase, World};
use crate::net::codec::Envelope;
use crate::net::socket::{NetSocket, TransportError};
use crate::server::dispatch::Dispatcher;
use crate::server::report::{self, Results};
use crate::util::time::{secs_to_duration, Timer};

/// Shortest step the loop will run at
const MIN_STEP: Duration = Duration::from_millis(1);

/// Server errors. All of these end the process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Layout failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Could not write results: {0}")]
    Results(#[from] std::io::Error),
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Every game has been played
    Complete,
}

/// How the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// The battle server: world, socket and the loop that drives them
pub struct Server {
    config: Config,
    world: World,
    socket: NetSocket,
    dispatcher: Dispatcher,
    snapshots: SnapshotBuilder,
    stats_timer: Timer,
}

impl Server {
    /// Lay out the arena and bind the socket
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut world = World::new(config.sim.clone(), seed);

        if world.conf.obstacles.is_empty() {
            world.conf.obstacles =
                layout::make_obstacles(&world.conf, config.obstacle_count, &mut world.rng)?;
        }
        if world.conf.jam_zones.is_empty() {
            world.conf.jam_zones =
                layout::make_jam_zones(&world.conf, config.jam_zone_count, &mut world.rng);
        }

        let socket = NetSocket::bind(config.server_addr).await?;
        let dispatcher = Dispatcher::new(&world.conf);

        info!(
            addr = %socket.local_addr()?,
            name = %world.conf.server_name,
            bots_in_game = world.conf.bots_in_game,
            games_to_play = world.conf.games_to_play,
            step_sec = world.conf.step_sec,
            obstacles = world.conf.obstacles.len(),
            jam_zones = world.conf.jam_zones.len(),
            seed,
            "Server ready, waiting for robots"
        );

        Ok(Self {
            config,
            world,
            socket,
            dispatcher,
            snapshots: SnapshotBuilder::new(),
            stats_timer: Timer::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Run until every game has been played
    pub async fn run(self) -> Result<RunOutcome, ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until every game has been played or `shutdown` resolves
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<RunOutcome, ServerError>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            result = self.run_loop() => result?,
            _ = shutdown => {
                info!("Shutdown requested, stopping tick loop");
                RunOutcome::Interrupted
            }
        };

        self.finish(outcome)
    }

    async fn run_loop(&mut self) -> Result<RunOutcome, ServerError> {
        let step_duration = secs_to_duration(self.world.conf.step_sec).max(MIN_STEP);
        let mut ticker = interval(step_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let waiting = Instant::now();
            ticker.tick().await;
            let counters = &mut self.world.counters;
            counters.sleep_time += waiting.elapsed();
            counters.sleep_count += 1;

            let busy = Instant::now();
            if self.tick()? == TickOutcome::Complete {
                return Ok(RunOutcome::Completed);
            }

            let busy = busy.elapsed();
            if busy > step_duration {
                self.world.counters.long_step_count += 1;
                warn!(
                    busy_ms = busy.as_secs_f64() * 1000.0,
                    step_ms = step_duration.as_secs_f64() * 1000.0,
                    "Server running slower than one step per stepSec"
                );
            }
        }
    }

    /// One step of the loop, without waiting for the next step boundary
    pub fn tick(&mut self) -> Result<TickOutcome, ServerError> {
        let timer = Timer::new();
        match self.world.phase() {
            Phase::Running => {
                let stepped = step(&mut self.world);
                if stepped.game_over {
                    info!(
                        game = self.world.counters.game_number,
                        steps = self.world.counters.game_step,
                        "Game over\n{}",
                        report::scoreboard(&self.world)
                    );
                }
            }
            Phase::Lobby if self.world.ready_to_start() => self.world.start_game()?,
            Phase::Lobby => {}
            Phase::Complete => return Ok(TickOutcome::Complete),
        }
        self.world.counters.step_time += timer.elapsed();

        let timer = Timer::new();
        let inbound = self.drain_inbound();
        let dispatched = self.dispatcher.dispatch(&mut self.world, inbound);
        for (envelope, dest) in &dispatched.replies {
            if let Err(e) = self.socket.try_send_message(envelope, *dest) {
                warn!(%dest, kind = %envelope.kind(), error = %e, "Failed to send reply");
            }
        }
        self.world.counters.msg_time += timer.elapsed();

        let timer = Timer::new();
        self.broadcast();
        self.world.counters.viewer_time += timer.elapsed();

        if self.stats_timer.elapsed() >= self.config.stats_interval {
            report::log_stats(&self.world, self.socket.stats(), self.snapshots.stats());
            self.stats_timer.reset();
        }

        Ok(TickOutcome::Continue)
    }

    /// Take everything waiting in the socket without blocking
    fn drain_inbound(&mut self) -> Vec<(Envelope, SocketAddr)> {
        let mut inbound = Vec::new();
        loop {
            match self.socket.recv_message() {
                Ok(message) => inbound.push(message),
                Err(TransportError::BufferEmpty) => break,
                Err(TransportError::Malformed { src, source }) => {
                    warn!(%src, error = %source, "Dropping malformed message");
                }
                Err(e) => {
                    error!(error = %e, "Receive failed");
                    break;
                }
            }
        }
        inbound
    }

    /// Drop silent spectators and send the rest one shared snapshot
    fn broadcast(&mut self) {
        let now = Instant::now();
        self.world.spectators.retain(|src, spectator| {
            let keep = !spectator.is_stale(now);
            if !keep {
                info!(%src, "Viewer stopped sending keep-alives, removed");
            }
            keep
        });
        if self.world.spectators.is_empty() {
            return;
        }

        let bytes = match self.snapshots.encode(&self.world) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode snapshot");
                return;
            }
        };
        for dest in self.world.spectators.keys() {
            if let Err(e) = self.socket.try_send_raw(&bytes, *dest) {
                warn!(%dest, error = %e, "Failed to send snapshot");
            }
        }
    }

    /// Log final stats and scoreboard, write results if configured
    fn finish(self, outcome: RunOutcome) -> Result<RunOutcome, ServerError> {
        report::log_stats(&self.world, self.socket.stats(), self.snapshots.stats());
        info!(
            ?outcome,
            games = self.world.counters.game_number,
            "Final scoreboard\n{}",
            report::scoreboard(&self.world)
        );

        if let Some(path) = &self.config.results_path {
            Results::from_world(&self.world).write(path)?;
            info!(path = %path.display(), "Results written");
        }
        Ok(outcome)
    }
}
