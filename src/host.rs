//! Host request streams and their replay against an [`Ftl`].

use std::time::Duration;

use futures::stream::{self, TryStreamExt};
use log::*;
use parking_lot::Mutex;
use rand::prelude::*;
use tokio::time::Instant;

use crate::config::*;
use crate::error::{FtlError, Result};
use crate::flash::Flash;
use crate::ftl::{Extent, Ftl};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Discard,
    Flush,
    Clean,
    LevelWear,
}

impl Operation {
    /// Control operations wait for every queued request and run alone.
    pub fn is_barrier(self) -> bool {
        matches!(
            self,
            Operation::Flush | Operation::Clean | Operation::LevelWear
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostEvent {
    pub op: Operation,
    pub extent: Extent,
}

impl HostEvent {
    pub fn new(op: Operation, lpn_start: Lpn, lpn_count: Counter) -> Self {
        HostEvent {
            op,
            extent: Extent::new(lpn_start, lpn_count),
        }
    }

    pub fn control(op: Operation) -> Self {
        HostEvent::new(op, 0, 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub reads: Counter,
    pub writes: Counter,
    pub discards: Counter,
    pub controls: Counter,
    pub elapsed: Duration,
}

impl ReplayStats {
    pub fn events(&self) -> Counter {
        self.reads + self.writes + self.discards + self.controls
    }

    fn count(&mut self, op: Operation) {
        match op {
            Operation::Read => self.reads += 1,
            Operation::Write => self.writes += 1,
            Operation::Discard => self.discards += 1,
            _ => self.controls += 1,
        }
    }
}

async fn execute<F: Flash>(ftl: &Ftl<F>, event: HostEvent) -> Result<()> {
    trace!("host event {:?}", event);
    match event.op {
        Operation::Read => {
            ftl.read_extent(event.extent).await?;
        }
        Operation::Write => ftl.write_extent(event.extent).await?,
        Operation::Discard => ftl.discard_extent(event.extent).await?,
        Operation::Flush => ftl.flush_trans_cache().await?,
        Operation::Clean => {
            ftl.clean().await?;
        }
        Operation::LevelWear => {
            ftl.level_wear().await?;
        }
    }
    Ok(())
}

/// Replays `events` keeping at most `depth` requests in flight. Requests may
/// complete out of order; control events act as barriers.
pub async fn replay<F: Flash>(
    ftl: &Ftl<F>,
    events: impl IntoIterator<Item = HostEvent>,
    depth: usize,
) -> Result<ReplayStats> {
    let start = Instant::now();
    let stats = Mutex::new(ReplayStats::default());
    let depth = depth.max(1);

    let mut queued = Vec::new();
    for event in events {
        if event.op.is_barrier() {
            run_queue(ftl, queued.drain(..), depth, &stats).await?;
            execute(ftl, event).await?;
            stats.lock().count(event.op);
        } else {
            queued.push(event);
        }
    }
    run_queue(ftl, queued.drain(..), depth, &stats).await?;

    let mut stats = stats.into_inner();
    stats.elapsed = start.elapsed();
    info!(
        "replayed {} events in {} ns",
        stats.events(),
        device_nanos(stats.elapsed)
    );
    Ok(stats)
}

async fn run_queue<F: Flash>(
    ftl: &Ftl<F>,
    events: impl Iterator<Item = HostEvent>,
    depth: usize,
    stats: &Mutex<ReplayStats>,
) -> Result<()> {
    stream::iter(events.map(Ok::<_, FtlError>))
        .try_for_each_concurrent(depth, |event| async move {
            execute(ftl, event).await?;
            stats.lock().count(event.op);
            Ok(())
        })
        .await
}

/// Writes every LPN below `lpn_limit` once, `chunk` pages per request.
pub fn sequential_fill(lpn_limit: Lpn, chunk: Counter) -> Vec<HostEvent> {
    let chunk = chunk.max(1);
    (0..lpn_limit)
        .step_by(chunk)
        .map(|lpn| HostEvent::new(Operation::Write, lpn, chunk.min(lpn_limit - lpn)))
        .collect()
}

/// Single-page writes to uniformly random LPNs below `lpn_limit`.
pub fn random_writes(lpn_limit: Lpn, count: Counter, seed: u64) -> Vec<HostEvent> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| HostEvent::new(Operation::Write, rng.gen_range(0..lpn_limit), 1))
        .collect()
}
