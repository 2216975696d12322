//! # Streaming Simulation
//!
//! Drives a scheduler the way the engine loop does, without terrain or GPU:
//!
//! ```text
//! every tick:
//!   player moves → chunk distances change → edits dirty some chunks
//!   submit every dirty chunk in range (refusals retried next tick)
//!   drain() on this thread (the "render thread")
//! ```
//!
//! Usage: `stream_sim [scheduler.toml] [ticks]`
//!
//! Log level via `RUST_LOG` (default `info`).

use std::cmp::Reverse;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_scheduler::{Chunk, ChunkError, ChunkScheduler, SchedulerConfig, SchedulerError};

/// Half-width of the simulated chunk grid.
const GRID_RADIUS: i32 = 8;
/// Chunks farther than this (in chunks) are never submitted.
const LOAD_RADIUS: u32 = 6;
/// Simulated frame time.
const FRAME: Duration = Duration::from_millis(4);

/// A grid chunk whose "mesh" is a revision counter.
struct SimChunk {
    coord: (i32, i32),
    /// Squared distance to the player, in chunks.
    distance: AtomicU32,
    /// Bumped by edits.
    revision: AtomicU64,
    /// Revision the last `process()` meshed.
    meshed: AtomicU64,
    /// Revision visible on the GPU.
    uploaded: AtomicU64,
}

impl SimChunk {
    fn new(x: i32, z: i32) -> Self {
        Self {
            coord: (x, z),
            distance: AtomicU32::new(u32::MAX),
            revision: AtomicU64::new(1),
            meshed: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
        }
    }

    fn is_dirty(&self) -> bool {
        self.meshed.load(Ordering::Acquire) < self.revision.load(Ordering::Acquire)
    }

    fn is_stale_on_gpu(&self) -> bool {
        self.uploaded.load(Ordering::Acquire) < self.revision.load(Ordering::Acquire)
    }
}

impl Chunk for SimChunk {
    type Id = (i32, i32);
    // Nearest chunks are uploaded first.
    type Priority = Reverse<u32>;

    fn id(&self) -> (i32, i32) {
        self.coord
    }

    fn priority(&self) -> Reverse<u32> {
        Reverse(self.distance.load(Ordering::Relaxed))
    }

    fn process(&self) -> Result<bool, ChunkError> {
        let target = self.revision.load(Ordering::Acquire);
        if self.meshed.load(Ordering::Acquire) >= target {
            return Ok(false);
        }

        // Stand-in for meshing: cost grows with the coordinate hash.
        let (x, z) = self.coord;
        let rounds = 2_000 + (x.unsigned_abs() * 31 + z.unsigned_abs() * 17) % 4_000;
        let mut h = 0xcbf2_9ce4_8422_2325u64;
        for i in 0..rounds {
            h ^= u64::from(i);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        std::hint::black_box(h);

        self.meshed.store(target, Ordering::Release);
        Ok(true)
    }

    fn finalize(&self) -> Result<(), ChunkError> {
        self.uploaded
            .store(self.meshed.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }
}

fn load_config(path: Option<&String>) -> Result<SchedulerConfig, SchedulerError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| SchedulerError::InvalidConfig(format!("{path}: {e}")))?;
            SchedulerConfig::from_toml_str(&text)
        }
        None => Ok(SchedulerConfig::production()),
    }
}

fn main() -> Result<(), SchedulerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(args.first())?;
    let ticks: u32 = args.get(1).and_then(|t| t.parse().ok()).unwrap_or(240);

    let scheduler: ChunkScheduler<SimChunk> = ChunkScheduler::new(&config)?;

    let chunks: Vec<Arc<SimChunk>> = (-GRID_RADIUS..=GRID_RADIUS)
        .flat_map(|z| {
            (-GRID_RADIUS..=GRID_RADIUS).map(move |x| Arc::new(SimChunk::new(x, z)))
        })
        .collect();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║           STRATA STREAMING SIMULATION                            ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!(
        "║  Workers: {:<4} Chunks: {:<6} Ticks: {:<6}                       ║",
        scheduler.capacity(),
        chunks.len(),
        ticks
    );
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let start = Instant::now();
    let mut peak_pending = 0usize;
    let mut finalize_failures = 0usize;

    for tick in 0..ticks {
        // Player walks east, one chunk every 16 ticks, and wraps around.
        #[allow(clippy::cast_possible_wrap)]
        let player_x = ((tick / 16) as i32 % (2 * GRID_RADIUS)) - GRID_RADIUS;

        for chunk in &chunks {
            let (x, z) = chunk.coord;
            let dx = (x - player_x).unsigned_abs();
            let dz = z.unsigned_abs();
            chunk.distance.store(dx * dx + dz * dz, Ordering::Relaxed);

            // Deterministic scattered block edits.
            #[allow(clippy::cast_sign_loss)]
            let salt = (x * 7 + z * 13).rem_euclid(29) as u32;
            if (tick + salt) % 29 == 0 {
                chunk.revision.fetch_add(1, Ordering::AcqRel);
            }
        }

        for chunk in &chunks {
            let in_range = chunk.distance.load(Ordering::Relaxed) <= LOAD_RADIUS * LOAD_RADIUS;
            if chunk.is_dirty() && in_range {
                // Refused updates are retried next tick.
                scheduler.submit(Arc::clone(chunk));
            }
        }

        peak_pending = peak_pending.max(scheduler.pending_finalization_count());
        finalize_failures += scheduler.drain()?.failures.len();

        if tick % 60 == 0 {
            tracing::info!(
                tick,
                in_flight = scheduler.in_flight_count(),
                pending = scheduler.pending_finalization_count(),
                average_ms = scheduler.average_processing_ms(),
                "tick"
            );
        }

        std::thread::sleep(FRAME);
    }

    scheduler.wait_idle(Duration::from_secs(5));
    finalize_failures += scheduler.drain()?.failures.len();
    scheduler.shutdown();

    let elapsed = start.elapsed();
    let stats = scheduler.stats();
    let stale = chunks.iter().filter(|c| c.is_stale_on_gpu()).count();

    println!();
    println!("=== Simulation Results ===");
    println!("Wall time: {elapsed:?}");
    println!("Submitted: {}", stats.submitted);
    println!("Accepted: {} ({:.1}%)", stats.accepted, stats.acceptance_rate() * 100.0);
    println!("Refused (in flight): {}", stats.rejected_in_flight);
    println!("Refused (saturated): {}", stats.rejected_saturated);
    println!("Processed: {} (changed: {})", stats.processed, stats.changed);
    println!("Finalized: {} (failures: {finalize_failures})", stats.finalized);
    println!("Peak pending finalization: {peak_pending}");
    println!("Average process time: {:.3} ms", scheduler.average_processing_ms());
    println!("Chunks stale on GPU (incl. out of range): {stale}");

    Ok(())
}
