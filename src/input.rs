//! Landmark frame streams (JSON lines from stdin, the perception socket or a
//! recording).

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::{
    collections::VecDeque,
    io::BufRead,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crate::landmarks::LandmarkFrame;

pub fn parse_frame(line: &str) -> Result<LandmarkFrame> {
    serde_json::from_str(line).context("malformed landmark frame")
}

/// Frames of a recording, in order. Malformed lines are logged and skipped.
pub fn frames<R: BufRead>(reader: R) -> impl Iterator<Item = LandmarkFrame> {
    reader
        .lines()
        .enumerate()
        .map_while(|(n, line)| match line {
            Ok(line) => Some((n, line)),
            Err(e) => {
                warn!("frame stream read failed at line {}: {e}", n + 1);
                None
            }
        })
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match parse_frame(&line) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("line {}: {e:#}", n + 1);
                None
            }
        })
}

pub enum Recv {
    Frame(LandmarkFrame),
    /// Nothing arrived within the timeout.
    Idle,
    /// The source is exhausted.
    Closed,
}

#[derive(Default)]
struct Backlog {
    frames: VecDeque<LandmarkFrame>,
    closed: bool,
}

struct Shared {
    backlog: Mutex<Backlog>,
    ready: Condvar,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumer end of a live stream read on a background thread.
pub struct FrameReceiver {
    shared: Arc<Shared>,
}

impl FrameReceiver {
    /// Waits up to `timeout` and returns the newest frame queued, discarding
    /// older ones.
    pub fn latest(&self, timeout: Duration) -> Recv {
        let guard = self.shared.lock();
        let (mut backlog, _) = self
            .shared
            .ready
            .wait_timeout_while(guard, timeout, |b| b.frames.is_empty() && !b.closed)
            .unwrap_or_else(PoisonError::into_inner);

        let Some(frame) = backlog.frames.pop_back() else {
            return if backlog.closed { Recv::Closed } else { Recv::Idle };
        };
        let skipped = backlog.frames.len();
        backlog.frames.clear();
        if skipped > 0 {
            debug!("caught up {skipped} frames, now at {}", frame.index);
        }
        Recv::Frame(frame)
    }

    /// Frames evicted from the queue before the consumer got to them.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Reads `reader` on its own thread. At most `capacity` frames are queued;
/// when the queue is full the oldest frame makes room for the new one.
pub fn spawn_reader<R>(reader: R, capacity: usize, name: &str) -> FrameReceiver
where
    R: BufRead + Send + 'static,
{
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        backlog: Mutex::new(Backlog::default()),
        ready: Condvar::new(),
        dropped: AtomicU64::new(0),
    });
    let producer = shared.clone();
    let source = name.to_string();

    thread::spawn(move || {
        for frame in frames(reader) {
            // receiver gone
            if Arc::strong_count(&producer) == 1 {
                break;
            }
            let mut backlog = producer.lock();
            if backlog.frames.len() >= capacity {
                if let Some(old) = backlog.frames.pop_front() {
                    producer.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("{source}: queue full, dropped frame {}", old.index);
                }
            }
            backlog.frames.push_back(frame);
            drop(backlog);
            producer.ready.notify_one();
        }
        producer.lock().closed = true;
        producer.ready.notify_one();
        info!("{source}: frame stream ended");
    });

    FrameReceiver { shared }
}
