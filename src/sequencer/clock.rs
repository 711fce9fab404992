/// Transport clocks - the time source and repeating tick driver
///
/// Clocks never call into the sequencer. They queue [`Tick`]s that the owner
/// drains with [`Clock::poll_ticks`], so every tick runs on the owner's
/// thread, one at a time.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub handle: ClockHandle,
    /// Transport time the tick was due at, in seconds.
    pub time: f64,
}

pub trait Clock {
    /// Monotonic transport time in seconds since the clock was created.
    fn now(&self) -> f64;

    /// Starts a repeating tick every `interval` seconds. The first tick is due
    /// immediately.
    fn schedule_repeating(&mut self, interval: f64) -> ClockHandle;

    /// Stops a repeating tick. Ticks already queued for it may still be
    /// returned by `poll_ticks`; owners must ignore handles they cancelled.
    fn cancel(&mut self, handle: ClockHandle);

    /// Drains the ticks that came due since the last poll, oldest first.
    fn poll_ticks(&mut self) -> Vec<Tick>;
}

/// Wall-clock ticks from background timing threads.
pub struct ThreadClock {
    origin: Instant,
    sender: Sender<Tick>,
    receiver: Receiver<Tick>,
    timers: HashMap<ClockHandle, Arc<AtomicBool>>,
    next_handle: u64,
}

impl ThreadClock {
    pub fn new() -> Self {
        let (sender, receiver) = channel();

        Self {
            origin: Instant::now(),
            sender,
            receiver,
            timers: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Blocks until at least one tick is queued or `timeout` passes.
    pub fn wait_ticks(&mut self, timeout: Duration) -> Vec<Tick> {
        let mut ticks = Vec::new();
        if let Ok(tick) = self.receiver.recv_timeout(timeout) {
            ticks.push(tick);
        }
        ticks.extend(self.poll_ticks());
        ticks
    }
}

impl Default for ThreadClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ThreadClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule_repeating(&mut self, interval: f64) -> ClockHandle {
        let handle = ClockHandle(self.next_handle);
        self.next_handle += 1;

        let running = Arc::new(AtomicBool::new(true));
        self.timers.insert(handle, Arc::clone(&running));

        let sender = self.sender.clone();
        let origin = self.origin;
        let interval = interval.max(0.001);
        thread::spawn(move || {
            let mut next_due = origin.elapsed().as_secs_f64();

            while running.load(Ordering::Acquire) {
                let now = origin.elapsed().as_secs_f64();

                if now >= next_due {
                    if sender.send(Tick { handle, time: next_due }).is_err() {
                        break;
                    }
                    next_due += interval;
                }

                thread::sleep(Duration::from_millis(1));
            }
            debug!(?handle, "clock timer stopped");
        });
        handle
    }

    fn cancel(&mut self, handle: ClockHandle) {
        if let Some(running) = self.timers.remove(&handle) {
            running.store(false, Ordering::Release);
        }
    }

    fn poll_ticks(&mut self) -> Vec<Tick> {
        let mut ticks = Vec::new();
        while let Ok(tick) = self.receiver.try_recv() {
            ticks.push(tick);
        }
        ticks
    }
}

impl Drop for ThreadClock {
    fn drop(&mut self) {
        for running in self.timers.values() {
            running.store(false, Ordering::Release);
        }
    }
}

struct ManualTimer {
    handle: ClockHandle,
    interval: f64,
    next_due: f64,
}

/// Clock that only moves when told to. Used for tests and offline renders.
#[derive(Default)]
pub struct ManualClock {
    now: f64,
    timers: Vec<ManualTimer>,
    pending: Vec<Tick>,
    next_handle: u64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose transport already reads `now`.
    pub fn starting_at(now: f64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    /// Moves time forward and queues every tick that came due.
    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds.max(0.0);
        // small tolerance so accumulated float error never drops a tick
        let horizon = self.now + 1e-9;
        for timer in &mut self.timers {
            while timer.next_due <= horizon {
                self.pending.push(Tick {
                    handle: timer.handle,
                    time: timer.next_due,
                });
                timer.next_due += timer.interval;
            }
        }
        self.pending
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now
    }

    fn schedule_repeating(&mut self, interval: f64) -> ClockHandle {
        self.next_handle += 1;
        let handle = ClockHandle(self.next_handle);
        let interval = interval.max(1e-6);
        self.pending.push(Tick {
            handle,
            time: self.now,
        });
        self.timers.push(ManualTimer {
            handle,
            interval,
            next_due: self.now + interval,
        });
        handle
    }

    fn cancel(&mut self, handle: ClockHandle) {
        self.timers.retain(|t| t.handle != handle);
        self.pending.retain(|t| t.handle != handle);
    }

    fn poll_ticks(&mut self) -> Vec<Tick> {
        std::mem::take(&mut self.pending)
    }
}
