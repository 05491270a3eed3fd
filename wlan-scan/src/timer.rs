// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scheduled-timeout plumbing. The engine pushes `(delay, event)` entries
//! onto an unbounded stream; the embedder turns each entry into a wakeup and
//! feeds the event back through [`crate::ScanEngine::handle_timeout`] once
//! the delay elapses. Tests pull entries off the stream directly, which
//! makes timer-driven behavior fully deterministic.

use futures::channel::mpsc;
use std::time::{Duration, Instant};

pub type EventId = u64;

pub type TimeEntry<E> = (Duration, TimedEvent<E>);
pub type TimeStream<E> = mpsc::UnboundedReceiver<TimeEntry<E>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedEvent<E> {
    pub id: EventId,
    pub event: E,
}

/// Source of the monotonic microsecond timestamps stamped onto scan results.
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// Microseconds since construction.
pub struct MonotonicClock(Instant);

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock(Instant::now())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.0.elapsed().as_micros() as u64
    }
}

pub struct Timer<E> {
    sender: mpsc::UnboundedSender<TimeEntry<E>>,
    next_id: EventId,
    clock: Box<dyn Clock>,
}

impl<E> Timer<E> {
    pub fn new(clock: Box<dyn Clock>) -> (Self, TimeStream<E>) {
        let (sender, stream) = mpsc::unbounded();
        (Timer { sender, next_id: 0, clock }, stream)
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    /// Schedules `event` to be delivered after `delay`. The returned id lets
    /// the scheduler distinguish a live timeout from a stale one.
    pub fn schedule_after(&mut self, delay: Duration, event: E) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        // A dropped receiver just means the embedder shut the loop down.
        let _ = self.sender.unbounded_send((delay, TimedEvent { id, event }));
        id
    }
}
