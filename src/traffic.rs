//! Per-station data-frame volume accounting.
//!
//! A bounded table keyed by transmitter address, owned by the capture loop.
//! Each entry accumulates frame and byte counts from the moment it is opened
//! until `flush_after` of capture time has passed; it is then turned into a
//! [`OutboundEvent::Data`] and removed.  Time comes from capture timestamps;
//! while no data frames arrive the capture loop sweeps with the wall clock
//! (pcap timestamps are wall-clock time as well).

use std::collections::HashMap;
use std::time::Duration;

use crate::mac::MacAddr;
use crate::telemetry::OutboundEvent;

/// Expired entries are looked for at most this often (capture time).
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Tally {
    opened: Duration,
    frames: u64,
    bytes: u64,
}

#[derive(Debug)]
pub struct TrafficTally {
    entries: HashMap<MacAddr, Tally>,
    capacity: usize,
    flush_after: Duration,
    last_sweep: Duration,
}

impl TrafficTally {
    pub fn new(capacity: usize, flush_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            flush_after,
            last_sweep: Duration::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count one data frame.  Returns the events for any entries that were
    /// flushed along the way (expired, or evicted to make room).
    pub fn record(&mut self, mac: MacAddr, bytes: usize, now: Duration) -> Vec<OutboundEvent> {
        let mut flushed = Vec::new();

        if now.saturating_sub(self.last_sweep) >= SWEEP_INTERVAL {
            self.last_sweep = now;
            flushed.extend(self.take_expired(now));
        }

        if !self.entries.contains_key(&mac) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self.oldest() {
                if let Some(tally) = self.entries.remove(&oldest) {
                    flushed.push(to_event(oldest, tally));
                }
            }
        }

        let tally = self.entries.entry(mac).or_insert(Tally {
            opened: now,
            frames: 0,
            bytes: 0,
        });
        tally.frames += 1;
        tally.bytes += bytes as u64;

        flushed
    }

    /// Flush entries whose window has passed at `now`, oldest first.
    pub fn flush_expired(&mut self, now: Duration) -> Vec<OutboundEvent> {
        self.last_sweep = now;
        self.take_expired(now)
    }

    /// Flush everything, oldest first.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        let mut all: Vec<(MacAddr, Tally)> = self.entries.drain().collect();
        all.sort_by_key(|(mac, t)| (t.opened, *mac));
        all.into_iter().map(|(mac, t)| to_event(mac, t)).collect()
    }

    fn take_expired(&mut self, now: Duration) -> Vec<OutboundEvent> {
        let flush_after = self.flush_after;
        let mut expired: Vec<(MacAddr, Tally)> = self
            .entries
            .iter()
            .filter(|(_, t)| now.saturating_sub(t.opened) >= flush_after)
            .map(|(mac, t)| (*mac, *t))
            .collect();
        for (mac, _) in &expired {
            self.entries.remove(mac);
        }
        expired.sort_by_key(|(mac, t)| (t.opened, *mac));
        expired.into_iter().map(|(mac, t)| to_event(mac, t)).collect()
    }

    fn oldest(&self) -> Option<MacAddr> {
        self.entries
            .iter()
            .min_by_key(|(mac, t)| (t.opened, **mac))
            .map(|(mac, _)| *mac)
    }
}

fn to_event(mac: MacAddr, tally: Tally) -> OutboundEvent {
    OutboundEvent::Data {
        mac,
        frame_count: tally.frames,
        byte_count: tally.bytes,
    }
}
