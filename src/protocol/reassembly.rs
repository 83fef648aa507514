// src/protocol/reassembly.rs
//
// Multi-frame reassembly for POECanable.
//
// A message longer than one CAN frame arrives as fragments with
// isFullPacket = 0 followed by a final fragment with isFullPacket = 1. The
// buffer for a key is created by the first fragment, appended in arrival
// order, and removed when the final fragment completes it or when it is
// evicted. Partial data never leaves this module.
//
// Lock order: the map lock is taken first and held only to look up, insert
// or remove an entry; appends hold only the entry lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::FullId;
use crate::logging::LogLevel;
use crate::tlog;

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_MAX_PARTIAL_BYTES: usize = 1024;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Groups fragments of one logical message: the routing fields of the
/// identifier with the fragment flag cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub main_id: u32,
    pub routing: FullId,
}

impl ReassemblyKey {
    pub fn new(full_id: FullId, main_id: u32) -> Self {
        ReassemblyKey {
            main_id,
            routing: full_id.with_full_packet(false),
        }
    }
}

/// Bounds on reassembly state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassemblyLimits {
    /// Age (from the first fragment) after which a partial is discarded.
    pub timeout_ms: u64,
    /// A partial larger than this is discarded.
    pub max_partial_bytes: usize,
    /// Concurrent partials; the oldest is evicted to make room.
    pub max_in_flight: usize,
}

impl Default for ReassemblyLimits {
    fn default() -> Self {
        ReassemblyLimits {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_partial_bytes: DEFAULT_MAX_PARTIAL_BYTES,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug)]
struct PartialPacket {
    /// Arrival time of the first fragment.
    started_ms: u64,
    data: Vec<u8>,
    /// Set once the entry has been completed or dropped; a thread that
    /// finds a closed entry must look the key up again.
    closed: bool,
}

/// Outcome of feeding one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered; more fragments expected.
    Pending,
    /// Final fragment arrived. `started_ms` is the first fragment's time.
    Complete { data: Vec<u8>, started_ms: u64 },
    /// The partial outgrew `max_partial_bytes` and was discarded.
    Dropped { size: usize },
}

pub struct Reassembler {
    limits: ReassemblyLimits,
    entries: Mutex<HashMap<ReassemblyKey, Arc<Mutex<PartialPacket>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Reassembler
// ============================================================================

impl Reassembler {
    pub fn new(limits: ReassemblyLimits) -> Self {
        Reassembler {
            limits,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> ReassemblyLimits {
        self.limits
    }

    /// Number of partial messages currently buffered.
    pub fn in_flight(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Feed one fragment in arrival order.
    pub fn push(&self, key: ReassemblyKey, fragment: &[u8], is_final: bool, now_ms: u64) -> PushOutcome {
        loop {
            let entry = {
                let mut map = lock(&self.entries);
                let existing = map.get(&key).cloned();
                match existing {
                    Some(entry) => entry,
                    None if is_final => {
                        // Self-contained message, never buffered
                        drop(map);
                        if fragment.len() > self.limits.max_partial_bytes {
                            return self.dropped(&key, fragment.len());
                        }
                        return PushOutcome::Complete {
                            data: fragment.to_vec(),
                            started_ms: now_ms,
                        };
                    }
                    None => {
                        if map.len() >= self.limits.max_in_flight {
                            evict_oldest(&mut map);
                        }
                        let entry = Arc::new(Mutex::new(PartialPacket {
                            started_ms: now_ms,
                            data: Vec::new(),
                            closed: false,
                        }));
                        map.insert(key, entry.clone());
                        entry
                    }
                }
            };

            let mut packet = lock(&entry);
            if packet.closed {
                continue;
            }

            packet.data.extend_from_slice(fragment);

            if packet.data.len() > self.limits.max_partial_bytes {
                packet.closed = true;
                let size = packet.data.len();
                drop(packet);
                self.remove_entry(&key, &entry);
                return self.dropped(&key, size);
            }

            if is_final {
                packet.closed = true;
                let data = std::mem::take(&mut packet.data);
                let started_ms = packet.started_ms;
                drop(packet);
                self.remove_entry(&key, &entry);
                return PushOutcome::Complete { data, started_ms };
            }

            return PushOutcome::Pending;
        }
    }

    /// Discard partials whose first fragment is older than the timeout.
    /// Returns how many were discarded.
    pub fn evict_expired(&self, now_ms: u64) -> usize {
        let mut map = lock(&self.entries);
        let timeout = self.limits.timeout_ms;
        let before = map.len();
        map.retain(|key, entry| {
            let mut packet = lock(entry);
            let expired = now_ms.saturating_sub(packet.started_ms) > timeout;
            if expired {
                packet.closed = true;
                tlog!(
                    LogLevel::Info,
                    "[reassembly] discarding stale partial main_id={} ({} bytes)",
                    key.main_id,
                    packet.data.len()
                );
            }
            !expired
        });
        before - map.len()
    }

    /// Discard the partial for one key, if any.
    pub fn discard(&self, key: &ReassemblyKey) -> bool {
        match lock(&self.entries).remove(key) {
            Some(entry) => {
                lock(&entry).closed = true;
                true
            }
            None => false,
        }
    }

    /// Abandon every partial (connection teardown).
    pub fn discard_all(&self) -> usize {
        let mut map = lock(&self.entries);
        for entry in map.values() {
            lock(entry).closed = true;
        }
        let n = map.len();
        map.clear();
        n
    }

    fn remove_entry(&self, key: &ReassemblyKey, entry: &Arc<Mutex<PartialPacket>>) {
        let mut map = lock(&self.entries);
        if map.get(key).map_or(false, |current| Arc::ptr_eq(current, entry)) {
            map.remove(key);
        }
    }

    fn dropped(&self, key: &ReassemblyKey, size: usize) -> PushOutcome {
        tlog!(
            LogLevel::Warning,
            "[reassembly] message main_id={} exceeded {} bytes ({}), dropped",
            key.main_id,
            self.limits.max_partial_bytes,
            size
        );
        PushOutcome::Dropped { size }
    }
}

fn evict_oldest(map: &mut HashMap<ReassemblyKey, Arc<Mutex<PartialPacket>>>) {
    let oldest = map
        .iter()
        .map(|(key, entry)| (*key, lock(entry).started_ms))
        .min_by_key(|(_, started)| *started)
        .map(|(key, _)| key);
    if let Some(key) = oldest {
        if let Some(entry) = map.remove(&key) {
            lock(&entry).closed = true;
        }
        tlog!(
            LogLevel::Warning,
            "[reassembly] too many partial messages, evicted main_id={}",
            key.main_id
        );
    }
}
