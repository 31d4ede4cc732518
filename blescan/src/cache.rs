use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use log::trace;

use crate::DeviceAddress;

/// Addresses already reported during the current scan session.
///
/// Each (re)start of scanning begins a new session: the set is cleared
/// synchronously and the session number moves on. Stopping a scan doesn't
/// clear anything.
///
/// Every entry is tagged with the session that inserted it and only
/// entries from the current session count as seen. Results from a replaced
/// session can still be in flight on the client context when the next
/// session starts, and tagging keeps them from leaking into it.
///
/// Note: sessions start on whichever thread asks to start scanning while
/// inserts happen on the client-context task, hence the concurrent map.
#[derive(Debug, Default)]
pub struct DeviceSeenCache {
    seen: DashMap<DeviceAddress, u32>,
    session: AtomicU32,
}

impl DeviceSeenCache {
    pub fn new() -> Self {
        Self { seen: DashMap::new(), session: AtomicU32::new(0) }
    }

    /// Forgets every device and returns the number of the new session
    pub fn start_session(&self) -> u32 {
        let session = self.session.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        trace!("Starting scan session {}, forgetting {} devices", session, self.seen.len());
        self.seen.clear();
        session
    }

    pub fn session(&self) -> u32 {
        self.session.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, session: u32) -> bool {
        self.session() == session
    }

    /// Returns `true` if the address wasn't already seen during `session`
    pub fn insert(&self, address: DeviceAddress, session: u32) -> bool {
        match self.seen.insert(address, session) {
            Some(previous) => previous != session,
            None => true,
        }
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        let session = self.session();
        self.seen.get(address).map(|entry| *entry == session).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        let session = self.session();
        self.seen.iter().filter(|entry| *entry.value() == session).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
