//! Outbound correlation: tag → pending send.
//!
//! A write completion only carries its tag. The table keeps what is needed
//! to tell the delegate which packet went to which client.

use std::collections::HashMap;
use std::fmt;

use super::connection::ConnectionId;

/// Correlation tag of an in-flight write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u32);

impl Tag {
    /// Raw tag value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An issued write awaiting completion.
#[derive(Debug, Clone)]
pub(crate) struct PendingSend<T> {
    pub(crate) connection: ConnectionId,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) packet: T,
}

/// Pending sends keyed by tag, plus the tag counter.
#[derive(Debug)]
pub(crate) struct PendingSends<T> {
    entries: HashMap<Tag, PendingSend<T>>,
    next: u32,
}

impl<T> Default for PendingSends<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next: 0,
        }
    }
}

impl<T> PendingSends<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a send under a fresh tag.
    ///
    /// The counter advances once per call and wraps to zero after
    /// `u32::MAX`. A tag still pending after a full wrap is skipped.
    pub(crate) fn record(&mut self, send: PendingSend<T>) -> Tag {
        let mut tag = self.allocate();
        while self.entries.contains_key(&tag) {
            tracing::warn!(tag = %tag, "tag still pending after wraparound, skipping");
            tag = self.allocate();
        }
        self.entries.insert(tag, send);
        tag
    }

    /// Remove and return the send recorded under `tag`.
    pub(crate) fn resolve(&mut self, tag: Tag) -> Option<PendingSend<T>> {
        self.entries.remove(&tag)
    }

    /// Drop every send addressed to `connection`. Returns how many were dropped.
    pub(crate) fn discard_connection(&mut self, connection: ConnectionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, send| send.connection != connection);
        before - self.entries.len()
    }

    /// Restart tags at zero, keeping whatever is still pending.
    pub(crate) fn restart_tags(&mut self) {
        self.next = 0;
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// The tag the next send will use.
    pub(crate) fn next_tag(&self) -> Tag {
        Tag(self.next)
    }

    fn allocate(&mut self) -> Tag {
        let tag = Tag(self.next);
        self.next = self.next.wrapping_add(1);
        tag
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u32) -> Self {
        Self {
            entries: HashMap::new(),
            next,
        }
    }
}
