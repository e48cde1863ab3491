//! Immutable ring snapshots.
//!
//! A [`RingSnapshot`] is one complete view of the partition map: every
//! distinct token range with its ordered replica list and round-robin cursor,
//! plus the arena of hosts those replica lists point into. Snapshots are never
//! edited; a refresh builds a new one with [`RingBuilder`] and swaps it in.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::error::{Error, Result, RoutingError};
use crate::network::TokenRangeDescription;
use crate::node::{Host, HostId};
use crate::ring::range::TokenRange;

/// Index of a range inside one ring snapshot.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RangeId(pub usize);

#[derive(Debug)]
struct RangeEntry {
    range: TokenRange,
    replicas: Vec<HostId>,
    /// Next replica position, always in `[0, replicas.len())`.
    cursor: AtomicUsize,
}

/// Borrowed view of one range of a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeView<'a> {
    pub id: RangeId,
    pub range: TokenRange,
    pub replicas: Vec<&'a Host>,
}

/// One complete, immutable partition map.
///
/// # Invariants
///
/// - `entries` is sorted by `(left, right)` and bounds are unique
/// - every entry has at least one replica
/// - every `HostId` in an entry indexes into `hosts`
#[derive(Debug, Default)]
pub struct RingSnapshot {
    hosts: Vec<Host>,
    entries: Vec<RangeEntry>,
}

impl RingSnapshot {
    /// A snapshot with no ranges; every lookup fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from the store's ring description.
    ///
    /// Fails with a protocol error if any token is not a decimal `i64`.
    pub fn from_descriptions(descriptions: &[TokenRangeDescription]) -> Result<Self> {
        let mut builder = RingBuilder::new();
        for desc in descriptions {
            let range = TokenRange::new(
                parse_token(&desc.start_token)?,
                parse_token(&desc.end_token)?,
            );
            builder = builder.add_range(range, desc.endpoints.iter().map(String::as_str));
        }
        Ok(builder.build())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn range_count(&self) -> usize {
        self.entries.len()
    }

    /// Every host that serves at least one range.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(id.0 as usize)
    }

    pub fn contains_host(&self, host: &Host) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// Finds the range covering `token`.
    ///
    /// # Algorithm
    ///
    /// Binary search for the last range whose left bound is below `token`.
    /// On a ring without gaps that range covers the token, unless the token
    /// belongs to the wrapping range, which is the one with the greatest
    /// left bound. So at most two ranges are tested.
    pub fn find_range(&self, token: i64) -> Option<RangeId> {
        let last = self.entries.len().checked_sub(1)?;
        let idx = self.entries.partition_point(|e| e.range.left < token);
        let candidate = idx.checked_sub(1).unwrap_or(last);
        if self.entries[candidate].range.contains(token) {
            return Some(RangeId(candidate));
        }
        (candidate != last && self.entries[last].range.contains(token)).then_some(RangeId(last))
    }

    pub fn range(&self, id: RangeId) -> Option<TokenRange> {
        self.entries.get(id.0).map(|e| e.range)
    }

    /// Replicas of a range in preference order.
    pub fn replicas(&self, id: RangeId) -> impl Iterator<Item = &Host> + '_ {
        self.entries
            .get(id.0)
            .into_iter()
            .flat_map(|e| e.replicas.iter())
            .filter_map(move |h| self.host(*h))
    }

    /// Picks the next replica of a range, round robin.
    ///
    /// The cursor is advanced with a CAS loop and always wraps at the replica
    /// count. Under contention two callers may read the same position, so the
    /// rotation is only approximately fair.
    pub fn next_replica(&self, id: RangeId) -> Option<&Host> {
        let entry = self.entries.get(id.0)?;
        let n = entry.replicas.len();
        let pos = entry
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| Some((old + 1) % n))
            .unwrap_or_else(|old| old);
        self.host(entry.replicas[pos])
    }

    /// Maps a token to the replica that should serve it next.
    pub fn locate(&self, token: i64) -> std::result::Result<&Host, RoutingError> {
        if self.is_empty() {
            return Err(RoutingError::EmptyRing);
        }
        self.find_range(token)
            .and_then(|id| self.next_replica(id))
            .ok_or(RoutingError::NoRange { token })
    }

    /// Iterates ranges in token order.
    pub fn ranges(&self) -> impl Iterator<Item = RangeView<'_>> + '_ {
        self.entries.iter().enumerate().map(move |(i, e)| RangeView {
            id: RangeId(i),
            range: e.range,
            replicas: e.replicas.iter().filter_map(|h| self.host(*h)).collect(),
        })
    }

    /// True if the ranges leave no gap on the ring.
    ///
    /// Any gap would start right after some range's right bound, so it is
    /// enough to check the token following each right bound.
    pub fn covers_ring(&self) -> bool {
        !self.is_empty()
            && self
                .entries
                .iter()
                .all(|e| self.find_range(e.range.right.wrapping_add(1)).is_some())
    }
}

fn parse_token(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| Error::protocol(format!("invalid token {raw:?}: {e}")))
}

/// Builder for [`RingSnapshot`].
///
/// Ranges with identical bounds are merged: their replica lists are
/// concatenated in arrival order without duplicates.
#[derive(Debug, Default)]
pub struct RingBuilder {
    hosts: Vec<Host>,
    host_ids: HashMap<Host, HostId>,
    ranges: BTreeMap<TokenRange, Vec<HostId>>,
}

impl RingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_range<I, H>(mut self, range: TokenRange, replicas: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<Host>,
    {
        let ids: Vec<HostId> = replicas
            .into_iter()
            .map(|h| self.intern(h.into()))
            .collect();
        let entry = self.ranges.entry(range).or_default();
        for id in ids {
            if !entry.contains(&id) {
                entry.push(id);
            }
        }
        self
    }

    fn intern(&mut self, host: Host) -> HostId {
        if let Some(id) = self.host_ids.get(&host) {
            return *id;
        }
        let id = HostId(self.hosts.len() as u32);
        self.hosts.push(host.clone());
        self.host_ids.insert(host, id);
        id
    }

    pub fn build(self) -> RingSnapshot {
        let entries = self
            .ranges
            .into_iter()
            .filter_map(|(range, replicas)| {
                if replicas.is_empty() {
                    warn!(%range, "skipping range without replicas");
                    return None;
                }
                Some(RangeEntry {
                    range,
                    replicas,
                    cursor: AtomicUsize::new(0),
                })
            })
            .collect();
        RingSnapshot {
            hosts: self.hosts,
            entries,
        }
    }
}
