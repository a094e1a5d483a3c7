//! Shard catalog: classification and ordering of a stream's shards.
//!
//! A stream's listing contains every shard it has ever had. A shard is
//! *open* iff no other listed shard names it as `parent_shard_id` or
//! `adjacent_parent_shard_id` - once children appear, the parent is closed
//! and can no longer be written to or mutated.
//!
//! [`OpenShardSet`] is a free-standing ordered value rebuilt from a listing
//! whenever a mutation completes. Construction validates the catalog
//! invariants (ascending, disjoint, abutting ranges) instead of trusting
//! the caller, and [`AdjacentPair`] re-checks adjacency at the moment a
//! merge is planned.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::{Result, ScalingError};
use crate::hash::{self, MAX_HASH};

/// Identifier of a shard, as issued by the stream service.
pub type ShardId = String;

/// One shard as returned by the control plane listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub shard_id: ShardId,
    pub start_hash: u128,
    pub end_hash: u128,
    /// Parent this shard was split or merged from, if any.
    pub parent_shard_id: Option<ShardId>,
    /// Second parent when this shard is the product of a merge.
    pub adjacent_parent_shard_id: Option<ShardId>,
}

/// A shard enriched with its keyspace geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardInfo {
    shard: Shard,
    pct_width: f64,
}

impl ShardInfo {
    pub fn new(shard: Shard) -> Result<ShardInfo> {
        if shard.start_hash > shard.end_hash {
            return Err(ScalingError::InvalidArgument(format!(
                "shard {} has start hash above its end hash",
                shard.shard_id
            )));
        }
        let pct_width = hash::pct_of_keyspace(shard.start_hash, shard.end_hash);
        Ok(ShardInfo { shard, pct_width })
    }

    pub fn shard_id(&self) -> &str {
        &self.shard.shard_id
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    pub fn start_hash(&self) -> u128 {
        self.shard.start_hash
    }

    pub fn end_hash(&self) -> u128 {
        self.shard.end_hash
    }

    /// Width of the hash range, exclusive of the final unit. The inclusive
    /// `+1` is carried in [`pct_width`](Self::pct_width), where it cannot
    /// overflow.
    pub fn width(&self) -> u128 {
        self.shard.end_hash - self.shard.start_hash
    }

    /// This shard's share of the keyspace, in `[0, 1]`.
    pub fn pct_width(&self) -> f64 {
        self.pct_width
    }

    /// The hash at `pct` of the keyspace beyond this shard's start. A split
    /// here leaves the lower child holding `pct` of the keyspace.
    pub fn hash_at_pct_offset(&self, pct: f64) -> u128 {
        hash::hash_at_pct_offset(self.shard.start_hash, pct)
    }

    pub fn is_first_shard(&self) -> bool {
        self.shard.start_hash == 0
    }

    pub fn is_last_shard(&self) -> bool {
        self.shard.end_hash == MAX_HASH
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Shard {} - Start: {}, End: {}, Keyspace Width: {} ({:.1}%)",
            self.shard.shard_id,
            self.shard.start_hash,
            self.shard.end_hash,
            self.width(),
            self.pct_width * 100.0
        )
    }
}

/// Two open shards whose ranges abut by exactly one hash unit, in merge
/// order. Constructed while planning a merge; construction fails if the
/// shards do not actually abut.
#[derive(Debug, Clone)]
pub struct AdjacentPair {
    lower: ShardInfo,
    higher: ShardInfo,
}

impl AdjacentPair {
    pub fn new(lower: ShardInfo, higher: ShardInfo) -> Result<AdjacentPair> {
        let abutting = lower.end_hash() != MAX_HASH && higher.start_hash() == lower.end_hash() + 1;
        if !abutting {
            return Err(ScalingError::InvalidArgument(format!(
                "shards {} and {} are not adjacent",
                lower.shard_id(),
                higher.shard_id()
            )));
        }
        Ok(AdjacentPair { lower, higher })
    }

    pub fn lower(&self) -> &ShardInfo {
        &self.lower
    }

    pub fn higher(&self) -> &ShardInfo {
        &self.higher
    }

    /// The keyspace share a merge of this pair would produce.
    pub fn combined_pct_width(&self) -> f64 {
        hash::pct_of_keyspace(self.lower.start_hash(), self.higher.end_hash())
    }
}

/// The ordered set of a stream's open shards, ascending by start hash.
///
/// Built from a raw listing with [`from_listing`](Self::from_listing), or
/// incrementally with [`insert`](Self::insert), which rejects entries that
/// would break the ordering invariant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenShardSet {
    shards: Vec<ShardInfo>,
}

impl OpenShardSet {
    pub fn new() -> OpenShardSet {
        OpenShardSet::default()
    }

    /// Derive the open set from a full listing: prune every shard another
    /// shard names as a parent, then order the remainder by start hash.
    pub fn from_listing(listing: &[Shard]) -> Result<OpenShardSet> {
        let mut open: BTreeMap<&str, &Shard> =
            listing.iter().map(|s| (s.shard_id.as_str(), s)).collect();

        for shard in listing {
            if let Some(parent) = &shard.parent_shard_id {
                open.remove(parent.as_str());
            }
            if let Some(adjacent) = &shard.adjacent_parent_shard_id {
                open.remove(adjacent.as_str());
            }
        }

        let mut shards = open
            .into_values()
            .cloned()
            .map(ShardInfo::new)
            .collect::<Result<Vec<_>>>()?;
        shards.sort_by(|a, b| a.start_hash().cmp(&b.start_hash()));

        Ok(OpenShardSet { shards })
    }

    /// Insert a shard, keeping the set ordered. Rejects shards that overlap
    /// an existing range.
    pub fn insert(&mut self, info: ShardInfo) -> Result<()> {
        let at = self
            .shards
            .partition_point(|s| s.start_hash() < info.start_hash());

        if let Some(prev) = at.checked_sub(1).and_then(|i| self.shards.get(i)) {
            if prev.end_hash() >= info.start_hash() {
                return Err(ScalingError::InvalidArgument(format!(
                    "shard {} overlaps {}",
                    info.shard_id(),
                    prev.shard_id()
                )));
            }
        }
        if let Some(next) = self.shards.get(at) {
            if info.end_hash() >= next.start_hash() {
                return Err(ScalingError::InvalidArgument(format!(
                    "shard {} overlaps {}",
                    info.shard_id(),
                    next.shard_id()
                )));
            }
        }

        self.shards.insert(at, info);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Ascending by start hash.
    pub fn iter(&self) -> impl Iterator<Item = &ShardInfo> {
        self.shards.iter()
    }

    /// Descending by start hash. Pushing these onto a stack makes pops
    /// deliver shards in ascending order - the engine's left-leaning bias.
    pub fn iter_descending(&self) -> impl Iterator<Item = &ShardInfo> {
        self.shards.iter().rev()
    }

    pub fn get(&self, shard_id: &str) -> Option<&ShardInfo> {
        self.shards.iter().find(|s| s.shard_id() == shard_id)
    }

    /// The lexically highest shard id in the set. Shard ids issued by the
    /// service sort in creation order, so this bounds post-mutation
    /// re-listings to only the shards created since.
    pub fn highest_shard_id(&self) -> Option<&str> {
        self.shards.iter().map(|s| s.shard_id()).max()
    }

    /// Whether the open ranges tile the entire keyspace with no gap or
    /// overlap. Holds at every stable point of a well-formed stream.
    pub fn covers_keyspace(&self) -> bool {
        if self.shards.is_empty() {
            return false;
        }
        if self.shards[0].start_hash() != 0 {
            return false;
        }
        for pair in self.shards.windows(2) {
            if pair[0].end_hash() == MAX_HASH
                || pair[1].start_hash() != pair[0].end_hash() + 1
            {
                return false;
            }
        }
        self.shards[self.shards.len() - 1].end_hash() == MAX_HASH
    }
}

impl Serialize for OpenShardSet {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Hash keys serialize as decimal strings, matching the wire form
        // used by the stream service.
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Entry<'a> {
            shard_id: &'a str,
            start_hash: String,
            end_hash: String,
            pct_width: f64,
        }

        serializer.collect_seq(self.shards.iter().map(|s| Entry {
            shard_id: s.shard_id(),
            start_hash: s.start_hash().to_string(),
            end_hash: s.end_hash().to_string(),
            pct_width: s.pct_width(),
        }))
    }
}

impl IntoIterator for OpenShardSet {
    type Item = ShardInfo;
    type IntoIter = std::vec::IntoIter<ShardInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.shards.into_iter()
    }
}
