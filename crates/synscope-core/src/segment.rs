//! Per-segment summary used by the segment panel and `GET /api/segments/{id}`

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::Result;
use crate::index::GraphIndex;
use crate::model::{Label, Role, SegmentId, SynapseId};

/// Connectivity of one segment, with partners and synapses grouped by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentView {
    pub id: SegmentId,
    pub label: Label,
    /// `Pre` when the segment sends at least as many synapses as it receives.
    pub direction: Role,
    pub pre_synapses: BTreeSet<SynapseId>,
    pub post_synapses: BTreeSet<SynapseId>,
    /// Segments this one receives from.
    pub presynaptic_partners: BTreeSet<SegmentId>,
    /// Segments this one sends to.
    pub postsynaptic_partners: BTreeSet<SegmentId>,
    pub neighbors_by_label: BTreeMap<Label, BTreeSet<SegmentId>>,
    pub synapses_by_label: BTreeMap<Label, BTreeSet<SynapseId>>,
}

/// A neighbor with synapse counts in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankedNeighbor {
    pub segment: SegmentId,
    /// Synapses where the viewed segment is presynaptic.
    pub outgoing: usize,
    /// Synapses where the viewed segment is postsynaptic.
    pub incoming: usize,
}

impl RankedNeighbor {
    pub fn total(&self) -> usize {
        self.outgoing + self.incoming
    }
}

impl SegmentView {
    pub fn build(index: &GraphIndex, id: SegmentId) -> Result<Self> {
        let pre_synapses = index.synapses_with_role(id, Role::Pre)?;
        let post_synapses = index.synapses_with_role(id, Role::Post)?;
        let postsynaptic_partners = index.neighbors_of(id, Some(Role::Pre))?;
        let presynaptic_partners = index.neighbors_of(id, Some(Role::Post))?;

        let mut neighbors_by_label: BTreeMap<Label, BTreeSet<SegmentId>> = BTreeMap::new();
        for &n in postsynaptic_partners.union(&presynaptic_partners) {
            neighbors_by_label.entry(index.segment_label(n)).or_default().insert(n);
        }

        let mut synapses_by_label: BTreeMap<Label, BTreeSet<SynapseId>> = BTreeMap::new();
        for &s in index.synapses_of(id)? {
            synapses_by_label.entry(index.synapse_label(s)).or_default().insert(s);
        }

        let direction = if pre_synapses.len() >= post_synapses.len() {
            Role::Pre
        } else {
            Role::Post
        };

        Ok(SegmentView {
            id,
            label: index.segment_label(id),
            direction,
            pre_synapses,
            post_synapses,
            presynaptic_partners,
            postsynaptic_partners,
            neighbors_by_label,
            synapses_by_label,
        })
    }

    /// Every neighbor with its synapse counts, busiest first. Ties keep
    /// ascending segment order.
    pub fn neighbors_with_rank(&self, index: &GraphIndex) -> Result<Vec<RankedNeighbor>> {
        let mut ranked = Vec::new();
        for &n in self.postsynaptic_partners.union(&self.presynaptic_partners) {
            ranked.push(RankedNeighbor {
                segment: n,
                outgoing: index.synapse_between(self.id, n)?.len(),
                incoming: index.synapse_between(n, self.id)?.len(),
            });
        }
        ranked.sort_by(|a, b| b.total().cmp(&a.total()));
        Ok(ranked)
    }
}
