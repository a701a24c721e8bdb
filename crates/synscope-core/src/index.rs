//! Cross-indices over the synapse table
//!
//! [`GraphIndex`] keeps seven mappings in lockstep:
//!
//! | field            | key            | value                         |
//! |------------------|----------------|-------------------------------|
//! | `syn_to_segs`    | synapse        | `(pre, post)`                 |
//! | `segpair_to_syn` | `(pre, post)`  | synapses between the pair     |
//! | `syn_coords`     | synapse        | centroid and split centroids  |
//! | `syn_size`       | synapse        | voxel count                   |
//! | `seg_to_syn`     | segment        | synapses touching the segment |
//! | `pre_to_post`    | segment        | its postsynaptic partners     |
//! | `post_to_pre`    | segment        | its presynaptic partners      |
//!
//! plus the segment and synapse label indices. No set-valued entry is ever
//! empty: removing the last member removes the key.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::error::{GraphError, Result};
use crate::labels::LabelIndex;
use crate::model::{Coord, CoordPair, Label, Role, SegmentId, SplitCentroids, Synapse, SynapseId, UNLABELED};

static NO_SYNAPSES: BTreeSet<SynapseId> = BTreeSet::new();

/// Stored coordinates of one synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynapseCoords {
    pub centroid: Coord,
    pub split: Option<SplitCentroids>,
}

/// Summary counts, reported by `synscope stats` and the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub synapses: usize,
    pub segments: usize,
    pub connected_pairs: usize,
    pub labeled_segments: usize,
    pub labeled_synapses: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphIndex {
    syn_to_segs: BTreeMap<SynapseId, (SegmentId, SegmentId)>,
    segpair_to_syn: HashMap<(SegmentId, SegmentId), BTreeSet<SynapseId>>,
    syn_coords: HashMap<SynapseId, SynapseCoords>,
    syn_size: HashMap<SynapseId, u64>,
    seg_to_syn: HashMap<SegmentId, BTreeSet<SynapseId>>,
    pre_to_post: HashMap<SegmentId, BTreeSet<SegmentId>>,
    post_to_pre: HashMap<SegmentId, BTreeSet<SegmentId>>,
    seg_labels: LabelIndex,
    syn_labels: LabelIndex,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every index in one pass over `records`.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a Synapse>) -> Result<Self> {
        let mut index = GraphIndex::new();
        for record in records {
            if index.syn_to_segs.contains_key(&record.id) {
                return Err(GraphError::DuplicateSynapseId(record.id));
            }
            index.apply_insert(record, UNLABELED);
        }
        tracing::debug!(
            "Built index: {} synapses, {} segments",
            index.syn_to_segs.len(),
            index.seg_to_syn.len()
        );
        Ok(index)
    }

    /// Replace both label indices, then give every id the files do not
    /// mention the unlabeled label.
    pub fn attach_labels(&mut self, mut segments: LabelIndex, mut synapses: LabelIndex) {
        segments.include_unlabeled(self.seg_to_syn.keys().map(|s| s.0));
        synapses.include_unlabeled(self.syn_to_segs.keys().map(|s| s.0));
        self.seg_labels = segments;
        self.syn_labels = synapses;
    }

    // ── Lookups ─────────────────────────────────────────────

    /// Whether the segment is referenced by a synapse or a label row.
    pub fn contains_segment(&self, seg: SegmentId) -> bool {
        self.seg_to_syn.contains_key(&seg) || self.seg_labels.contains(seg.0)
    }

    pub fn contains_synapse(&self, syn: SynapseId) -> bool {
        self.syn_to_segs.contains_key(&syn)
    }

    fn require_segment(&self, seg: SegmentId) -> Result<()> {
        if self.contains_segment(seg) {
            Ok(())
        } else {
            Err(GraphError::SegmentNotFound(seg))
        }
    }

    /// Every synapse where `seg` is pre or post.
    pub fn synapses_of(&self, seg: SegmentId) -> Result<&BTreeSet<SynapseId>> {
        self.require_segment(seg)?;
        Ok(self.seg_to_syn.get(&seg).unwrap_or(&NO_SYNAPSES))
    }

    /// Synapses where `seg` plays `role`.
    pub fn synapses_with_role(&self, seg: SegmentId, role: Role) -> Result<BTreeSet<SynapseId>> {
        let partners = self.neighbors_of(seg, Some(role))?;
        let mut out = BTreeSet::new();
        for partner in partners {
            let key = match role {
                Role::Pre => (seg, partner),
                Role::Post => (partner, seg),
            };
            if let Some(syns) = self.segpair_to_syn.get(&key) {
                out.extend(syns.iter().copied());
            }
        }
        Ok(out)
    }

    /// Segments connected to `seg`. `None` merges both directions;
    /// `Some(Role::Pre)` returns the partners `seg` sends to and
    /// `Some(Role::Post)` the partners it receives from.
    pub fn neighbors_of(&self, seg: SegmentId, role: Option<Role>) -> Result<BTreeSet<SegmentId>> {
        self.require_segment(seg)?;
        let downstream = self.pre_to_post.get(&seg);
        let upstream = self.post_to_pre.get(&seg);
        let mut out = BTreeSet::new();
        if role != Some(Role::Post) {
            out.extend(downstream.into_iter().flatten().copied());
        }
        if role != Some(Role::Pre) {
            out.extend(upstream.into_iter().flatten().copied());
        }
        Ok(out)
    }

    /// Synapses from `pre` to `post`. Ordered: `(a, b)` and `(b, a)` are
    /// independent queries.
    pub fn synapse_between(&self, pre: SegmentId, post: SegmentId) -> Result<&BTreeSet<SynapseId>> {
        self.require_segment(pre)?;
        self.require_segment(post)?;
        Ok(self.segpair_to_syn.get(&(pre, post)).unwrap_or(&NO_SYNAPSES))
    }

    pub fn segments_of_synapse(&self, syn: SynapseId) -> Result<(SegmentId, SegmentId)> {
        self.syn_to_segs
            .get(&syn)
            .copied()
            .ok_or(GraphError::SynapseNotFound(syn))
    }

    /// Reassemble the full record of `syn`.
    pub fn synapse(&self, syn: SynapseId) -> Result<Synapse> {
        let (pre, post) = self.segments_of_synapse(syn)?;
        let coords = self.syn_coords.get(&syn).ok_or_else(|| orphan(syn, "syn_coords"))?;
        let size = self.syn_size.get(&syn).ok_or_else(|| orphan(syn, "syn_size"))?;
        Ok(Synapse {
            id: syn,
            pre,
            post,
            centroid: coords.centroid,
            size: *size,
            split: coords.split,
        })
    }

    pub fn centroid(&self, syn: SynapseId) -> Result<Coord> {
        self.syn_coords
            .get(&syn)
            .map(|c| c.centroid)
            .ok_or(GraphError::SynapseNotFound(syn))
    }

    pub fn coord_pair(&self, syn: SynapseId) -> Result<CoordPair> {
        let coords = self.syn_coords.get(&syn).ok_or(GraphError::SynapseNotFound(syn))?;
        Ok(match coords.split {
            Some(split) => CoordPair::new(split.pre, split.post),
            None => CoordPair::point(coords.centroid),
        })
    }

    pub fn size(&self, syn: SynapseId) -> Result<u64> {
        self.syn_size.get(&syn).copied().ok_or(GraphError::SynapseNotFound(syn))
    }

    pub fn segment_label(&self, seg: SegmentId) -> Label {
        self.seg_labels.label_of(seg.0)
    }

    pub fn synapse_label(&self, syn: SynapseId) -> Label {
        self.syn_labels.label_of(syn.0)
    }

    pub fn segment_labels(&self) -> &LabelIndex {
        &self.seg_labels
    }

    pub fn synapse_labels(&self) -> &LabelIndex {
        &self.syn_labels
    }

    /// Segments carrying `label`.
    pub fn segments_with_label(&self, label: Label) -> BTreeSet<SegmentId> {
        self.seg_labels
            .members(label)
            .map(|ids| ids.iter().map(|&id| SegmentId(id)).collect())
            .unwrap_or_default()
    }

    /// Synapses carrying `label`.
    pub fn synapses_with_label(&self, label: Label) -> BTreeSet<SynapseId> {
        self.syn_labels
            .members(label)
            .map(|ids| ids.iter().map(|&id| SynapseId(id)).collect())
            .unwrap_or_default()
    }

    /// All known segment ids in ascending order.
    pub fn segment_ids(&self) -> BTreeSet<SegmentId> {
        self.seg_to_syn
            .keys()
            .copied()
            .chain(self.seg_labels.ids().map(SegmentId))
            .collect()
    }

    pub fn synapse_ids(&self) -> impl Iterator<Item = SynapseId> + '_ {
        self.syn_to_segs.keys().copied()
    }

    /// Every record in ascending id order.
    pub fn records(&self) -> Result<Vec<Synapse>> {
        self.syn_to_segs.keys().map(|&id| self.synapse(id)).collect()
    }

    pub fn max_synapse_id(&self) -> Option<SynapseId> {
        self.syn_to_segs.keys().next_back().copied()
    }

    pub fn synapse_count(&self) -> usize {
        self.syn_to_segs.len()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            synapses: self.syn_to_segs.len(),
            segments: self.segment_ids().len(),
            connected_pairs: self.segpair_to_syn.len(),
            labeled_segments: self.seg_labels.ids().filter(|&id| self.seg_labels.label_of(id) != UNLABELED).count(),
            labeled_synapses: self.syn_labels.ids().filter(|&id| self.syn_labels.label_of(id) != UNLABELED).count(),
        }
    }

    // ── Mutation (driven by MutationLog) ────────────────────

    /// Insert one record into every index. Fails without touching anything
    /// if any synapse-keyed index already knows the id.
    pub(crate) fn insert(&mut self, record: &Synapse, label: Label) -> Result<()> {
        let id = record.id;
        let present = [
            self.syn_to_segs.contains_key(&id),
            self.syn_coords.contains_key(&id),
            self.syn_size.contains_key(&id),
            self.syn_labels.contains(id.0),
        ];
        match present {
            [false, false, false, false] => {}
            [true, ..] => return Err(GraphError::DuplicateSynapseId(id)),
            _ => return Err(orphan(id, "a synapse-keyed index")),
        }
        if self
            .segpair_to_syn
            .get(&(record.pre, record.post))
            .is_some_and(|s| s.contains(&id))
        {
            return Err(orphan(id, "segpair_to_syn"));
        }
        self.apply_insert(record, label);
        Ok(())
    }

    fn apply_insert(&mut self, record: &Synapse, label: Label) {
        let (id, pre, post) = (record.id, record.pre, record.post);
        self.syn_to_segs.insert(id, (pre, post));
        self.syn_coords.insert(
            id,
            SynapseCoords {
                centroid: record.centroid,
                split: record.split,
            },
        );
        self.syn_size.insert(id, record.size);
        self.segpair_to_syn.entry((pre, post)).or_default().insert(id);
        self.seg_to_syn.entry(pre).or_default().insert(id);
        self.seg_to_syn.entry(post).or_default().insert(id);
        self.pre_to_post.entry(pre).or_default().insert(post);
        self.post_to_pre.entry(post).or_default().insert(pre);
        self.syn_labels.set(id.0, label);
        self.seg_labels.include_unlabeled([pre.0, post.0]);
    }

    /// Remove one synapse from every index, returning its record and label.
    /// Every entry is checked before anything is removed, so a drifted
    /// index surfaces as [`GraphError::InvariantViolation`] with the state
    /// left as it was.
    pub(crate) fn remove(&mut self, id: SynapseId) -> Result<(Synapse, Label)> {
        let record = self.synapse(id)?;
        let (pre, post) = (record.pre, record.post);

        let pair_ok = self.segpair_to_syn.get(&(pre, post)).is_some_and(|s| s.contains(&id));
        let segs_ok = self.seg_to_syn.get(&pre).is_some_and(|s| s.contains(&id))
            && self.seg_to_syn.get(&post).is_some_and(|s| s.contains(&id));
        let neighbors_ok = self.pre_to_post.get(&pre).is_some_and(|s| s.contains(&post))
            && self.post_to_pre.get(&post).is_some_and(|s| s.contains(&pre));
        if !pair_ok {
            return Err(orphan(id, "segpair_to_syn"));
        }
        if !segs_ok {
            return Err(orphan(id, "seg_to_syn"));
        }
        if !neighbors_ok {
            return Err(orphan(id, "pre_to_post/post_to_pre"));
        }

        self.syn_to_segs.remove(&id);
        self.syn_coords.remove(&id);
        self.syn_size.remove(&id);
        let label = self.syn_labels.remove(id.0).unwrap_or(UNLABELED);

        let pair_emptied = remove_from(&mut self.segpair_to_syn, (pre, post), &id);
        remove_from(&mut self.seg_to_syn, pre, &id);
        remove_from(&mut self.seg_to_syn, post, &id);
        if pair_emptied {
            remove_from(&mut self.pre_to_post, pre, &post);
            remove_from(&mut self.post_to_pre, post, &pre);
        }
        Ok((record, label))
    }

    /// Drop the label entry of a segment no synapse references any more.
    /// Segments still in use keep their entry.
    pub(crate) fn forget_segment(&mut self, seg: SegmentId) {
        if !self.seg_to_syn.contains_key(&seg) {
            self.seg_labels.remove(seg.0);
        }
    }

    /// Relabel a synapse, returning its previous label.
    pub(crate) fn set_synapse_label(&mut self, id: SynapseId, label: Label) -> Result<Label> {
        if !self.contains_synapse(id) {
            return Err(GraphError::SynapseNotFound(id));
        }
        Ok(self.syn_labels.set(id.0, label).unwrap_or(UNLABELED))
    }

    /// Verify every cross-index invariant. Linear in the size of the graph.
    pub fn check_invariants(&self) -> Result<()> {
        for (&id, &(pre, post)) in &self.syn_to_segs {
            let ok = self.seg_to_syn.get(&pre).is_some_and(|s| s.contains(&id))
                && self.seg_to_syn.get(&post).is_some_and(|s| s.contains(&id))
                && self.pre_to_post.get(&pre).is_some_and(|s| s.contains(&post))
                && self.post_to_pre.get(&post).is_some_and(|s| s.contains(&pre))
                && self.segpair_to_syn.get(&(pre, post)).is_some_and(|s| s.contains(&id));
            if !ok {
                return Err(GraphError::InvariantViolation(format!(
                    "synapse {id} ({pre} -> {post}) missing from a segment index"
                )));
            }
            if !self.syn_coords.contains_key(&id) || !self.syn_size.contains_key(&id) {
                return Err(orphan(id, "syn_coords/syn_size"));
            }
        }

        if self.syn_coords.len() != self.syn_to_segs.len() || self.syn_size.len() != self.syn_to_segs.len() {
            return Err(GraphError::InvariantViolation(
                "synapse-keyed indices differ in size".to_string(),
            ));
        }

        for (&(pre, post), syns) in &self.segpair_to_syn {
            if syns.is_empty() {
                return Err(GraphError::InvariantViolation(format!("empty pair key ({pre}, {post})")));
            }
            for id in syns {
                if self.syn_to_segs.get(id) != Some(&(pre, post)) {
                    return Err(orphan(*id, "syn_to_segs"));
                }
            }
        }

        for (seg, syns) in &self.seg_to_syn {
            if syns.is_empty() || syns.iter().any(|id| self.syn_to_segs.get(id).is_none_or(|&(p, q)| p != *seg && q != *seg)) {
                return Err(GraphError::InvariantViolation(format!("stale seg_to_syn entry for {seg}")));
            }
        }

        for (pre, posts) in &self.pre_to_post {
            for post in posts {
                if !self.segpair_to_syn.contains_key(&(*pre, *post))
                    || !self.post_to_pre.get(post).is_some_and(|s| s.contains(pre))
                {
                    return Err(GraphError::InvariantViolation(format!("stale neighbor {pre} -> {post}")));
                }
            }
        }
        for (post, pres) in &self.post_to_pre {
            for pre in pres {
                if !self.segpair_to_syn.contains_key(&(*pre, *post)) {
                    return Err(GraphError::InvariantViolation(format!("stale neighbor {pre} <- {post}")));
                }
            }
        }

        if !self.seg_labels.is_consistent() || !self.syn_labels.is_consistent() {
            return Err(GraphError::InvariantViolation("label index out of sync".to_string()));
        }
        if let Some(seg) = self.seg_to_syn.keys().find(|s| !self.seg_labels.contains(s.0)) {
            return Err(GraphError::InvariantViolation(format!("segment {seg} has no label entry")));
        }
        if let Some(syn) = self.syn_to_segs.keys().find(|s| !self.syn_labels.contains(s.0)) {
            return Err(GraphError::InvariantViolation(format!("synapse {syn} has no label entry")));
        }
        Ok(())
    }
}

fn orphan(id: SynapseId, index: &str) -> GraphError {
    GraphError::InvariantViolation(format!("synapse {id} is inconsistent in {index}"))
}

/// Remove `value` from the set at `key`, dropping the key once the set is
/// empty. Returns whether the key was dropped.
fn remove_from<K, V>(map: &mut HashMap<K, BTreeSet<V>>, key: K, value: &V) -> bool
where
    K: std::hash::Hash + Eq,
    V: Ord,
{
    let Some(set) = map.get_mut(&key) else {
        return false;
    };
    set.remove(value);
    if set.is_empty() {
        map.remove(&key);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_index, synapse};

    #[test]
    fn test_example_graph_lookups() {
        let index = sample_index();
        let s20: Vec<_> = index.synapses_of(SegmentId(20)).unwrap().iter().copied().collect();
        assert_eq!(s20, vec![SynapseId(1), SynapseId(2)]);

        let n20 = index.neighbors_of(SegmentId(20), None).unwrap();
        assert_eq!(n20, BTreeSet::from([SegmentId(10), SegmentId(30)]));
        assert_eq!(index.neighbors_of(SegmentId(20), Some(Role::Pre)).unwrap(), BTreeSet::from([SegmentId(30)]));
        assert_eq!(index.neighbors_of(SegmentId(20), Some(Role::Post)).unwrap(), BTreeSet::from([SegmentId(10)]));
        assert_eq!(index.segments_of_synapse(SynapseId(2)).unwrap(), (SegmentId(20), SegmentId(30)));
    }

    #[test]
    fn test_synapse_between_is_ordered() {
        let index = GraphIndex::build(&[
            synapse(1, 10, 20, [0, 0, 0]),
            synapse(2, 20, 10, [1, 1, 1]),
            synapse(3, 10, 20, [2, 2, 2]),
        ])
        .unwrap();
        let forward = index.synapse_between(SegmentId(10), SegmentId(20)).unwrap();
        let backward = index.synapse_between(SegmentId(20), SegmentId(10)).unwrap();
        assert_eq!(forward, &BTreeSet::from([SynapseId(1), SynapseId(3)]));
        assert_eq!(backward, &BTreeSet::from([SynapseId(2)]));
        // neighbor sets stay deduplicated despite the parallel edge
        assert_eq!(index.neighbors_of(SegmentId(10), Some(Role::Pre)).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = GraphIndex::build(&[synapse(1, 10, 20, [0, 0, 0]), synapse(1, 30, 40, [0, 0, 0])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateSynapseId(SynapseId(1))));
    }

    #[test]
    fn test_unknown_keys_are_not_found() {
        let index = sample_index();
        assert!(matches!(index.synapses_of(SegmentId(99)), Err(GraphError::SegmentNotFound(_))));
        assert!(matches!(index.segments_of_synapse(SynapseId(99)), Err(GraphError::SynapseNotFound(_))));
        assert!(index.synapse_between(SegmentId(10), SegmentId(30)).unwrap().is_empty());
    }

    #[test]
    fn test_labeled_segment_without_synapses_is_empty_not_missing() {
        let mut index = sample_index();
        let mut segs = LabelIndex::new();
        segs.set(77, 2);
        index.attach_labels(segs, LabelIndex::new());
        assert!(index.synapses_of(SegmentId(77)).unwrap().is_empty());
        assert!(index.neighbors_of(SegmentId(77), None).unwrap().is_empty());
    }

    #[test]
    fn test_remove_last_pair_synapse_drops_keys() {
        let mut index = sample_index();
        let (record, _) = index.remove(SynapseId(1)).unwrap();
        assert_eq!(record.pre, SegmentId(10));

        assert_eq!(index.neighbors_of(SegmentId(20), None).unwrap(), BTreeSet::from([SegmentId(30)]));
        assert!(!index.pre_to_post.contains_key(&SegmentId(10)));
        assert!(!index.segpair_to_syn.contains_key(&(SegmentId(10), SegmentId(20))));
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_self_synapse_round_trip() {
        let mut index = GraphIndex::build(&[synapse(1, 5, 5, [0, 0, 0])]).unwrap();
        index.check_invariants().unwrap();
        index.remove(SynapseId(1)).unwrap();
        assert_eq!(index, {
            let mut empty = GraphIndex::new();
            empty.seg_labels.include_unlabeled([5]);
            empty
        });
    }

    #[test]
    fn test_drift_is_reported_without_partial_removal() {
        let mut index = sample_index();
        index.pre_to_post.remove(&SegmentId(10));
        let before = index.clone();
        let err = index.remove(SynapseId(1)).unwrap_err();
        assert!(matches!(err, GraphError::InvariantViolation(_)));
        assert!(err.is_fatal());
        assert_eq!(index, before);
    }

    #[test]
    fn test_stats() {
        let index = sample_index();
        let stats = index.stats();
        assert_eq!(stats.synapses, 2);
        assert_eq!(stats.segments, 3);
        assert_eq!(stats.connected_pairs, 2);
    }
}
