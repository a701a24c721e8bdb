//! Read-only queries over the working set of segments

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::GraphIndex;
use crate::model::{Coord, CoordPair, Label, Role, Scope, SegmentId, SynapseId};

/// What [`QueryEngine::shared`] collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedKind {
    Synapses,
    Neighbors,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum SharedSet {
    Synapses(BTreeSet<SynapseId>),
    Neighbors(BTreeSet<SegmentId>),
}

/// Elements present in at least two of `sets`: the union of every pairwise
/// intersection. Fewer than two sets share nothing.
pub fn shared_pairwise<T: Ord + Copy>(sets: &[BTreeSet<T>]) -> BTreeSet<T> {
    let mut out = BTreeSet::new();
    for (i, a) in sets.iter().enumerate() {
        for b in &sets[i + 1..] {
            out.extend(a.intersection(b).copied());
        }
    }
    out
}

/// Queries over a borrowed [`GraphIndex`] for a fixed working set.
#[derive(Debug, Clone)]
pub struct QueryEngine<'a> {
    index: &'a GraphIndex,
    working_set: Vec<SegmentId>,
    scope: Scope,
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a GraphIndex, working_set: &[SegmentId]) -> Self {
        let mut working_set = working_set.to_vec();
        working_set.sort_unstable();
        working_set.dedup();
        QueryEngine {
            index,
            working_set,
            scope: Scope::All,
        }
    }

    /// Scope used by the label queries.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn working_set(&self) -> &[SegmentId] {
        &self.working_set
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    fn per_segment<T: Ord>(
        &self,
        f: impl Fn(SegmentId) -> Result<BTreeSet<T>>,
    ) -> Result<Vec<BTreeSet<T>>> {
        self.working_set.iter().map(|&seg| f(seg)).collect()
    }

    fn union<T: Ord>(sets: Vec<BTreeSet<T>>) -> BTreeSet<T> {
        sets.into_iter().flatten().collect()
    }

    /// Synapses of the working set under `scope`.
    pub fn synapses(&self, scope: Scope) -> Result<BTreeSet<SynapseId>> {
        let index = self.index;
        Ok(match scope {
            Scope::Pre => Self::union(self.per_segment(|s| index.synapses_with_role(s, Role::Pre))?),
            Scope::Post => Self::union(self.per_segment(|s| index.synapses_with_role(s, Role::Post))?),
            Scope::All => Self::union(self.per_segment(|s| index.synapses_of(s).cloned())?),
            Scope::Shared => shared_pairwise(&self.per_segment(|s| index.synapses_of(s).cloned())?),
        })
    }

    /// Neighbors of the working set under `scope`. `Pre` gives the segments
    /// the working set sends to, `Post` those it receives from.
    pub fn neighbors(&self, scope: Scope) -> Result<BTreeSet<SegmentId>> {
        let index = self.index;
        Ok(match scope {
            Scope::Pre => Self::union(self.per_segment(|s| index.neighbors_of(s, Some(Role::Pre)))?),
            Scope::Post => Self::union(self.per_segment(|s| index.neighbors_of(s, Some(Role::Post)))?),
            Scope::All => Self::union(self.per_segment(|s| index.neighbors_of(s, None))?),
            Scope::Shared => shared_pairwise(&self.per_segment(|s| index.neighbors_of(s, None))?),
        })
    }

    /// Synapses or neighbors common to at least two working segments.
    pub fn shared(&self, kind: SharedKind) -> Result<SharedSet> {
        Ok(match kind {
            SharedKind::Synapses => SharedSet::Synapses(self.synapses(Scope::Shared)?),
            SharedKind::Neighbors => SharedSet::Neighbors(self.neighbors(Scope::Shared)?),
        })
    }

    /// Synapses of the working set (under the engine's scope) classified as
    /// `label`.
    pub fn synapses_by_label(&self, label: Label) -> Result<BTreeSet<SynapseId>> {
        let mut out = self.synapses(self.scope)?;
        out.retain(|&s| self.index.synapse_label(s) == label);
        Ok(out)
    }

    /// Synapses between the working set and any neighbor labeled `label`,
    /// in either direction.
    pub fn neighbor_label_synapses(&self, label: Label) -> Result<BTreeSet<SynapseId>> {
        let mut out = BTreeSet::new();
        for &seg in &self.working_set {
            for n in self.index.neighbors_of(seg, None)? {
                if self.index.segment_label(n) != label {
                    continue;
                }
                out.extend(self.index.synapse_between(seg, n)?.iter().copied());
                out.extend(self.index.synapse_between(n, seg)?.iter().copied());
            }
        }
        Ok(out)
    }

    pub fn neighbors_by_label(&self, label: Label) -> Result<BTreeSet<SegmentId>> {
        let mut out = self.neighbors(self.scope)?;
        out.retain(|&n| self.index.segment_label(n) == label);
        Ok(out)
    }

    /// Neighbor -> working segments touching it, keeping neighbors touched
    /// by at least `min_count` of them.
    pub fn common_neighbors(&self, min_count: usize) -> Result<BTreeMap<SegmentId, BTreeSet<SegmentId>>> {
        let mut touched: BTreeMap<SegmentId, BTreeSet<SegmentId>> = BTreeMap::new();
        for &seg in &self.working_set {
            for n in self.index.neighbors_of(seg, None)? {
                touched.entry(n).or_default().insert(seg);
            }
        }
        touched.retain(|_, segs| segs.len() >= min_count);
        Ok(touched)
    }

    /// Endpoints of `synapses` outside the working set.
    pub fn partner_segments(&self, synapses: &BTreeSet<SynapseId>) -> Result<BTreeSet<SegmentId>> {
        let mut out = BTreeSet::new();
        for &syn in synapses {
            let (pre, post) = self.index.segments_of_synapse(syn)?;
            for seg in [pre, post] {
                if self.working_set.binary_search(&seg).is_err() {
                    out.insert(seg);
                }
            }
        }
        Ok(out)
    }

    /// One centroid per synapse, in ascending id order.
    pub fn coordinates(&self, synapses: &BTreeSet<SynapseId>) -> Result<Vec<Coord>> {
        synapses.iter().map(|&s| self.index.centroid(s)).collect()
    }

    pub fn pre_post_coordinates(&self, synapses: &BTreeSet<SynapseId>) -> Result<Vec<CoordPair>> {
        synapses.iter().map(|&s| self.index.coord_pair(s)).collect()
    }
}

/// Independent on/off switches for synapse-label and neighbor-label
/// categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryToggles {
    pub synapse_labels: BTreeMap<Label, bool>,
    pub neighbor_labels: BTreeMap<Label, bool>,
}

impl Default for CategoryToggles {
    /// Shaft (0) and spine (1) synapses, neighbors labeled 1 through 4.
    fn default() -> Self {
        CategoryToggles::new([0, 1], 1..=4)
    }
}

impl CategoryToggles {
    /// Every listed category starts enabled.
    pub fn new(synapse_labels: impl IntoIterator<Item = Label>, neighbor_labels: impl IntoIterator<Item = Label>) -> Self {
        CategoryToggles {
            synapse_labels: synapse_labels.into_iter().map(|l| (l, true)).collect(),
            neighbor_labels: neighbor_labels.into_iter().map(|l| (l, true)).collect(),
        }
    }

    /// Flip a synapse-label category, returning its new state. Unknown
    /// labels become a new enabled category.
    pub fn toggle_synapse_label(&mut self, label: Label) -> bool {
        flip(&mut self.synapse_labels, label)
    }

    pub fn toggle_neighbor_label(&mut self, label: Label) -> bool {
        flip(&mut self.neighbor_labels, label)
    }

    pub fn enabled_synapse_labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.synapse_labels.iter().filter(|(_, on)| **on).map(|(l, _)| *l)
    }

    pub fn enabled_neighbor_labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.neighbor_labels.iter().filter(|(_, on)| **on).map(|(l, _)| *l)
    }

    /// `(union of enabled synapse categories) ∩ (union of enabled neighbor
    /// categories)`.
    pub fn compose(&self, engine: &QueryEngine<'_>) -> Result<BTreeSet<SynapseId>> {
        let mut by_synapse = BTreeSet::new();
        for label in self.enabled_synapse_labels() {
            by_synapse.extend(engine.synapses_by_label(label)?);
        }
        let mut by_neighbor = BTreeSet::new();
        for label in self.enabled_neighbor_labels() {
            by_neighbor.extend(engine.neighbor_label_synapses(label)?);
        }
        Ok(by_synapse.intersection(&by_neighbor).copied().collect())
    }
}

fn flip(map: &mut BTreeMap<Label, bool>, label: Label) -> bool {
    let on = map.entry(label).or_insert(false);
    *on = !*on;
    *on
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::test_utils::{labeled_log, synapse};

    fn segs(ids: &[u64]) -> Vec<SegmentId> {
        ids.iter().map(|&i| SegmentId(i)).collect()
    }

    fn syns(ids: &[u64]) -> BTreeSet<SynapseId> {
        ids.iter().map(|&i| SynapseId(i)).collect()
    }

    #[test]
    fn test_shared_is_union_of_pairwise_intersections() {
        // A=1 {1,2}, B=2 {2,3}, C=3 {3}
        let index = GraphIndex::build(&[
            synapse(1, 1, 9, [0, 0, 0]),
            synapse(2, 1, 2, [0, 0, 0]),
            synapse(3, 2, 3, [0, 0, 0]),
        ])
        .unwrap();
        let engine = QueryEngine::new(&index, &segs(&[1, 2, 3]));
        assert_eq!(engine.shared(SharedKind::Synapses).unwrap(), SharedSet::Synapses(syns(&[2, 3])));
    }

    #[test]
    fn test_shared_needs_two_segments() {
        let log = labeled_log();
        let engine = QueryEngine::new(log.index(), &segs(&[1]));
        assert!(engine.synapses(Scope::Shared).unwrap().is_empty());
    }

    #[test]
    fn test_scoped_synapses_and_neighbors() {
        let log = labeled_log();
        let engine = QueryEngine::new(log.index(), &segs(&[1]));
        assert_eq!(engine.synapses(Scope::Pre).unwrap(), syns(&[102]));
        assert_eq!(engine.synapses(Scope::Post).unwrap(), syns(&[100, 101, 103]));
        assert_eq!(engine.neighbors(Scope::Pre).unwrap(), BTreeSet::from([SegmentId(4)]));
        assert_eq!(engine.neighbors(Scope::All).unwrap().len(), 4);
    }

    #[test]
    fn test_shared_neighbors() {
        let log = labeled_log();
        // 1 and 6 both touch 2 and 3
        let engine = QueryEngine::new(log.index(), &segs(&[1, 6]));
        assert_eq!(
            engine.shared(SharedKind::Neighbors).unwrap(),
            SharedSet::Neighbors(BTreeSet::from([SegmentId(2), SegmentId(3)]))
        );
        let common = engine.common_neighbors(2).unwrap();
        assert_eq!(common.keys().copied().collect::<Vec<_>>(), segs(&[2, 3]));
    }

    #[test]
    fn test_label_queries() {
        let log = labeled_log();
        let engine = QueryEngine::new(log.index(), &segs(&[1]));
        assert_eq!(engine.synapses_by_label(0).unwrap(), syns(&[100, 102]));
        assert_eq!(engine.neighbor_label_synapses(1).unwrap(), syns(&[100, 102]));
        assert_eq!(engine.neighbors_by_label(2).unwrap(), BTreeSet::from([SegmentId(3)]));

        let post_only = engine.clone().with_scope(Scope::Post);
        assert_eq!(post_only.synapses_by_label(0).unwrap(), syns(&[100]));
    }

    #[test]
    fn test_toggles_compose_by_intersection() {
        let log = labeled_log();
        let engine = QueryEngine::new(log.index(), &segs(&[1]));
        let mut toggles = CategoryToggles::default();
        // shaft or spine: 100..103; neighbors labeled 1..4: 100, 101, 102
        assert_eq!(toggles.compose(&engine).unwrap(), syns(&[100, 101, 102]));

        assert!(!toggles.toggle_synapse_label(0));
        assert_eq!(toggles.compose(&engine).unwrap(), syns(&[101]));

        assert!(!toggles.toggle_neighbor_label(2));
        assert!(toggles.compose(&engine).unwrap().is_empty());
    }

    #[test]
    fn test_partners_and_coordinates() {
        let log = labeled_log();
        let engine = QueryEngine::new(log.index(), &segs(&[1]));
        let selected = syns(&[100, 102]);
        assert_eq!(
            engine.partner_segments(&selected).unwrap(),
            BTreeSet::from([SegmentId(2), SegmentId(4)])
        );
        assert_eq!(
            engine.coordinates(&selected).unwrap(),
            vec![Coord::new(10, 0, 0), Coord::new(12, 0, 0)]
        );
    }

    #[test]
    fn test_unknown_working_segment() {
        let log = labeled_log();
        let engine = QueryEngine::new(log.index(), &segs(&[1, 404]));
        assert!(matches!(engine.synapses(Scope::All), Err(GraphError::SegmentNotFound(SegmentId(404)))));
    }
}
