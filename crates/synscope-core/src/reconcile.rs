//! Syncing viewer-side synapse edits back into the graph
//!
//! The viewer sends back the full list of synapse markers it shows. Markers
//! are matched to the synapses the viewer was given by exact coordinate
//! equality; unmatched synapses are removed and unmatched markers become new
//! synapses once their endpoints resolve to segments.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::index::GraphIndex;
use crate::model::{Coord, CoordPair, SegmentId, SynapseId, BACKGROUND};
use crate::mutation::{AppliedOp, MutationLog};

/// Resolves a voxel to the segment that owns it.
pub trait SegmentLookup {
    /// Segment at a voxel given in `z, y, x` order, or `None` outside the
    /// volume.
    fn segment_at(&self, zyx: [i64; 3]) -> Option<SegmentId>;
}

impl<F> SegmentLookup for F
where
    F: Fn([i64; 3]) -> Option<SegmentId>,
{
    fn segment_at(&self, zyx: [i64; 3]) -> Option<SegmentId> {
        self(zyx)
    }
}

/// Lookup used when no segmentation is configured: nothing resolves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSegmentation;

impl SegmentLookup for NoSegmentation {
    fn segment_at(&self, _zyx: [i64; 3]) -> Option<SegmentId> {
        None
    }
}

/// Segmentation labels for a sparse set of voxels, keyed `z, y, x`.
#[derive(Debug, Clone, Default)]
pub struct SparseVolume {
    voxels: HashMap<[i64; 3], SegmentId>,
}

impl SparseVolume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `z,y,x,segment` rows.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
        let mut volume = SparseVolume::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 4 {
                return Err(GraphError::format(path, idx + 1, "expected `z,y,x,segment`"));
            }
            let mut zyx = [0i64; 3];
            for (slot, field) in zyx.iter_mut().zip(&fields[..3]) {
                *slot = field
                    .parse()
                    .map_err(|_| GraphError::format(path, idx + 1, format!("`{field}` is not an integer")))?;
            }
            let seg = fields[3]
                .parse()
                .map_err(|_| GraphError::format(path, idx + 1, format!("`{}` is not a segment id", fields[3])))?;
            volume.insert(zyx, SegmentId(seg));
        }
        tracing::info!("Loaded {} segmentation voxels from {}", volume.len(), path.display());
        Ok(volume)
    }

    pub fn insert(&mut self, zyx: [i64; 3], seg: SegmentId) {
        self.voxels.insert(zyx, seg);
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }
}

impl SegmentLookup for SparseVolume {
    fn segment_at(&self, zyx: [i64; 3]) -> Option<SegmentId> {
        self.voxels.get(&zyx).copied()
    }
}

/// How the viewer's flat point list maps to synapse markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointPairing {
    /// One point per synapse at its centroid. A lone point names a single
    /// voxel, and a voxel belongs to a single segment, so new points cannot
    /// say which segments a synapse connects: they are matched against
    /// existing synapses but never added.
    Centroid,
    /// Consecutive `(pre, post)` points per synapse.
    #[default]
    PrePost,
}

impl PointPairing {
    /// Marker pairs in a flat point list. A trailing unpaired point under
    /// `PrePost` is dropped.
    pub fn pairs(self, points: &[Coord]) -> Vec<CoordPair> {
        match self {
            PointPairing::Centroid => points.iter().map(|&p| CoordPair::point(p)).collect(),
            PointPairing::PrePost => points.chunks_exact(2).map(|c| CoordPair::new(c[0], c[1])).collect(),
        }
    }

    /// Marker pairs in a point list the viewer edited, split so that pairs
    /// the viewer was given stay together even when points before them were
    /// deleted or added. Points left over between recognized pairs are
    /// paired in order. Fails when an odd number of points is left under
    /// `PrePost`.
    pub fn align(self, points: &[Coord], expected: &[CoordPair]) -> Result<Vec<CoordPair>> {
        if self == PointPairing::Centroid {
            return Ok(self.pairs(points));
        }
        if points.len() % 2 != 0 {
            return Err(GraphError::IncompleteMarkers(points.len()));
        }
        let mut remaining: HashMap<CoordPair, usize> = HashMap::new();
        for pair in expected {
            *remaining.entry(*pair).or_default() += 1;
        }

        let mut aligned = Vec::with_capacity(points.len() / 2);
        let mut leftover = Vec::new();
        let mut i = 0;
        while i < points.len() {
            if let Some(&next) = points.get(i + 1) {
                let pair = CoordPair::new(points[i], next);
                if let Some(n) = remaining.get_mut(&pair).filter(|n| **n > 0) {
                    *n -= 1;
                    aligned.push(pair);
                    i += 2;
                    continue;
                }
            }
            leftover.push(points[i]);
            i += 1;
        }
        aligned.extend(self.pairs(&leftover));
        Ok(aligned)
    }

    /// Flatten marker pairs back into the viewer's point list.
    pub fn points(self, pairs: &[CoordPair]) -> Vec<Coord> {
        match self {
            PointPairing::Centroid => pairs.iter().map(|p| p.pre).collect(),
            PointPairing::PrePost => pairs.iter().flat_map(|p| [p.pre, p.post]).collect(),
        }
    }

    /// The marker a stored synapse is shown as.
    pub fn marker(self, index: &GraphIndex, id: SynapseId) -> Result<CoordPair> {
        match self {
            PointPairing::Centroid => index.centroid(id).map(CoordPair::point),
            PointPairing::PrePost => index.coord_pair(id),
        }
    }
}

/// Input to [`MutationLog::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// Segments under edit. New synapses must touch one of them.
    pub working_set: Vec<SegmentId>,
    /// Synapses the viewer was shown, in matching priority order.
    pub current: Vec<SynapseId>,
    /// Marker pairs the viewer now shows.
    pub observed: Vec<CoordPair>,
    pub pairing: PointPairing,
}

impl ReconcileRequest {
    /// Request covering every synapse of the working set.
    pub fn for_working_set(index: &GraphIndex, working_set: &[SegmentId], observed: Vec<CoordPair>) -> Result<Self> {
        let mut current = BTreeSet::new();
        for &seg in working_set {
            current.extend(index.synapses_of(seg)?.iter().copied());
        }
        Ok(ReconcileRequest {
            working_set: working_set.to_vec(),
            current: current.into_iter().collect(),
            observed,
            pairing: PointPairing::default(),
        })
    }

    pub fn with_pairing(mut self, pairing: PointPairing) -> Self {
        self.pairing = pairing;
        self
    }
}

/// Why an unmatched marker did not become a synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// An endpoint is outside the volume or on background.
    Unresolved,
    /// Neither endpoint belongs to the working set.
    OutsideWorkingSet,
    /// A lone centroid cannot name both endpoints.
    Unpaired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RejectedAddition {
    pub pair: CoordPair,
    pub pre: Option<SegmentId>,
    pub post: Option<SegmentId>,
    pub reason: RejectReason,
}

/// Several synapses, or several markers, share one coordinate pair, so the
/// match chosen depends on list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub pair: CoordPair,
    /// Existing synapses at the pair, in the order they were tried.
    pub candidates: Vec<SynapseId>,
    /// How many observed markers sit at the pair.
    pub observed: usize,
    /// Synapses kept by the first-found match.
    pub kept: Vec<SynapseId>,
}

/// Outcome of a reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub applied: Vec<AppliedOp>,
    pub rejected: Vec<RejectedAddition>,
    pub ambiguous: Vec<AmbiguousMatch>,
    /// Non-fatal errors from individual operations.
    pub failed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

struct Addition {
    pair: CoordPair,
    pre: SegmentId,
    post: SegmentId,
}

impl MutationLog {
    /// Bring the graph in line with the markers the viewer shows. All
    /// removals are applied before all additions, each through
    /// [`MutationLog::remove_synapse`] / [`MutationLog::add_synapse`] so every
    /// step is undoable.
    pub fn reconcile(&mut self, request: &ReconcileRequest, lookup: &dyn SegmentLookup) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut candidates: HashMap<CoordPair, VecDeque<SynapseId>> = HashMap::new();
        let mut pair_order: Vec<CoordPair> = Vec::new();
        let mut seen = BTreeSet::new();
        for &id in &request.current {
            if !seen.insert(id) {
                continue;
            }
            let pair = request.pairing.marker(self.index(), id)?;
            let slot = candidates.entry(pair).or_default();
            if slot.is_empty() {
                pair_order.push(pair);
            }
            slot.push_back(id);
        }
        let existing: HashMap<CoordPair, Vec<SynapseId>> =
            candidates.iter().map(|(pair, ids)| (*pair, ids.iter().copied().collect())).collect();

        let mut observed_count: HashMap<CoordPair, usize> = HashMap::new();
        let mut unmatched_observed = Vec::new();
        for pair in &request.observed {
            *observed_count.entry(*pair).or_default() += 1;
            match candidates.get_mut(pair).and_then(VecDeque::pop_front) {
                Some(_) => {}
                None => unmatched_observed.push(*pair),
            }
        }

        for pair in &pair_order {
            let ids = &existing[pair];
            let seen_count = observed_count.get(pair).copied().unwrap_or(0);
            if ids.len() > 1 || (seen_count > 1 && !ids.is_empty()) {
                let left = &candidates[pair];
                let kept = ids.iter().copied().filter(|id| !left.contains(id)).collect();
                let ambiguity = AmbiguousMatch {
                    pair: *pair,
                    candidates: ids.clone(),
                    observed: seen_count,
                    kept,
                };
                tracing::warn!(
                    "Ambiguous marker match at {} -> {}: {} synapses, {} markers, kept {:?}",
                    pair.pre,
                    pair.post,
                    ids.len(),
                    seen_count,
                    ambiguity.kept
                );
                report.ambiguous.push(ambiguity);
            }
        }

        let removals: Vec<SynapseId> = pair_order
            .iter()
            .flat_map(|pair| candidates[pair].iter().copied())
            .collect();

        let working: BTreeSet<SegmentId> = request.working_set.iter().copied().collect();
        let mut additions = Vec::new();
        for pair in unmatched_observed {
            let resolve = |c: Coord| lookup.segment_at(c.reversed()).filter(|&s| s != BACKGROUND);
            let (pre, post) = (resolve(pair.pre), resolve(pair.post));
            let reason = match (pre, post) {
                _ if request.pairing == PointPairing::Centroid => RejectReason::Unpaired,
                (Some(p), Some(q)) if working.contains(&p) || working.contains(&q) => {
                    additions.push(Addition { pair, pre: p, post: q });
                    continue;
                }
                (Some(_), Some(_)) => RejectReason::OutsideWorkingSet,
                _ => RejectReason::Unresolved,
            };
            tracing::warn!(
                "Rejected new marker {} -> {}: {:?} (resolved {:?} -> {:?})",
                pair.pre,
                pair.post,
                reason,
                pre,
                post
            );
            report.rejected.push(RejectedAddition { pair, pre, post, reason });
        }

        for id in removals {
            match self.remove_synapse(id) {
                Ok(record) => report.applied.push(AppliedOp::Remove {
                    id,
                    pre: record.pre,
                    post: record.post,
                }),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipped removal of {}: {}", id, e);
                    report.failed.push(e.to_string());
                }
            }
        }

        for addition in additions {
            match self.add_synapse(addition.pre, addition.post, addition.pair.pre, addition.pair.post) {
                Ok(id) => report.applied.push(AppliedOp::Add {
                    id,
                    pre: addition.pre,
                    post: addition.post,
                }),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipped addition {} -> {}: {}", addition.pre, addition.post, e);
                    report.failed.push(e.to_string());
                }
            }
        }

        tracing::info!(
            "Reconciled {} markers: {} operations, {} rejected, {} ambiguous",
            request.observed.len(),
            report.applied.len(),
            report.rejected.len(),
            report.ambiguous.len()
        );
        Ok(report)
    }
}
