//! Core data structures for the connectivity graph

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a synapse record. Allocated as `max existing + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SynapseId(pub u64);

/// Identifier of a reconstructed segment. Segments are never allocated;
/// they exist as long as some synapse or label row names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

/// Segment id that segmentation volumes use for unassigned voxels.
pub const BACKGROUND: SegmentId = SegmentId(0);

impl fmt::Display for SynapseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Small integer category code from an annotation file.
pub type Label = i64;

/// Label given to every id that the label source does not mention.
pub const UNLABELED: Label = -1;

/// A voxel coordinate in `x, y, z` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(from = "[i64; 3]", into = "[i64; 3]")]
pub struct Coord {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Coord {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Coord { x, y, z }
    }

    /// Same point with the axes in `z, y, x` order, the layout segmentation
    /// volumes are indexed by.
    pub fn reversed(self) -> [i64; 3] {
        [self.z, self.y, self.x]
    }

    pub fn translate(self, offset: Coord) -> Self {
        Coord::new(self.x + offset.x, self.y + offset.y, self.z + offset.z)
    }

    pub fn subtract(self, offset: Coord) -> Self {
        Coord::new(self.x - offset.x, self.y - offset.y, self.z - offset.z)
    }

    /// Elementwise mean of two points, rounded half away from zero.
    pub fn midpoint(a: Coord, b: Coord) -> Self {
        let mean = |p: i64, q: i64| {
            let sum = i128::from(p) + i128::from(q);
            let half = if sum >= 0 { (sum + 1) / 2 } else { (sum - 1) / 2 };
            // the mean of two i64 values is itself in range
            half as i64
        };
        Coord::new(mean(a.x, b.x), mean(a.y, b.y), mean(a.z, b.z))
    }
}

impl From<[i64; 3]> for Coord {
    fn from(v: [i64; 3]) -> Self {
        Coord::new(v[0], v[1], v[2])
    }
}

impl From<Coord> for [i64; 3] {
    fn from(c: Coord) -> Self {
        [c.x, c.y, c.z]
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// The (pre-centroid, post-centroid) pair that identifies a synapse marker
/// in the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordPair {
    pub pre: Coord,
    pub post: Coord,
}

impl CoordPair {
    pub fn new(pre: Coord, post: Coord) -> Self {
        CoordPair { pre, post }
    }

    /// A marker placed as a single point: both ends sit at the same voxel.
    pub fn point(c: Coord) -> Self {
        CoordPair { pre: c, post: c }
    }
}

/// Separate pre- and postsynaptic centroids, present only when the source
/// row carried them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCentroids {
    pub pre: Coord,
    pub post: Coord,
}

/// A directed synaptic edge between two segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: SynapseId,
    pub pre: SegmentId,
    pub post: SegmentId,
    pub centroid: Coord,
    /// Voxel count of the synaptic cleft; 0 for hand-placed edges.
    pub size: u64,
    pub split: Option<SplitCentroids>,
}

impl Synapse {
    pub fn pre_centroid(&self) -> Coord {
        self.split.map_or(self.centroid, |s| s.pre)
    }

    pub fn post_centroid(&self) -> Coord {
        self.split.map_or(self.centroid, |s| s.post)
    }

    pub fn coord_pair(&self) -> CoordPair {
        CoordPair::new(self.pre_centroid(), self.post_centroid())
    }

    /// The endpoint on the other side of `seg`, if `seg` is an endpoint.
    pub fn partner_of(&self, seg: SegmentId) -> Option<SegmentId> {
        if self.pre == seg {
            Some(self.post)
        } else if self.post == seg {
            Some(self.pre)
        } else {
            None
        }
    }
}

/// Which side of a synapse a segment sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Pre,
    Post,
}

/// Selection mode for working-set queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Elements where a working segment is presynaptic.
    Pre,
    /// Elements where a working segment is postsynaptic.
    Post,
    /// Elements common to at least two working segments.
    Shared,
    /// Everything touching any working segment.
    #[default]
    All,
}
