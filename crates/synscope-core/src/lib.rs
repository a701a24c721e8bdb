//! Synscope Core: synapse graph model, cross-indices, edits, and view sync

pub mod config;
pub mod cursor;
pub mod edges;
pub mod error;
pub mod index;
pub mod labels;
pub mod model;
pub mod mutation;
pub mod query;
pub mod reconcile;
pub mod segment;
pub mod view_sync;


#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use cursor::SegmentCursor;
pub use edges::{load_segment_map, EdgeDialect, EdgeFormat, EdgeTable};
pub use error::{GraphError, Result};
pub use index::{GraphIndex, IndexStats};
pub use labels::{LabelFileFormat, LabelIndex};
pub use model::{
    Coord, CoordPair, Label, Role, Scope, SegmentId, SplitCentroids, Synapse, SynapseId, BACKGROUND, UNLABELED,
};
pub use mutation::{AppliedOp, MutationLog};
pub use query::{shared_pairwise, CategoryToggles, QueryEngine, SharedKind, SharedSet};
pub use reconcile::{
    AmbiguousMatch, NoSegmentation, PointPairing, ReconcileReport, ReconcileRequest, RejectReason, RejectedAddition,
    SegmentLookup, SparseVolume,
};
pub use segment::{RankedNeighbor, SegmentView};
pub use view_sync::{ViewSyncAdapter, ViewerState};
