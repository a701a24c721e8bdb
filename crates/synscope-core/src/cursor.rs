//! Next/previous navigation over all segment ids

use crate::index::GraphIndex;
use crate::model::SegmentId;

/// Position in the ascending list of segment ids. Stepping wraps at both
/// ends.
#[derive(Debug, Clone, Default)]
pub struct SegmentCursor {
    ids: Vec<SegmentId>,
    pos: Option<usize>,
}

impl SegmentCursor {
    pub fn new(index: &GraphIndex) -> Self {
        SegmentCursor {
            ids: index.segment_ids().into_iter().collect(),
            pos: None,
        }
    }

    /// Rebuild the id list after edits, staying on the current segment when
    /// it still exists.
    pub fn refresh(&mut self, index: &GraphIndex) {
        let current = self.current();
        self.ids = index.segment_ids().into_iter().collect();
        self.pos = None;
        if let Some(seg) = current {
            self.seek(seg);
        }
    }

    pub fn current(&self) -> Option<SegmentId> {
        self.pos.map(|p| self.ids[p])
    }

    /// Jump to `seg`. An unknown id leaves the cursor where it was.
    pub fn seek(&mut self, seg: SegmentId) -> bool {
        match self.ids.binary_search(&seg) {
            Ok(p) => {
                self.pos = Some(p);
                true
            }
            Err(_) => false,
        }
    }

    pub fn next(&mut self) -> Option<SegmentId> {
        if self.ids.is_empty() {
            return None;
        }
        let p = self.pos.map_or(0, |p| (p + 1) % self.ids.len());
        self.pos = Some(p);
        Some(self.ids[p])
    }

    pub fn prev(&mut self) -> Option<SegmentId> {
        if self.ids.is_empty() {
            return None;
        }
        let len = self.ids.len();
        let p = self.pos.map_or(len - 1, |p| (p + len - 1) % len);
        self.pos = Some(p);
        Some(self.ids[p])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
