//! Mapping query results onto the viewer's JSON state and back
//!
//! The viewer exchanges full-state JSON snapshots. Only three paths are
//! read or written; every other key is carried through untouched:
//!
//! - `layers.segmentation.segments`: selected segment ids
//! - `layers.synapses.points`: synapse marker coordinates
//! - `navigation.pose.position.voxelCoordinates`: camera position

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::index::GraphIndex;
use crate::model::{Coord, CoordPair, SegmentId, SynapseId};
use crate::reconcile::PointPairing;

pub const SEGMENTATION_LAYER: &str = "segmentation";
pub const SYNAPSE_LAYER: &str = "synapses";

/// A viewer state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerState(Value);

impl Default for ViewerState {
    fn default() -> Self {
        ViewerState(json!({
            "layers": {
                "segmentation": { "segments": [] },
                "synapses": { "points": [] },
            },
            "navigation": { "pose": { "position": { "voxelCoordinates": [0, 0, 0] } } },
        }))
    }
}

impl ViewerState {
    pub fn new(value: Value) -> Self {
        ViewerState(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Layers come either as an object keyed by name or as an array of
    /// objects with a `name` field.
    fn layer(&self, name: &str) -> Option<&Value> {
        match self.0.get("layers")? {
            Value::Object(map) => map.get(name),
            Value::Array(list) => list.iter().find(|l| l.get("name").and_then(Value::as_str) == Some(name)),
            _ => None,
        }
    }

    fn layer_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let root = object(&mut self.0);
        let layers = root.entry("layers").or_insert_with(|| json!({}));
        let layer = match layers {
            Value::Array(list) => {
                let pos = list
                    .iter()
                    .position(|l| l.get("name").and_then(Value::as_str) == Some(name));
                match pos {
                    Some(p) => &mut list[p],
                    None => {
                        list.push(json!({ "name": name }));
                        let last = list.len() - 1;
                        &mut list[last]
                    }
                }
            }
            other => object(other).entry(name).or_insert_with(|| json!({})),
        };
        object(layer)
    }

    /// Selected segment ids. Ids may be numbers or numeric strings; anything
    /// else is skipped.
    pub fn segments(&self) -> Vec<SegmentId> {
        let Some(list) = self.layer(SEGMENTATION_LAYER).and_then(|l| l.get("segments")).and_then(Value::as_array)
        else {
            return Vec::new();
        };
        list.iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .map(SegmentId)
            .collect()
    }

    pub fn set_segments(&mut self, segments: &[SegmentId]) {
        let ids: Vec<Value> = segments.iter().map(|s| json!(s.0)).collect();
        self.layer_mut(SEGMENTATION_LAYER).insert("segments".into(), Value::Array(ids));
    }

    /// Marker coordinates, rounded to the nearest voxel.
    pub fn points(&self) -> Vec<Coord> {
        let Some(list) = self.layer(SYNAPSE_LAYER).and_then(|l| l.get("points")).and_then(Value::as_array) else {
            return Vec::new();
        };
        list.iter().filter_map(parse_coord).collect()
    }

    pub fn set_points(&mut self, points: &[Coord]) {
        let list: Vec<Value> = points.iter().map(|c| json!([c.x, c.y, c.z])).collect();
        self.layer_mut(SYNAPSE_LAYER).insert("points".into(), Value::Array(list));
    }

    pub fn voxel_coordinates(&self) -> Option<Coord> {
        self.0
            .pointer("/navigation/pose/position/voxelCoordinates")
            .and_then(parse_coord)
    }

    pub fn set_voxel_coordinates(&mut self, c: Coord) {
        let root = object(&mut self.0);
        let mut node = root.entry("navigation").or_insert_with(|| json!({}));
        for key in ["pose", "position"] {
            node = object(node).entry(key).or_insert_with(|| json!({}));
        }
        object(node).insert("voxelCoordinates".into(), json!([c.x, c.y, c.z]));
    }
}

/// Replace a non-object value with an empty object and borrow it as a map.
fn object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

fn parse_coord(v: &Value) -> Option<Coord> {
    let list = v.as_array()?;
    if list.len() < 3 {
        return None;
    }
    let mut out = [0i64; 3];
    for (slot, v) in out.iter_mut().zip(list) {
        *slot = v.as_f64()?.round() as i64;
    }
    Some(Coord::from(out))
}

/// Writes query results into viewer state and reads edits back out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewSyncAdapter {
    /// Append to the current selection instead of replacing it.
    pub hold_on: bool,
    pub pairing: PointPairing,
}

impl ViewSyncAdapter {
    pub fn new(pairing: PointPairing, hold_on: bool) -> Self {
        ViewSyncAdapter { hold_on, pairing }
    }

    /// Viewer points for `synapses`, in ascending id order.
    pub fn points_for(&self, index: &GraphIndex, synapses: &BTreeSet<SynapseId>) -> Result<Vec<Coord>> {
        let pairs = synapses
            .iter()
            .map(|&s| self.pairing.marker(index, s))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.pairing.points(&pairs))
    }

    /// Show `segments` and `points`. Under hold-on, entries already shown are
    /// kept and only new ones are appended.
    pub fn render(&self, state: &mut ViewerState, segments: &[SegmentId], points: &[Coord]) {
        if self.hold_on {
            let mut segs = state.segments();
            for s in segments {
                if !segs.contains(s) {
                    segs.push(*s);
                }
            }
            let mut pts = state.points();
            let shown: Vec<CoordPair> = self.pairing.pairs(&pts);
            for pair in self.pairing.pairs(points) {
                if !shown.contains(&pair) {
                    pts.extend(self.pairing.points(&[pair]));
                }
            }
            state.set_segments(&segs);
            state.set_points(&pts);
        } else {
            state.set_segments(segments);
            state.set_points(points);
        }
    }

    /// Marker pairs the viewer currently shows, aligned against the markers
    /// it was `expected` to show.
    pub fn observed_pairs(&self, state: &ViewerState, expected: &[CoordPair]) -> Result<Vec<CoordPair>> {
        self.pairing.align(&state.points(), expected)
    }

    /// Segments the user is focused on.
    pub fn focus(&self, state: &ViewerState) -> Vec<SegmentId> {
        state.segments()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_index;

    #[test]
    fn test_reads_numeric_and_string_segments() {
        let state = ViewerState::new(json!({
            "layers": { "segmentation": { "segments": [10, "20", "x"] } }
        }));
        assert_eq!(state.segments(), vec![SegmentId(10), SegmentId(20)]);
    }

    #[test]
    fn test_points_are_rounded() {
        let state = ViewerState::new(json!({
            "layers": [{ "name": "synapses", "points": [[1.4, 2.5, -0.6], [3, 3]] }]
        }));
        assert_eq!(state.points(), vec![Coord::new(1, 3, -1)]);
    }

    #[test]
    fn test_writes_preserve_other_keys() {
        let mut state = ViewerState::new(json!({ "layout": "4panel", "layers": { "image": { "source": "x" } } }));
        state.set_segments(&[SegmentId(5)]);
        state.set_voxel_coordinates(Coord::new(1, 2, 3));

        let v = state.as_value();
        assert_eq!(v["layout"], "4panel");
        assert_eq!(v["layers"]["image"]["source"], "x");
        assert_eq!(v["layers"]["segmentation"]["segments"], json!([5]));
        assert_eq!(state.voxel_coordinates(), Some(Coord::new(1, 2, 3)));
    }

    #[test]
    fn test_render_replaces_or_accumulates() {
        let mut state = ViewerState::default();
        let mut adapter = ViewSyncAdapter::new(PointPairing::Centroid, false);
        adapter.render(&mut state, &[SegmentId(1)], &[Coord::new(0, 0, 0)]);
        adapter.render(&mut state, &[SegmentId(2)], &[Coord::new(1, 1, 1)]);
        assert_eq!(state.segments(), vec![SegmentId(2)]);

        adapter.hold_on = true;
        adapter.render(&mut state, &[SegmentId(3), SegmentId(2)], &[Coord::new(1, 1, 1), Coord::new(2, 2, 2)]);
        assert_eq!(state.segments(), vec![SegmentId(2), SegmentId(3)]);
        assert_eq!(state.points(), vec![Coord::new(1, 1, 1), Coord::new(2, 2, 2)]);
    }

    #[test]
    fn test_pre_post_points_for_synapses() {
        let adapter = ViewSyncAdapter::new(PointPairing::PrePost, false);
        let points = adapter
            .points_for(&sample_index(), &BTreeSet::from([SynapseId(1), SynapseId(2)]))
            .unwrap();
        assert_eq!(points.len(), 4);

        let mut state = ViewerState::default();
        adapter.render(&mut state, &[SegmentId(20)], &points);
        assert_eq!(adapter.observed_pairs(&state, &[]).unwrap(), vec![
            CoordPair::point(Coord::new(0, 0, 0)),
            CoordPair::point(Coord::new(1, 1, 1)),
        ]);

        state.set_points(&points[..3]);
        assert!(matches!(
            adapter.observed_pairs(&state, &[]),
            Err(crate::error::GraphError::IncompleteMarkers(3))
        ));
    }
}
