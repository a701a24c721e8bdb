//! Integration tests for Synscope
//!
//! These tests drive the core library and the controller together, from
//! files on disk to published viewer snapshots.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use synscope_core::{
    Config, Coord, EdgeTable, GraphIndex, LabelIndex, MutationLog, PointPairing, Scope, SegmentId, SparseVolume,
    SynapseId, ViewerState,
};
use synscope_server::{Command, Controller, ControllerEvent, Reply, ServerState};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio_test::assert_ok;

const EDGES: &str = "\
100,2,1,10,0,0,5
101,3,1,11,0,0,6
102,1,4,12,0,0,7
103,5,6,40,0,0,8
";

struct Workspace {
    dir: TempDir,
    config: Config,
}

/// Edge, label and segmentation files in a temp dir with a config that
/// points at them.
fn workspace() -> Workspace {
    let dir = TempDir::new().unwrap();
    let edges = dir.path().join("edges.csv");
    let segs = dir.path().join("segs.tsv");
    let syns = dir.path().join("syn.csv");
    let volume = dir.path().join("volume.csv");
    std::fs::write(&edges, EDGES).unwrap();
    std::fs::write(&segs, "x\t2\t1\nx\t3\t2\nx\t4\t1\n").unwrap();
    std::fs::write(&syns, "100,0\n101,1\n102,0\n").unwrap();
    // z,y,x rows: (20,0,0) lies in segment 1 and (21,0,0) in segment 7
    std::fs::write(&volume, "0,0,20,1\n0,0,21,7\n").unwrap();

    let text = format!(
        r#"
        [edges]
        input = "{}"

        [labels.segments]
        path = "{}"

        [labels.synapses]
        path = "{}"

        [segmentation]
        path = "{}"

        [view]
        pairing = "pre_post"
        "#,
        edges.display(),
        segs.display(),
        syns.display(),
        volume.display()
    );
    let config = Config::parse(&text).unwrap();
    Workspace { dir, config }
}

fn load(config: &Config) -> GraphIndex {
    let table = EdgeTable::load(config.edges.input.as_deref().unwrap(), &config.edges.format()).unwrap();
    let mut index = GraphIndex::build(table.records()).unwrap();
    let segs = LabelIndex::load(
        config.labels.segments.path.as_deref().unwrap(),
        &config.labels.segment_format(),
    )
    .unwrap();
    let syns = LabelIndex::load(
        config.labels.synapses.path.as_deref().unwrap(),
        &config.labels.synapse_format(),
    )
    .unwrap();
    index.attach_labels(segs, syns);
    index
}

fn controller(ws: &Workspace) -> Controller {
    let volume = SparseVolume::load(ws.config.segmentation.path.as_deref().unwrap()).unwrap();
    Controller::new(MutationLog::new(load(&ws.config)), &ws.config).with_lookup(volume)
}

fn viewer(segments: &[u64]) -> ViewerState {
    ViewerState::new(json!({
        "layers": {
            "segmentation": { "segments": segments },
            "synapses": { "points": [] },
        }
    }))
}

/// Files on disk load into a consistent index with labels attached.
#[test]
fn test_load_from_config() {
    let ws = workspace();
    let index = load(&ws.config);

    index.check_invariants().unwrap();
    assert_eq!(index.synapse_count(), 4);
    assert_eq!(index.segment_label(SegmentId(3)), 2);
    assert_eq!(index.segment_label(SegmentId(6)), -1);
    assert_eq!(index.synapse_label(SynapseId(103)), -1);
    assert_eq!(ws.config.view.pairing, PointPairing::PrePost);
}

/// Select a segment, draw a new pre/post marker pair in the viewer, save,
/// and reload the saved file.
#[test]
fn test_edit_save_reload() {
    let ws = workspace();
    let mut c = controller(&ws);

    c.on_viewer_state(viewer(&[])).unwrap();
    let shown = c.on_viewer_state(viewer(&[1])).unwrap().unwrap();
    assert_eq!(c.displayed(), &BTreeSet::from([SynapseId(100), SynapseId(101), SynapseId(102)]));

    // append a pair from segment 1 at (20,0,0) to segment 7 at (21,0,0)
    let mut points = shown.points();
    points.extend([Coord::new(20, 0, 0), Coord::new(21, 0, 0)]);
    let mut edited = shown.clone();
    edited.set_points(&points);
    c.on_viewer_state(edited).unwrap();

    let added = SynapseId(104);
    assert_eq!(c.log().index().segments_of_synapse(added).unwrap(), (SegmentId(1), SegmentId(7)));
    c.log().index().check_invariants().unwrap();

    let (reply, _) = c.apply(Command::Save).unwrap();
    assert!(matches!(reply, Reply::Saved { .. }));

    let reloaded = load(&ws.config);
    assert_eq!(reloaded.synapse_count(), 5);
    assert_eq!(reloaded.centroid(added).unwrap(), Coord::new(21, 0, 0));
    assert!(ws.dir.path().join("edges.csv").exists());
}

/// A marker drawn on a segment outside the working set is not added.
#[test]
fn test_stray_marker_rejected() {
    let ws = workspace();
    let mut c = controller(&ws);
    c.on_viewer_state(viewer(&[])).unwrap();
    let shown = c.on_viewer_state(viewer(&[4])).unwrap().unwrap();

    // (21,0,0) is segment 7 on both ends, unrelated to segment 4
    let mut points = shown.points();
    points.extend([Coord::new(21, 0, 0), Coord::new(21, 0, 0)]);
    let mut edited = shown.clone();
    edited.set_points(&points);
    c.on_viewer_state(edited).unwrap();

    assert_eq!(c.log().index().synapse_count(), 4);
    assert!(c.apply(Command::Undo).is_err());
}

/// Scope and label toggles reach the published markers.
#[test]
fn test_scope_and_toggles() {
    let ws = workspace();
    let mut c = controller(&ws);
    c.on_viewer_state(viewer(&[])).unwrap();
    c.on_viewer_state(viewer(&[1])).unwrap();

    let (_, state) = c.apply(Command::SetScope { scope: Scope::Pre }).unwrap();
    assert!(state.is_some());
    assert_eq!(c.displayed(), &BTreeSet::from([SynapseId(102)]));

    c.apply(Command::SetScope { scope: Scope::All }).unwrap();
    c.apply(Command::ToggleSynapseLabel { label: 1 }).unwrap();
    assert!(!c.displayed().contains(&SynapseId(101)));
}

/// Events sent through the server state reach the controller task, and
/// its snapshots come back on the session broadcast.
#[tokio::test]
async fn test_controller_task_round_trip() {
    let ws = workspace();
    let (state, rx) = ServerState::new();
    let mut updates = state.session.subscribe();
    let task = tokio::spawn(controller(&ws).run(Arc::clone(&state.session), rx));

    state.events.send(ControllerEvent::Viewer(viewer(&[]))).await.unwrap();
    let (tx, reply) = oneshot::channel();
    state
        .events
        .send(ControllerEvent::Command {
            command: Command::SelectSegment { id: SegmentId(1) },
            reply: tx,
        })
        .await
        .unwrap();
    assert!(matches!(reply.await.unwrap().unwrap(), Reply::Selected { .. }));

    let published: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
    assert_eq!(published["layers"]["synapses"]["points"].as_array().unwrap().len(), 6);

    drop(state);
    assert_ok!(assert_ok!(task.await));
}
