//! The controller task: sole owner of the graph
//!
//! Viewer snapshots (from the WebSocket tasks) and commands (from the HTTP
//! API) arrive as [`ControllerEvent`]s on one channel and are handled one at
//! a time. A new snapshot is published only after the whole batch of graph
//! operations behind it has been applied.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use synscope_core::{
    AppliedOp, CategoryToggles, Config, Coord, EdgeFormat, GraphError, IndexStats, Label, MutationLog, NoSegmentation,
    QueryEngine, RankedNeighbor, ReconcileReport, ReconcileRequest, Scope, SegmentCursor, SegmentId, SegmentLookup,
    SegmentView, SynapseId, ViewSyncAdapter, ViewerState,
};

use crate::session::Session;

/// A request from the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SelectSegment { id: SegmentId },
    NextSegment,
    PrevSegment,
    /// Show or hide partner segments of the displayed synapses.
    ToggleSegments,
    /// Show or hide synapse markers.
    ToggleSynapses,
    ToggleSynapseLabel { label: Label },
    ToggleNeighborLabel { label: Label },
    SetScope { scope: Scope },
    SetHoldOn { on: bool },
    /// Re-read the selected segments from the latest viewer state.
    SyncSegments,
    /// Reconcile the latest viewer markers now, even with live sync off.
    SyncSynapses,
    Undo,
    Save,
    ClassifySynapse { id: SynapseId, label: Label },
    GotoSynapse { id: SynapseId },
}

/// Result of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Selected {
        segments: Vec<SegmentId>,
        synapses: usize,
    },
    Toggled {
        enabled: bool,
    },
    Updated,
    Reconciled {
        report: ReconcileReport,
    },
    Undone {
        op: AppliedOp,
    },
    Saved {
        paths: Vec<PathBuf>,
    },
    Classified {
        id: SynapseId,
        previous: Label,
    },
    Moved {
        position: Coord,
    },
}

/// Segment details served by `GET /api/segments/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    #[serde(flatten)]
    pub view: SegmentView,
    pub ranked_neighbors: Vec<RankedNeighbor>,
}

pub type Responder<T> = oneshot::Sender<Result<T, GraphError>>;

pub enum ControllerEvent {
    /// A full-state snapshot from a viewer.
    Viewer(ViewerState),
    Command {
        command: Command,
        reply: Responder<Reply>,
    },
    Segment {
        id: SegmentId,
        reply: Responder<SegmentSummary>,
    },
    Stats {
        reply: oneshot::Sender<IndexStats>,
    },
}

/// Where `save` writes.
#[derive(Debug, Clone, Default)]
pub struct SaveTargets {
    pub edges: Option<PathBuf>,
    pub format: EdgeFormat,
    pub synapse_labels: Option<(PathBuf, char)>,
}

impl SaveTargets {
    pub fn from_config(config: &Config) -> Self {
        SaveTargets {
            edges: config.edges.output_path().map(PathBuf::from),
            format: config.edges.format(),
            synapse_labels: config
                .labels
                .synapses
                .path
                .clone()
                .map(|p| (p, config.labels.synapse_format().delimiter)),
        }
    }
}

/// What the controller acts on after handling an event.
type Outcome<T> = Result<(T, Option<ViewerState>), GraphError>;

pub struct Controller {
    log: MutationLog,
    lookup: Box<dyn SegmentLookup + Send>,
    adapter: ViewSyncAdapter,
    toggles: CategoryToggles,
    scope: Scope,
    cursor: SegmentCursor,
    /// Segments the user is editing, as last selected.
    working_set: Vec<SegmentId>,
    /// Synapses whose markers the viewer was last given.
    displayed: BTreeSet<SynapseId>,
    /// Partner segments added to the viewer's selection by the last render.
    partners: BTreeSet<SegmentId>,
    show_segments: bool,
    show_synapses: bool,
    live_sync: bool,
    targets: SaveTargets,
    last_state: Option<ViewerState>,
}

impl Controller {
    pub fn new(log: MutationLog, config: &Config) -> Self {
        let cursor = SegmentCursor::new(log.index());
        Controller {
            log,
            lookup: Box::new(NoSegmentation),
            adapter: config.view.adapter(),
            toggles: config.view.toggles(),
            scope: config.view.scope,
            cursor,
            working_set: Vec::new(),
            displayed: BTreeSet::new(),
            partners: BTreeSet::new(),
            show_segments: true,
            show_synapses: true,
            live_sync: config.view.live_sync,
            targets: SaveTargets::from_config(config),
            last_state: None,
        }
    }

    pub fn with_lookup(mut self, lookup: impl SegmentLookup + Send + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    pub fn working_set(&self) -> &[SegmentId] {
        &self.working_set
    }

    pub fn displayed(&self) -> &BTreeSet<SynapseId> {
        &self.displayed
    }

    /// Handle events until every sender is gone. A fatal graph error stops
    /// the loop.
    pub async fn run(mut self, session: Arc<Session>, mut rx: mpsc::Receiver<ControllerEvent>) -> anyhow::Result<()> {
        info!("Controller started");
        while let Some(event) = rx.recv().await {
            let publish = match event {
                ControllerEvent::Viewer(state) => match self.on_viewer_state(state) {
                    Ok(next) => next,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!("Viewer update not applied: {}", e);
                        None
                    }
                },
                ControllerEvent::Command { command, reply } => {
                    debug!("Command: {:?}", command);
                    let (result, next) = match self.apply(command) {
                        Ok((r, next)) => (Ok(r), next),
                        Err(e) => (Err(e), None),
                    };
                    let fatal = result.as_ref().err().filter(|e| e.is_fatal()).map(|e| e.to_string());
                    let _ = reply.send(result);
                    if let Some(msg) = fatal {
                        error!("Stopping controller: {}", msg);
                        anyhow::bail!(msg);
                    }
                    next
                }
                ControllerEvent::Segment { id, reply } => {
                    let _ = reply.send(self.segment_summary(id));
                    None
                }
                ControllerEvent::Stats { reply } => {
                    let _ = reply.send(self.log.index().stats());
                    None
                }
            };
            if let Some(state) = publish {
                session.publish(state).await?;
            }
        }
        info!("Controller stopped");
        Ok(())
    }

    /// Handle a viewer snapshot. The first snapshot only initializes the
    /// session; later ones re-query on a changed selection or reconcile on
    /// changed markers. Returns the snapshot to publish, if any.
    pub fn on_viewer_state(&mut self, state: ViewerState) -> Result<Option<ViewerState>, GraphError> {
        let Some(previous) = self.last_state.take() else {
            info!("Viewer session initialized");
            self.working_set = self.adapter.focus(&state);
            if let Some(&first) = self.working_set.first() {
                self.cursor.seek(first);
            }
            self.last_state = Some(state);
            return Ok(None);
        };

        let focus = self.adapter.focus(&state);
        if focus != self.adapter.focus(&previous) {
            debug!("Selection changed to {:?}", focus);
            self.working_set = self.without_partners(focus);
            let mut state = state;
            self.refresh(&mut state)?;
            self.last_state = Some(state.clone());
            return Ok(Some(state));
        }

        let markers_changed = state.points() != previous.points();
        self.last_state = Some(state.clone());
        if markers_changed && self.live_sync {
            let report = self.reconcile(&state)?;
            if !report.is_noop() {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    pub fn apply(&mut self, command: Command) -> Outcome<Reply> {
        match command {
            Command::SelectSegment { id } => self.select(id),
            Command::NextSegment => match self.cursor.next() {
                Some(id) => self.select(id),
                None => Err(GraphError::SegmentNotFound(SegmentId(0))),
            },
            Command::PrevSegment => match self.cursor.prev() {
                Some(id) => self.select(id),
                None => Err(GraphError::SegmentNotFound(SegmentId(0))),
            },
            Command::ToggleSegments => {
                self.show_segments = !self.show_segments;
                let enabled = self.show_segments;
                self.rerender(Reply::Toggled { enabled })
            }
            Command::ToggleSynapses => {
                self.show_synapses = !self.show_synapses;
                let enabled = self.show_synapses;
                self.rerender(Reply::Toggled { enabled })
            }
            Command::ToggleSynapseLabel { label } => {
                let enabled = self.toggles.toggle_synapse_label(label);
                self.rerender(Reply::Toggled { enabled })
            }
            Command::ToggleNeighborLabel { label } => {
                let enabled = self.toggles.toggle_neighbor_label(label);
                self.rerender(Reply::Toggled { enabled })
            }
            Command::SetScope { scope } => {
                self.scope = scope;
                self.rerender(Reply::Updated)
            }
            Command::SetHoldOn { on } => {
                self.adapter.hold_on = on;
                Ok((Reply::Toggled { enabled: on }, None))
            }
            Command::SyncSegments => {
                let mut state = self.last_state.clone().unwrap_or_default();
                self.working_set = self.without_partners(self.adapter.focus(&state));
                let synapses = self.refresh(&mut state)?;
                self.last_state = Some(state.clone());
                let reply = Reply::Selected {
                    segments: self.working_set.clone(),
                    synapses,
                };
                Ok((reply, Some(state)))
            }
            Command::SyncSynapses => {
                let state = self.last_state.clone().unwrap_or_default();
                let report = self.reconcile(&state)?;
                let publish = (!report.is_noop()).then_some(state);
                Ok((Reply::Reconciled { report }, publish))
            }
            Command::Undo => {
                let op = self.log.undo()?;
                match op {
                    AppliedOp::Add { id, .. } => {
                        self.displayed.insert(id);
                    }
                    AppliedOp::Remove { id, .. } => {
                        self.displayed.remove(&id);
                    }
                }
                self.cursor.refresh(self.log.index());
                self.rerender(Reply::Undone { op })
            }
            Command::Save => self.save().map(|paths| (Reply::Saved { paths }, None)),
            Command::ClassifySynapse { id, label } => {
                let previous = self.log.classify_synapse(id, label)?;
                self.rerender(Reply::Classified { id, previous })
            }
            Command::GotoSynapse { id } => {
                let position = self.log.index().centroid(id)?;
                let mut state = self.last_state.clone().unwrap_or_default();
                state.set_voxel_coordinates(position);
                self.last_state = Some(state.clone());
                Ok((Reply::Moved { position }, Some(state)))
            }
        }
    }

    pub fn segment_summary(&self, id: SegmentId) -> Result<SegmentSummary, GraphError> {
        let view = SegmentView::build(self.log.index(), id)?;
        let ranked_neighbors = view.neighbors_with_rank(self.log.index())?;
        Ok(SegmentSummary { view, ranked_neighbors })
    }

    fn without_partners(&self, focus: Vec<SegmentId>) -> Vec<SegmentId> {
        focus.into_iter().filter(|s| !self.partners.contains(s)).collect()
    }

    fn select(&mut self, id: SegmentId) -> Outcome<Reply> {
        if !self.log.index().contains_segment(id) {
            return Err(GraphError::SegmentNotFound(id));
        }
        self.cursor.seek(id);
        if self.adapter.hold_on {
            if !self.working_set.contains(&id) {
                self.working_set.push(id);
            }
        } else {
            self.working_set = vec![id];
        }
        let mut state = self.last_state.clone().unwrap_or_default();
        let synapses = self.refresh(&mut state)?;
        self.last_state = Some(state.clone());
        let reply = Reply::Selected {
            segments: self.working_set.clone(),
            synapses,
        };
        Ok((reply, Some(state)))
    }

    fn rerender(&mut self, reply: Reply) -> Outcome<Reply> {
        let mut state = self.last_state.clone().unwrap_or_default();
        self.refresh(&mut state)?;
        self.last_state = Some(state.clone());
        Ok((reply, Some(state)))
    }

    /// Run the display query for the working set and write it into `state`.
    /// Returns how many synapses are shown.
    fn refresh(&mut self, state: &mut ViewerState) -> Result<usize, GraphError> {
        let index = self.log.index();
        let known: Vec<SegmentId> = self
            .working_set
            .iter()
            .copied()
            .filter(|&s| {
                let found = index.contains_segment(s);
                if !found {
                    warn!("Segment {} is not in the graph", s);
                }
                found
            })
            .collect();

        let engine = QueryEngine::new(index, &known).with_scope(self.scope);
        let synapses = if self.show_synapses {
            self.toggles.compose(&engine)?
        } else {
            BTreeSet::new()
        };

        let mut segments = self.working_set.clone();
        let mut partners = BTreeSet::new();
        if self.show_segments {
            for partner in engine.partner_segments(&synapses)? {
                if !segments.contains(&partner) {
                    segments.push(partner);
                    partners.insert(partner);
                }
            }
        }
        let points = self.adapter.points_for(index, &synapses)?;
        self.adapter.render(state, &segments, &points);

        let shown = synapses.len();
        if self.adapter.hold_on {
            self.displayed.extend(synapses);
            self.partners.extend(partners);
        } else {
            self.displayed = synapses;
            self.partners = partners;
        }
        Ok(shown)
    }

    /// Reconcile the markers in `state` against the synapses last displayed.
    /// The viewer already shows the result, so nothing is re-rendered.
    fn reconcile(&mut self, state: &ViewerState) -> Result<ReconcileReport, GraphError> {
        let current: Vec<SynapseId> = self.displayed.iter().copied().collect();
        let expected = current
            .iter()
            .map(|&id| self.adapter.pairing.marker(self.log.index(), id))
            .collect::<Result<Vec<_>, _>>()?;
        let request = ReconcileRequest {
            working_set: self.working_set.clone(),
            current,
            observed: self.adapter.observed_pairs(state, &expected)?,
            pairing: self.adapter.pairing,
        };
        let report = self.log.reconcile(&request, self.lookup.as_ref())?;
        for op in &report.applied {
            match *op {
                AppliedOp::Add { id, .. } => {
                    self.displayed.insert(id);
                }
                AppliedOp::Remove { id, .. } => {
                    self.displayed.remove(&id);
                }
            }
        }
        if !report.is_noop() {
            self.cursor.refresh(self.log.index());
        }
        Ok(report)
    }

    fn save(&self) -> Result<Vec<PathBuf>, GraphError> {
        let mut paths = Vec::new();
        match &self.targets.edges {
            Some(path) => {
                self.log.save(path, &self.targets.format)?;
                paths.push(path.clone());
            }
            None => warn!("No edge output configured; nothing saved"),
        }
        if let Some((path, delimiter)) = &self.targets.synapse_labels {
            self.log.save_synapse_labels(path, *delimiter)?;
            paths.push(path.clone());
        }
        Ok(paths)
    }
}
