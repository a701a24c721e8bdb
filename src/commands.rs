//! CLI command implementations

use std::path::Path;

use anyhow::Context;
use synscope_core::{
    load_segment_map, Config, EdgeTable, GraphIndex, LabelIndex, MutationLog, NoSegmentation, SparseVolume,
};
use synscope_server::{Controller, ServerConfig, SynscopeServer};

pub async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Synscope server on {}:{}", config.server.host, config.server.port);

    let index = load_index(&config)?;
    let controller = Controller::new(MutationLog::new(index), &config);
    let controller = match &config.segmentation.path {
        Some(path) => controller.with_lookup(SparseVolume::load(path)?),
        None => {
            tracing::warn!("No segmentation configured; viewer additions will be rejected");
            controller.with_lookup(NoSegmentation)
        }
    };

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    SynscopeServer::new(controller, server_config).start().await
}

pub fn stats(config: &Config) -> anyhow::Result<()> {
    let stats = load_index(config)?.stats();
    println!("synapses:          {}", stats.synapses);
    println!("segments:          {}", stats.segments);
    println!("connected pairs:   {}", stats.connected_pairs);
    println!("labeled segments:  {}", stats.labeled_segments);
    println!("labeled synapses:  {}", stats.labeled_synapses);
    Ok(())
}

pub fn check(config: &Config) -> anyhow::Result<()> {
    let index = load_index(config)?;
    index.check_invariants().context("index is inconsistent")?;
    tracing::info!("All invariants hold for {} synapses", index.synapse_count());
    println!("ok");
    Ok(())
}

pub fn remap(config: &Config, map: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let input = edges_input(config)?;
    let format = config.edges.format();
    let mut table = EdgeTable::load(input, &format)?;
    let mapping = load_segment_map(map)?;
    let rewritten = table.remap_segments(&mapping);

    // the remapped table must still build
    GraphIndex::build(table.records())?;

    let target = output
        .or(config.edges.output_path())
        .context("no output path for the remapped edge file")?;
    EdgeTable::save(target, table.records(), &format)?;
    tracing::info!("Remapped {} endpoints, wrote {}", rewritten, target.display());
    Ok(())
}

fn edges_input(config: &Config) -> anyhow::Result<&Path> {
    config
        .edges
        .input
        .as_deref()
        .context("no edge file given; pass --edges or set [edges] input")
}

/// Load the edge file and both label files into a fresh index.
fn load_index(config: &Config) -> anyhow::Result<GraphIndex> {
    let input = edges_input(config)?;
    let table = EdgeTable::load(input, &config.edges.format())?;
    let mut index = GraphIndex::build(table.records())?;

    let segments = match &config.labels.segments.path {
        Some(path) => LabelIndex::load(path, &config.labels.segment_format())?,
        None => LabelIndex::new(),
    };
    let synapses = match &config.labels.synapses.path {
        Some(path) => LabelIndex::load(path, &config.labels.synapse_format())?,
        None => LabelIndex::new(),
    };
    index.attach_labels(segments, synapses);

    let stats = index.stats();
    tracing::info!(
        "Indexed {} synapses across {} segments ({} connected pairs)",
        stats.synapses,
        stats.segments,
        stats.connected_pairs
    );
    Ok(index)
}
