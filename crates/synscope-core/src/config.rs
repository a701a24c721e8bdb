//! `synscope.toml` configuration
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::edges::{EdgeDialect, EdgeFormat};
use crate::error::{GraphError, Result};
use crate::labels::LabelFileFormat;
use crate::model::{Coord, Label, Scope};
use crate::query::CategoryToggles;
use crate::reconcile::PointPairing;
use crate::view_sync::ViewSyncAdapter;

/// File name looked up in the working directory when no path is given.
pub const CONFIG_FILE: &str = "synscope.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub edges: EdgesConfig,
    pub labels: LabelsConfig,
    pub segmentation: SegmentationConfig,
    pub server: ServerSection,
    pub view: ViewConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgesConfig {
    pub input: Option<PathBuf>,
    /// Where `save` writes; the input file when unset.
    pub output: Option<PathBuf>,
    pub dialect: EdgeDialect,
    pub delimiter: char,
    pub offset: Option<[i64; 3]>,
}

impl Default for EdgesConfig {
    fn default() -> Self {
        EdgesConfig {
            input: None,
            output: None,
            dialect: EdgeDialect::Auto,
            delimiter: ',',
            offset: None,
        }
    }
}

impl EdgesConfig {
    pub fn format(&self) -> EdgeFormat {
        EdgeFormat {
            dialect: self.dialect,
            delimiter: self.delimiter,
            offset: self.offset.map(Coord::from),
        }
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref().or(self.input.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub segments: LabelSource,
    pub synapses: LabelSource,
}

impl LabelsConfig {
    pub fn segment_format(&self) -> LabelFileFormat {
        self.segments.format(LabelFileFormat::segments())
    }

    pub fn synapse_format(&self) -> LabelFileFormat {
        self.synapses.format(LabelFileFormat::synapses())
    }
}

/// A label file. Unset layout fields fall back to the usual layout for
/// segment or synapse labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelSource {
    pub path: Option<PathBuf>,
    pub delimiter: Option<char>,
    pub id_col: Option<usize>,
    pub label_col: Option<usize>,
}

impl LabelSource {
    fn format(&self, base: LabelFileFormat) -> LabelFileFormat {
        LabelFileFormat {
            delimiter: self.delimiter.unwrap_or(base.delimiter),
            id_col: self.id_col.unwrap_or(base.id_col),
            label_col: self.label_col.unwrap_or(base.label_col),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Sparse `z,y,x,segment` voxel table.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            host: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub pairing: PointPairing,
    pub hold_on: bool,
    pub scope: Scope,
    pub synapse_labels: Vec<Label>,
    pub neighbor_labels: Vec<Label>,
    /// Reconcile point edits from the viewer as they arrive.
    pub live_sync: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            pairing: PointPairing::default(),
            hold_on: false,
            scope: Scope::All,
            synapse_labels: vec![0, 1],
            neighbor_labels: vec![1, 2, 3, 4],
            live_sync: true,
        }
    }
}

impl ViewConfig {
    pub fn toggles(&self) -> CategoryToggles {
        CategoryToggles::new(self.synapse_labels.iter().copied(), self.neighbor_labels.iter().copied())
    }

    pub fn adapter(&self) -> ViewSyncAdapter {
        ViewSyncAdapter::new(self.pairing, self.hold_on)
    }
}

impl Config {
    /// Load from an explicit path, or from [`CONFIG_FILE`] if it exists in
    /// the working directory, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE)),
            None => Ok(Config::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
        let config = Self::parse(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(self.edges.delimiter, '(' | ')' | '[' | ']') {
            return Err(GraphError::Config(format!(
                "edges.delimiter `{}` collides with tuple brackets",
                self.edges.delimiter
            )));
        }
        for (name, fmt) in [
            ("labels.segments", self.labels.segment_format()),
            ("labels.synapses", self.labels.synapse_format()),
        ] {
            if fmt.id_col == fmt.label_col {
                return Err(GraphError::Config(format!("{name}: id_col and label_col are both {}", fmt.id_col)));
            }
        }
        if self.server.port == 0 {
            return Err(GraphError::Config("server.port must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_full_file() {
        let config = Config::parse(
            r#"
            [edges]
            input = "edges.csv"
            dialect = "structured"
            offset = [10, 20, 30]

            [labels.segments]
            path = "segs.tsv"

            [labels.synapses]
            path = "syn.csv"
            delimiter = "\t"

            [server]
            port = 8123

            [view]
            pairing = "centroid"
            scope = "shared"
            neighbor_labels = [1, 2]
            live_sync = false
            "#,
        )
        .unwrap();

        assert_eq!(config.edges.format().offset, Some(Coord::new(10, 20, 30)));
        assert_eq!(config.edges.output_path(), Some(Path::new("edges.csv")));
        assert_eq!(config.labels.segment_format(), LabelFileFormat::segments());
        assert_eq!(config.labels.synapse_format().delimiter, '\t');
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.view.pairing, PointPairing::Centroid);
        assert_eq!(config.view.toggles().neighbor_labels.len(), 2);
        assert!(!config.view.live_sync);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(Config::parse("[server]\nport = 0\n"), Err(GraphError::Config(_))));
        assert!(matches!(Config::parse("[labels.synapses]\nlabel_col = 0\n"), Err(GraphError::Config(_))));
        assert!(matches!(Config::parse("[view]\npairing = \"diagonal\"\n"), Err(GraphError::Config(_))));
    }
}
