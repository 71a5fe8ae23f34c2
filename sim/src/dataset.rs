//! Datasets: detections per frame plus ground-truth links, saved as JSON.

use crate::cell::Cell;
use linker_core::Frame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A recorded set of detections.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Seed of the scenario that produced the data, if simulated
    pub seed: Option<u64>,
    /// Detections per frame, in detection id order
    pub frames: BTreeMap<Frame, Vec<Cell>>,
    /// Ground-truth links as (earlier, later) detection ids; may be empty
    #[serde(default)]
    pub truth: Vec<(u64, u64)>,
}

impl Dataset {
    pub fn n_detections(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }
}

/// Save a dataset to a JSON file.
pub fn save_dataset(dataset: &Dataset, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, dataset)?;
    Ok(())
}

/// Load a dataset from a JSON file.
pub fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let dataset: Dataset = serde_json::from_reader(reader)?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{Scenario, ScenarioKind};

    #[test]
    fn save_then_load() {
        let data = Scenario::build(ScenarioKind::Dividing, 2).run();
        let path = std::env::temp_dir()
            .join(format!("celllink-dataset-{}.json", std::process::id()));
        save_dataset(&data, &path).unwrap();
        let back = load_dataset(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(back.n_detections(), data.n_detections());
        assert_eq!(back.truth, data.truth);
    }

    #[test]
    fn truth_is_optional() {
        let json = r#"{"name":"manual","seed":null,"frames":{"0":[{"id":0,"lineage":0,"frame":0,"position":[1.0,2.0,0.0],"size":3.0}]}}"#;
        let data: Dataset = serde_json::from_str(json).unwrap();
        assert!(data.truth.is_empty());
        assert_eq!(data.n_detections(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_dataset(Path::new("/nonexistent/celllink.json")).is_err());
    }
}
