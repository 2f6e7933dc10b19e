//! Experiment tracking sinks and the rolling training window.

use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Valid,
}

pub type MetricMap = BTreeMap<String, f64>;

/// Receives per-epoch metrics. Implementations decide where they go.
pub trait MetricsSink {
    fn record(&mut self, fold: usize, epoch: usize, stage: Stage, metrics: &MetricMap)
        -> anyhow::Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&mut self, _: usize, _: usize, _: Stage, _: &MetricMap) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per record to a file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: fs::File,
}

impl JsonlSink {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating metrics dir {}", parent.display()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening metrics file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlSink {
    fn record(
        &mut self,
        fold: usize,
        epoch: usize,
        stage: Stage,
        metrics: &MetricMap,
    ) -> anyhow::Result<()> {
        let line = serde_json::json!({
            "fold": fold,
            "epoch": epoch,
            "stage": stage,
            "metrics": metrics,
        });
        writeln!(self.file, "{line}")
            .with_context(|| format!("writing metrics to {}", self.path.display()))
    }
}

/// Loss and accuracy over the batches since the last report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainWindow {
    pub loss_sum: f64,
    pub matches: usize,
    pub samples: usize,
    pub batches: usize,
}

impl TrainWindow {
    pub fn push(&mut self, loss: f32, matches: usize, batch_size: usize) {
        self.loss_sum += f64::from(loss);
        self.matches += matches;
        self.samples += batch_size;
        self.batches += 1;
    }

    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.loss_sum / self.batches as f64
        }
    }

    /// Matches per sample; with fixed-size batches this is `matches / batch_size / batches`.
    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.matches as f64 / self.samples as f64
        }
    }

    pub fn is_full(&self, interval: usize) -> bool {
        self.batches >= interval.max(1)
    }

    /// Returns the current window and starts a new one.
    pub fn take(&mut self) -> TrainWindow {
        std::mem::take(self)
    }

    pub fn to_metrics(&self) -> MetricMap {
        MetricMap::from([
            ("train_loss".to_string(), self.mean_loss()),
            ("train_acc".to_string(), self.accuracy()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_means() {
        let mut w = TrainWindow::default();
        w.push(1.0, 3, 4);
        w.push(3.0, 1, 4);
        assert!(w.is_full(2));
        assert_eq!(w.mean_loss(), 2.0);
        assert_eq!(w.accuracy(), 0.5);
        let taken = w.take();
        assert_eq!(taken.batches, 2);
        assert_eq!(w, TrainWindow::default());
    }

    #[test]
    fn jsonl_sink_appends_lines() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("logs/metrics.jsonl");
        let mut sink = JsonlSink::create(&path)?;
        let metrics = MetricMap::from([("valid_acc".to_string(), 0.75)]);
        sink.record(0, 3, Stage::Valid, &metrics)?;
        sink.record(1, 0, Stage::Train, &MetricMap::new())?;
        let raw = fs::read_to_string(&path)?;
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["stage"], "valid");
        assert_eq!(lines[0]["metrics"]["valid_acc"], 0.75);
        assert_eq!(lines[1]["fold"], 1);
        Ok(())
    }
}
