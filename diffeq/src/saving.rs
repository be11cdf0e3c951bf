use std::{fs::File, io::BufWriter, path::PathBuf};

use csv::Writer;
use nalgebra::DVector;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SavingErrors {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Specifies where a solve keeps its trajectory.
///
/// - `Memory`: Save all states in memory for postprocessing.
/// - `File`: Stream `t,y0,y1,...` rows to a csv file.
/// - `None`: Keep only the final state.
#[derive(Debug, Clone, Default)]
pub enum SaveMethod {
    #[default]
    Memory,
    File(PathBuf),
    None,
}

/// Runtime storage for solver results, selected based on the `SaveMethod`.
#[derive(Debug)]
pub enum ResultStorage {
    Memory(MemoryResult),
    File(StateWriter),
    None,
}

impl ResultStorage {
    /// Builds the storage for `dim` states; `capacity` is a size hint.
    pub fn new(method: &SaveMethod, dim: usize, capacity: usize) -> Result<Self, SavingErrors> {
        Ok(match method {
            SaveMethod::Memory => ResultStorage::Memory(MemoryResult::new(capacity)),
            SaveMethod::File(path) => ResultStorage::File(StateWriter::new(path, dim)?),
            SaveMethod::None => ResultStorage::None,
        })
    }

    /// Save a `(time, state)` pair to the result store.
    ///
    /// No-op if storage is `None`.
    pub fn save(&mut self, t: f64, y: &DVector<f64>) -> Result<(), SavingErrors> {
        match self {
            ResultStorage::Memory(result) => result.insert(t, y),
            ResultStorage::File(writer) => writer.write(t, y)?,
            ResultStorage::None => {}
        }
        Ok(())
    }

    /// Finalize and flush result storage.
    ///
    /// For `Memory`, this truncates unused buffer capacity.
    /// For `File`, this flushes the buffered writer.
    pub fn truncate(&mut self) -> Result<(), SavingErrors> {
        match self {
            ResultStorage::Memory(result) => result.truncate(),
            ResultStorage::File(writer) => writer.flush()?,
            ResultStorage::None => {}
        }
        Ok(())
    }
}

/// A preallocated and growable result container. Each entry stores the time
/// and the state at that time.
#[derive(Debug, Default)]
pub struct MemoryResult {
    pub t: Vec<f64>,
    pub y: Vec<DVector<f64>>,
    i: usize, // current index
}

impl MemoryResult {
    pub fn new(n: usize) -> Self {
        Self {
            t: vec![0.0; n],
            y: vec![DVector::zeros(0); n],
            i: 0,
        }
    }

    fn insert(&mut self, t: f64, x: &DVector<f64>) {
        if self.i == self.t.len() {
            self.extend();
        }
        self.t[self.i] = t;
        self.y[self.i].clone_from(x);
        self.i += 1;
    }

    /// Number of saved entries.
    pub fn len(&self) -> usize {
        self.i
    }

    pub fn is_empty(&self) -> bool {
        self.i == 0
    }

    // doubles the length if capacity is reached
    fn extend(&mut self) {
        let grow = self.t.len().max(1);
        self.t.extend(vec![0.0; grow]);
        self.y.extend(vec![DVector::zeros(0); grow]);
    }

    fn truncate(&mut self) {
        self.t.truncate(self.i);
        self.y.truncate(self.i);
    }
}

/// Streams `t,y0,...,y{n-1}` rows to a csv file.
#[derive(Debug)]
pub struct StateWriter {
    pub path: PathBuf,
    writer: Writer<BufWriter<File>>,
    record: Vec<String>,
}

impl StateWriter {
    /// Creates the file (and its parent folders) and writes the header.
    pub fn new(path: &PathBuf, dim: usize) -> Result<Self, SavingErrors> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = Writer::from_writer(BufWriter::new(file));
        let mut headers = Vec::with_capacity(dim + 1);
        headers.push("t".to_string());
        headers.extend((0..dim).map(|i| format!("y{i}")));
        writer.write_record(&headers)?;
        Ok(Self {
            path: path.clone(),
            writer,
            record: Vec::with_capacity(dim + 1),
        })
    }

    pub fn write(&mut self, t: f64, y: &DVector<f64>) -> Result<(), SavingErrors> {
        self.record.clear();
        self.record.push(t.to_string());
        self.record.extend(y.iter().map(|v| v.to_string()));
        self.writer.write_record(&self.record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SavingErrors> {
        self.writer.flush()?;
        Ok(())
    }
}
