//! Append-only scalar summaries keyed by training step.
//!
//! Records go to `<logdir>/scalars.csv` (`step,tag,value,wall_time`) and,
//! for distributions, `<logdir>/histograms.csv`. Steps never decrease within
//! one writer; [`SummarySink`] reads the global step while holding the writer
//! lock, so concurrent writers (trainer and producer) stay ordered.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use ndarray::ArrayView1;
use parking_lot::Mutex;

use crate::error::{A3cError, Result};
use crate::global_step::GlobalStep;

pub const SCALARS_FILE: &str = "scalars.csv";
pub const HISTOGRAMS_FILE: &str = "histograms.csv";

/// One row of `scalars.csv`
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarRecord {
    pub step: u64,
    pub tag: String,
    pub value: f32,
    pub wall_time: f64,
}

/// CSV summary writer
pub struct SummaryWriter {
    log_dir: PathBuf,
    start_time: Instant,
    last_step: u64,
    scalar_writer: BufWriter<File>,
    histogram_writer: BufWriter<File>,
}

fn open_csv(path: &Path, header: &str) -> Result<BufWriter<File>> {
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    if is_new {
        writeln!(writer, "{}", header)?;
    }
    Ok(writer)
}

impl SummaryWriter {
    /// Open (or continue) the summary files in `log_dir`.
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;
        let scalar_writer = open_csv(&log_dir.join(SCALARS_FILE), "step,tag,value,wall_time")?;
        let histogram_writer = open_csv(
            &log_dir.join(HISTOGRAMS_FILE),
            "step,tag,count,min,max,mean,std,wall_time",
        )?;
        Ok(SummaryWriter {
            log_dir,
            start_time: Instant::now(),
            last_step: 0,
            scalar_writer,
            histogram_writer,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn check_step(&mut self, step: u64) -> Result<()> {
        if step < self.last_step {
            return Err(A3cError::invalid_parameter(
                "step".to_string(),
                format!("summary step {} is before the last written step {}", step, self.last_step),
            ));
        }
        self.last_step = step;
        Ok(())
    }

    /// Log a scalar value
    pub fn add_scalar(&mut self, step: u64, tag: &str, value: f32) -> Result<()> {
        self.check_step(step)?;
        let wall_time = self.start_time.elapsed().as_secs_f64();
        writeln!(self.scalar_writer, "{},{},{},{:.3}", step, tag, value, wall_time)?;
        Ok(())
    }

    /// Log several scalars at the same step
    pub fn add_scalars(&mut self, step: u64, scalars: &[(&str, f32)]) -> Result<()> {
        for (tag, value) in scalars {
            self.add_scalar(step, tag, *value)?;
        }
        self.flush()
    }

    /// Log count/min/max/mean/std of a set of values
    pub fn add_histogram(&mut self, step: u64, tag: &str, values: ArrayView1<f32>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.check_step(step)?;

        let count = values.len();
        let min = values.iter().fold(f32::INFINITY, |a, &b| a.min(b));
        let max = values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mean = values.sum() / count as f32;
        let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / count as f32;
        let wall_time = self.start_time.elapsed().as_secs_f64();

        writeln!(
            self.histogram_writer,
            "{},{},{},{},{},{},{},{:.3}",
            step,
            tag,
            count,
            min,
            max,
            mean,
            variance.sqrt(),
            wall_time
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.scalar_writer.flush()?;
        self.histogram_writer.flush()?;
        Ok(())
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Thread-safe handle to a [`SummaryWriter`]
#[derive(Clone)]
pub struct SummarySink {
    writer: Arc<Mutex<SummaryWriter>>,
}

impl SummarySink {
    pub fn new(writer: SummaryWriter) -> Self {
        SummarySink {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn open<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        Ok(Self::new(SummaryWriter::new(log_dir)?))
    }

    /// Write `scalars` at the current value of `step`; returns the step used.
    pub fn write_scalars(&self, step: &GlobalStep, scalars: &[(&str, f32)]) -> Result<u64> {
        let mut writer = self.writer.lock();
        let at = step.get();
        writer.add_scalars(at, scalars)?;
        Ok(at)
    }

    /// Write scalars and histograms at the current value of `step` in one record batch.
    pub fn write_with_histograms(
        &self,
        step: &GlobalStep,
        scalars: &[(&str, f32)],
        histograms: &[(&str, ArrayView1<f32>)],
    ) -> Result<u64> {
        let mut writer = self.writer.lock();
        let at = step.get();
        for (tag, values) in histograms {
            writer.add_histogram(at, tag, values.view())?;
        }
        writer.add_scalars(at, scalars)?;
        Ok(at)
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()
    }
}

/// Read every scalar record written to `log_dir`.
pub fn read_scalars<P: AsRef<Path>>(log_dir: P) -> Result<Vec<ScalarRecord>> {
    let file = File::open(log_dir.as_ref().join(SCALARS_FILE))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines().skip(1) {
        let line = line?;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 4 {
            return Err(A3cError::Serialization(format!("malformed summary line '{}'", line)));
        }
        let parse_err = |what: &str| A3cError::Serialization(format!("bad {} in '{}'", what, line));
        records.push(ScalarRecord {
            step: fields[0].parse().map_err(|_| parse_err("step"))?,
            tag: fields[1].to_string(),
            value: fields[2].parse().map_err(|_| parse_err("value"))?,
            wall_time: fields[3].parse().map_err(|_| parse_err("wall_time"))?,
        });
    }
    Ok(records)
}
