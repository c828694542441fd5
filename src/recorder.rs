// src/recorder.rs
// 录制文件：首行 "# <采样率>"，之后每行一个采样点，逗号分隔各通道
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use ndarray::{Array2, Axis};
use thiserror::Error;
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("recording CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("recording has no '# <sample rate>' line")]
    MissingSampleRate,
    #[error("invalid sample rate '{0}'")]
    InvalidSampleRate(String),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("line {line}: expected {expected} values, found {actual}")]
    RaggedRow {
        line: usize,
        expected: usize,
        actual: usize,
    },
}
/// A multi-channel signal together with its sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct Recording {
    pub sample_rate: f32,
    /// samples x channels
    pub samples: Array2<f32>,
}
impl Recording {
    pub fn new(sample_rate: f32, samples: Array2<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }
    pub fn sample_count(&self) -> usize {
        self.samples.nrows()
    }
    pub fn channel_count(&self) -> usize {
        self.samples.ncols()
    }
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let recording = Self::from_reader(File::open(path)?)?;
        log::info!(
            "loaded {} samples x {} channels at {} Hz from {}",
            recording.sample_count(),
            recording.channel_count(),
            recording.sample_rate,
            path.display()
        );
        Ok(recording)
    }
    pub fn from_reader(reader: impl Read) -> Result<Self, RecordingError> {
        let mut reader = BufReader::new(reader);
        let mut first = String::new();
        reader.read_line(&mut first)?;
        let rate_text = first
            .trim()
            .strip_prefix('#')
            .ok_or(RecordingError::MissingSampleRate)?
            .trim();
        let sample_rate: f32 = rate_text
            .parse()
            .map_err(|_| RecordingError::InvalidSampleRate(rate_text.to_owned()))?;
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(RecordingError::InvalidSampleRate(rate_text.to_owned()));
        }
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);
        let mut values = Vec::new();
        let mut channels: Option<usize> = None;
        let mut rows = 0;
        for record in csv.records() {
            let record = record?;
            // 文件第一行是采样率
            let line = record.position().map(|p| p.line() as usize + 1).unwrap_or(0);
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            let expected = *channels.get_or_insert(record.len());
            if record.len() != expected {
                return Err(RecordingError::RaggedRow {
                    line,
                    expected,
                    actual: record.len(),
                });
            }
            for field in record.iter() {
                let value: f32 = field.parse().map_err(|err| RecordingError::Parse {
                    line,
                    message: format!("'{field}': {err}"),
                })?;
                values.push(value);
            }
            rows += 1;
        }
        let samples = Array2::from_shape_vec((rows, channels.unwrap_or(0)), values)
            .map_err(|err| RecordingError::Parse {
                line: 0,
                message: err.to_string(),
            })?;
        Ok(Self::new(sample_rate, samples))
    }
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RecordingError> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))?;
        log::info!(
            "saved {} samples x {} channels to {}",
            self.sample_count(),
            self.channel_count(),
            path.display()
        );
        Ok(())
    }
    pub fn write_to(&self, mut writer: impl Write) -> Result<(), RecordingError> {
        writeln!(writer, "# {}", self.sample_rate)?;
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        for row in self.samples.axis_iter(Axis(0)) {
            csv.write_record(row.iter().map(|v| v.to_string()))?;
        }
        csv.flush()?;
        Ok(())
    }
}
