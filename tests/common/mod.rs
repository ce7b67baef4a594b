#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use tempfile::TempDir;

use tess_ida::client::IdaClient;
use tess_ida::config::PipelineConfig;
use tess_ida::domain::{Position, SourceDescriptor};
use tess_ida::ephemeris::{EphemerisProvider, EphemerisSample, HorizontalPosition};
use tess_ida::error::IdaError;

pub const MADRID_POSITION: &str = "40.4168, -3.7038, 650";

/// Builds a single channel IDA file with a 35 line header.
#[derive(Debug, Clone)]
pub struct IdaFile {
    pub instrument: String,
    pub year: i32,
    pub month: u32,
    pub location: String,
    pub position: Option<String>,
    pub rows: usize,
    pub sky_temperature: f64,
}

impl IdaFile {
    pub fn new(instrument: &str, year: i32, month: u32) -> Self {
        Self {
            instrument: instrument.to_string(),
            year,
            month,
            location: "Observatorio/Madrid/Madrid/Madrid/Spain".to_string(),
            position: Some(MADRID_POSITION.to_string()),
            rows: 3,
            sky_temperature: -12.5,
        }
    }

    pub fn location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn without_position(mut self) -> Self {
        self.position = None;
        self
    }

    pub fn sky_temperature(mut self, value: f64) -> Self {
        self.sky_temperature = value;
        self
    }

    pub fn filename(&self) -> String {
        format!("{}_{}-{:02}.dat", self.instrument, self.year, self.month)
    }

    pub fn render(&self) -> String {
        let position = self
            .position
            .clone()
            .unwrap_or_else(|| "unknown, unknown, unknown".to_string());
        let mut lines = vec![
            "# Community Standard Skyglow Data Format 1.0".to_string(),
            "# URL: http://www.darksky.org/NSBM/sdf1.0.pdf".to_string(),
            "# Number of header lines: 35".to_string(),
            "# This data is released under the following license: ODbL 1.0".to_string(),
            "# Device type: TESS-W".to_string(),
            format!("# Instrument ID: {}", self.instrument),
            "# Data supplier: Jane Roe / UCM".to_string(),
            format!("# Location name: {}", self.location),
            format!("# Position: {position}"),
            "# Local timezone: Europe/Madrid".to_string(),
            "# Time Synchronization: timestamp".to_string(),
            "# Number of channels: 1".to_string(),
            "# Filters per channel: UV/IR-740".to_string(),
            "# Measurement direction per channel: (0.0, 0.0)".to_string(),
            "# Field of view: 17".to_string(),
            "# Number of fields per line: 8".to_string(),
            "# TESS cover offset value: 0.0".to_string(),
            "# TESS zero point: 20.44".to_string(),
        ];
        while lines.len() < 32 {
            lines.push("# Comment: ".to_string());
        }
        lines.push("# UTC Date & Time, Local Date & Time, Enclosure Temperature, Sky Temperature, Frequency, MSAS, ZP, Sequence Number".to_string());
        lines.push("# YYYY-MM-DDTHH:mm:ss.fff;YYYY-MM-DDTHH:mm:ss.fff;Celsius;Celsius;Hz;mag/arcsec^2;mag/arcsec^2;Count".to_string());
        lines.push("# END OF HEADER".to_string());

        for index in 0..self.rows {
            let day = index + 1;
            lines.push(format!(
                "{year}-{month:02}-{day:02}T22:00:00.000;{year}-{month:02}-{day:02}T23:00:00.000;15.2;{sky};12.51;18.71;20.44;{sequence}",
                year = self.year,
                month = self.month,
                sky = self.sky_temperature,
                sequence = 1000 + index,
            ));
        }
        let mut content = lines.join("\n");
        content.push('\n');
        content
    }
}

pub fn madrid() -> Position {
    Position {
        longitude: -3.7038,
        latitude: 40.4168,
        height: 650.0,
    }
}

/// Config rooted in a temporary directory.
pub fn test_config(temp: &TempDir, concurrency: usize) -> PipelineConfig {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    PipelineConfig {
        schema_version: 1,
        base_url: Some("https://ida.example.org/s/share".to_string()),
        aux_store: root.join("aux.db"),
        ida_dir: root.join("IDA"),
        ecsv_dir: root.join("ECSV"),
        concurrency,
        timeout: Duration::from_secs(5),
        deadline: None,
        force: false,
    }
}

/// Serves files by name; names in `failing` return a network error, anything
/// unknown is not found. Tracks peak in-flight requests.
#[derive(Default)]
pub struct MockIdaClient {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl MockIdaClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, file: &IdaFile) -> Self {
        self.serve(&file.filename(), file.render().into_bytes());
        self
    }

    pub fn failing(mut self, filename: &str) -> Self {
        self.failing.insert(filename.to_string());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn serve(&self, filename: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdaClient for MockIdaClient {
    fn download(
        &self,
        descriptor: &SourceDescriptor,
        _timeout: Duration,
    ) -> Result<Vec<u8>, IdaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let file = descriptor.filename();
        let result = if self.failing.contains(&file) {
            Err(IdaError::Network {
                file: file.clone(),
                message: "connection reset".to_string(),
            })
        } else {
            self.files
                .lock()
                .unwrap()
                .get(&file)
                .cloned()
                .ok_or(IdaError::NotFound(file))
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Constant sun and moon, counting calls.
#[derive(Default)]
pub struct FixedEphemeris {
    pub calls: AtomicUsize,
}

impl FixedEphemeris {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EphemerisProvider for FixedEphemeris {
    fn sample(&self, _position: &Position, _time: NaiveDateTime) -> EphemerisSample {
        self.calls.fetch_add(1, Ordering::SeqCst);
        EphemerisSample {
            sun: HorizontalPosition {
                altitude: -35.123,
                azimuth: 310.456,
            },
            moon: HorizontalPosition {
                altitude: 12.345,
                azimuth: 95.5,
            },
            moon_illumination: 0.4567,
        }
    }
}
