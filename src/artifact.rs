use std::fs;

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::columns::{Column, ColumnLayout, Quantity, channel_index};
use crate::ephemeris::{EphemerisSample, round_to};
use crate::error::IdaError;
use crate::header::HeaderMetadata;
use crate::layout::Layout;
use crate::reading::{ChannelSample, Reading, TIMESTAMP_FORMAT, parse_timestamp};

const MAGIC: &str = "# tess-ida artifact 1";
const META_PREFIX: &str = "# meta: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSource {
    Header,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(flatten)]
    pub header: HeaderMetadata,
    #[serde(rename = "Position source")]
    pub position_source: PositionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedMetadata {
    #[serde(flatten)]
    pub metadata: ArtifactMetadata,
    /// Artifact file names in merge order.
    pub combined: Vec<String>,
}

/// A reading plus its ephemeris columns, rounded for output.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub reading: Reading,
    pub sun_altitude: f64,
    pub sun_azimuth: Option<f64>,
    pub moon_altitude: f64,
    pub moon_azimuth: Option<f64>,
    pub moon_illumination: f64,
}

impl Row {
    pub fn enrich(reading: Reading, sample: &EphemerisSample, azimuth: bool) -> Self {
        Self {
            reading,
            sun_altitude: round_to(sample.sun.altitude, 2),
            sun_azimuth: azimuth.then(|| round_to(sample.sun.azimuth, 2)),
            moon_altitude: round_to(sample.moon.altitude, 2),
            moon_azimuth: azimuth.then(|| round_to(sample.moon.azimuth, 2)),
            moon_illumination: round_to(sample.moon_illumination, 3),
        }
    }

    fn fields(&self, layout: &ColumnLayout) -> Vec<String> {
        layout
            .columns()
            .into_iter()
            .map(|column| match column {
                Column::Time => self.reading.time.format(TIMESTAMP_FORMAT).to_string(),
                Column::BoxTemperature => self.reading.box_temperature.to_string(),
                Column::SkyTemperature => self.reading.sky_temperature.to_string(),
                Column::Channel { quantity, channel } => {
                    let sample = &self.reading.channels[channel_index(channel)];
                    match quantity {
                        Quantity::Frequency => sample.frequency.to_string(),
                        Quantity::Magnitude => sample.magnitude.to_string(),
                        Quantity::ZeroPoint => sample.zero_point.to_string(),
                    }
                }
                Column::SequenceNumber => self.reading.sequence.to_string(),
                Column::SunAltitude => self.sun_altitude.to_string(),
                Column::SunAzimuth => optional(self.sun_azimuth),
                Column::MoonAltitude => self.moon_altitude.to_string(),
                Column::MoonAzimuth => optional(self.moon_azimuth),
                Column::MoonIllumination => self.moon_illumination.to_string(),
                Column::LocalTime => String::new(),
            })
            .collect()
    }

    fn from_record(record: &StringRecord, layout: &ColumnLayout) -> Result<Self, String> {
        let columns = layout.columns();
        if record.len() != columns.len() {
            return Err(format!("expected {} fields, found {}", columns.len(), record.len()));
        }
        let mut row = Row {
            reading: Reading {
                time: Default::default(),
                box_temperature: 0.0,
                sky_temperature: 0.0,
                channels: vec![
                    ChannelSample {
                        frequency: 0.0,
                        magnitude: 0.0,
                        zero_point: 0.0,
                    };
                    layout.variant.channels()
                ],
                sequence: 0,
            },
            sun_altitude: 0.0,
            sun_azimuth: None,
            moon_altitude: 0.0,
            moon_azimuth: None,
            moon_illumination: 0.0,
        };
        for (column, value) in columns.into_iter().zip(record.iter()) {
            let number = || {
                value
                    .parse::<f64>()
                    .map_err(|_| format!("{}: not a number: {value}", column.label()))
            };
            match column {
                Column::Time => {
                    row.reading.time =
                        parse_timestamp(value).ok_or_else(|| format!("invalid timestamp {value}"))?;
                }
                Column::BoxTemperature => row.reading.box_temperature = number()?,
                Column::SkyTemperature => row.reading.sky_temperature = number()?,
                Column::Channel { quantity, channel } => {
                    let sample = &mut row.reading.channels[channel_index(channel)];
                    match quantity {
                        Quantity::Frequency => sample.frequency = number()?,
                        Quantity::Magnitude => sample.magnitude = number()?,
                        Quantity::ZeroPoint => sample.zero_point = number()?,
                    }
                }
                Column::SequenceNumber => {
                    row.reading.sequence = value
                        .parse()
                        .map_err(|_| format!("invalid sequence number {value}"))?;
                }
                Column::SunAltitude => row.sun_altitude = number()?,
                Column::SunAzimuth => row.sun_azimuth = Some(number()?),
                Column::MoonAltitude => row.moon_altitude = number()?,
                Column::MoonAzimuth => row.moon_azimuth = Some(number()?),
                Column::MoonIllumination => row.moon_illumination = number()?,
                Column::LocalTime => {}
            }
        }
        Ok(row)
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// One enriched period of one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub metadata: ArtifactMetadata,
    pub layout: ColumnLayout,
    pub rows: Vec<Row>,
}

impl Artifact {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IdaError> {
        encode(&self.metadata, &self.layout, &self.rows)
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), IdaError> {
        Layout::write_bytes_atomic(path, &self.to_bytes()?)
    }

    pub fn read(path: &Utf8Path) -> Result<Self, IdaError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| IdaError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse(path.file_name().unwrap_or(path.as_str()), &content)
    }

    pub fn parse(file: &str, content: &str) -> Result<Self, IdaError> {
        let mut lines = content.splitn(3, '\n');
        if lines.next().map(str::trim_end) != Some(MAGIC) {
            return Err(IdaError::parse(file, "not a tess-ida artifact"));
        }
        let meta = lines
            .next()
            .and_then(|line| line.trim_end().strip_prefix(META_PREFIX))
            .ok_or_else(|| IdaError::parse(file, "missing metadata line"))?;
        let metadata: ArtifactMetadata = serde_json::from_str(meta)
            .map_err(|err| IdaError::parse(file, format!("metadata: {err}")))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(lines.next().unwrap_or_default().as_bytes());
        let labels = reader
            .headers()
            .map_err(|err| IdaError::parse(file, err.to_string()))?
            .clone();
        let layout = ColumnLayout::from_labels(labels.iter().collect::<Vec<_>>().as_slice())
            .ok_or_else(|| IdaError::parse(file, "unknown column layout"))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| IdaError::parse(file, err.to_string()))?;
            rows.push(Row::from_record(&record, &layout).map_err(|reason| IdaError::parse(file, reason))?);
        }
        Ok(Self {
            metadata,
            layout,
            rows,
        })
    }
}

/// Several artifacts of one instrument concatenated in period order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedArtifact {
    pub metadata: MergedMetadata,
    pub layout: ColumnLayout,
    pub rows: Vec<Row>,
}

impl MergedArtifact {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IdaError> {
        encode(&self.metadata, &self.layout, &self.rows)
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), IdaError> {
        Layout::write_bytes_atomic(path, &self.to_bytes()?)
    }
}

fn encode<M: Serialize>(metadata: &M, layout: &ColumnLayout, rows: &[Row]) -> Result<Vec<u8>, IdaError> {
    // Routing through `Value` sorts the keys.
    let meta = serde_json::to_value(metadata)
        .and_then(|value| serde_json::to_string(&value))
        .map_err(|err| IdaError::Filesystem(format!("serialize metadata: {err}")))?;
    let mut out = format!("{MAGIC}\n{META_PREFIX}{meta}\n").into_bytes();

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(layout.labels())
        .map_err(|err| IdaError::Filesystem(err.to_string()))?;
    for row in rows {
        writer
            .write_record(row.fields(layout))
            .map_err(|err| IdaError::Filesystem(err.to_string()))?;
    }
    let body = writer
        .into_inner()
        .map_err(|err| IdaError::Filesystem(err.to_string()))?;
    out.extend(body);
    Ok(out)
}
