use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Trim};

use crate::columns::{Column, Quantity, channel_index, raw_columns};
use crate::error::IdaError;
use crate::header::{DeviceVariant, HEADER_LINES};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSample {
    pub frequency: f64,
    pub magnitude: f64,
    pub zero_point: f64,
}

/// One measurement row of an IDA file, in UTC.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub time: NaiveDateTime,
    pub box_temperature: f64,
    pub sky_temperature: f64,
    pub channels: Vec<ChannelSample>,
    pub sequence: i64,
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_PARSE_FORMAT).ok()
}

/// Parses the `;` separated rows following the header.
pub fn parse_readings(
    file: &str,
    body: &str,
    variant: DeviceVariant,
) -> Result<Vec<Reading>, IdaError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let mut readings = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| IdaError::parse(file, err.to_string()))?;
        let line = record
            .position()
            .map(|position| position.line() as usize + HEADER_LINES)
            .unwrap_or_default();
        readings.push(parse_record(&record, variant).map_err(|reason| {
            IdaError::parse(file, format!("line {line}: {reason}"))
        })?);
    }
    Ok(readings)
}

fn parse_record(record: &StringRecord, variant: DeviceVariant) -> Result<Reading, String> {
    let columns = raw_columns(variant);
    if record.len() != columns.len() {
        return Err(format!(
            "expected {} fields, found {}",
            columns.len(),
            record.len()
        ));
    }

    let empty = ChannelSample {
        frequency: 0.0,
        magnitude: 0.0,
        zero_point: 0.0,
    };
    let mut reading = Reading {
        time: NaiveDateTime::default(),
        box_temperature: 0.0,
        sky_temperature: 0.0,
        channels: vec![empty; variant.channels()],
        sequence: 0,
    };
    for (index, (column, value)) in columns.into_iter().zip(record.iter()).enumerate() {
        let number = || {
            value
                .parse::<f64>()
                .map_err(|_| format!("field {} ({}) is not a number: {value}", index + 1, column.label()))
        };
        match column {
            Column::Time => {
                reading.time =
                    parse_timestamp(value).ok_or_else(|| format!("invalid UTC timestamp {value}"))?;
            }
            Column::LocalTime => {}
            Column::BoxTemperature => reading.box_temperature = number()?,
            Column::SkyTemperature => reading.sky_temperature = number()?,
            Column::Channel { quantity, channel } => {
                let sample = &mut reading.channels[channel_index(channel)];
                match quantity {
                    Quantity::Frequency => sample.frequency = number()?,
                    Quantity::Magnitude => sample.magnitude = number()?,
                    Quantity::ZeroPoint => sample.zero_point = number()?,
                }
            }
            Column::SequenceNumber => {
                reading.sequence = value
                    .parse()
                    .map_err(|_| format!("invalid sequence number {value}"))?;
            }
            other => return Err(format!("unexpected raw column {}", other.label())),
        }
    }
    Ok(reading)
}
