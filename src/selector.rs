use crate::auxdb::PositionStore;
use crate::domain::{InstrumentName, Position, SourceDescriptor};
use crate::error::IdaError;

pub const DEFAULT_RADIUS_KM: f64 = 10.0;
const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Single(InstrumentName),
    /// One file addressed by its exact remote name.
    Exact(SourceDescriptor),
    Names(Vec<InstrumentName>),
    /// Network photometers `stars<N>`.
    Numbers(Vec<u32>),
    /// Inclusive range of photometer numbers.
    NumberRange { from: u32, to: u32 },
    /// Instruments with stored coordinates within `radius_km` of a point.
    Near {
        longitude: f64,
        latitude: f64,
        radius_km: f64,
    },
}

impl Selector {
    pub fn exact(filename: &str) -> Result<Self, IdaError> {
        Ok(Selector::Exact(SourceDescriptor::from_filename(filename)?))
    }

    pub fn number_range(from: u32, to: u32) -> Result<Self, IdaError> {
        if from > to {
            return Err(IdaError::InvalidSelector(format!("empty range {from}..{to}")));
        }
        Ok(Selector::NumberRange { from, to })
    }

    pub fn near(longitude: f64, latitude: f64, radius_km: Option<f64>) -> Result<Self, IdaError> {
        let radius_km = radius_km.unwrap_or(DEFAULT_RADIUS_KM);
        if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
            return Err(IdaError::InvalidSelector(format!(
                "coordinates out of range: {longitude}, {latitude}"
            )));
        }
        if radius_km <= 0.0 || !radius_km.is_finite() {
            return Err(IdaError::InvalidSelector(format!("invalid radius {radius_km} km")));
        }
        Ok(Selector::Near {
            longitude,
            latitude,
            radius_km,
        })
    }

    /// Instruments covered by this selector, sorted and without duplicates.
    pub fn instruments(&self, positions: &PositionStore<'_>) -> Result<Vec<InstrumentName>, IdaError> {
        let mut names = match self {
            Selector::Single(name) => vec![name.clone()],
            Selector::Exact(descriptor) => vec![descriptor.instrument().clone()],
            Selector::Names(names) => names.clone(),
            Selector::Numbers(numbers) => numbers
                .iter()
                .map(|number| InstrumentName::from_number(*number))
                .collect(),
            Selector::NumberRange { from, to } => (*from..=*to).map(InstrumentName::from_number).collect(),
            Selector::Near {
                longitude,
                latitude,
                radius_km,
            } => {
                let center = Position {
                    longitude: *longitude,
                    latitude: *latitude,
                    height: 0.0,
                };
                let mut found = Vec::new();
                for record in positions.records()? {
                    let distance = haversine_km(&center, &record.position);
                    if distance <= *radius_km {
                        tracing::debug!(instrument = %record.instrument, distance_km = distance, "within radius");
                        found.push(record.instrument.parse()?);
                    }
                }
                found
            }
        };
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Great-circle distance ignoring height.
pub fn haversine_km(a: &Position, b: &Position) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}
