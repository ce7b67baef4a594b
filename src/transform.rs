use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactMetadata, PositionSource, Row};
use crate::auxdb::{AuxStore, KeyValueStore};
use crate::columns::ColumnLayout;
use crate::domain::SourceDescriptor;
use crate::ephemeris::EphemerisProvider;
use crate::error::IdaError;
use crate::fingerprint::fingerprint_bytes;
use crate::header::split_ida;
use crate::layout::Layout;
use crate::reading::parse_readings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformOutcome {
    Transformed {
        rows: usize,
        position_source: PositionSource,
    },
    /// Fingerprint unchanged and artifact present.
    Skipped,
}

pub struct Transformer<'a, E: EphemerisProvider> {
    aux: &'a AuxStore,
    layout: &'a Layout,
    ephemeris: &'a E,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<'a, E: EphemerisProvider> Transformer<'a, E> {
    pub fn new(aux: &'a AuxStore, layout: &'a Layout, ephemeris: &'a E) -> Self {
        Self {
            aux,
            layout,
            ephemeris,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Transforms the staged copy of `descriptor` unless its fingerprint is already
    /// recorded and `force` is off.
    ///
    /// The fingerprint is committed only after the artifact is on disk.
    pub fn transform(
        &self,
        descriptor: &SourceDescriptor,
        force: bool,
    ) -> Result<TransformOutcome, IdaError> {
        let file = descriptor.filename();
        let lock = self.lock_for(&file);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let raw_path = self.layout.raw_path(descriptor);
        let artifact_path = self.layout.artifact_path(descriptor);
        let bytes = fs::read(raw_path.as_std_path())
            .map_err(|err| IdaError::Filesystem(format!("read {raw_path}: {err}")))?;
        let fingerprint = fingerprint_bytes(&bytes);

        let stored = self.aux.fingerprints().get(&file)?;
        let unchanged = stored.as_deref() == Some(fingerprint.as_str());
        if unchanged && !force && artifact_path.as_std_path().exists() {
            debug!(file = %file, "fingerprint unchanged, skipping");
            return Ok(TransformOutcome::Skipped);
        }
        if unchanged && force {
            debug!(file = %file, "fingerprint unchanged, recomputing on request");
        }

        let content = std::str::from_utf8(&bytes)
            .map_err(|err| IdaError::parse(&file, format!("not valid UTF-8: {err}")))?;
        let (mut header, body) = split_ida(&file, content)?;
        let variant = header.variant()?;
        let readings = parse_readings(&file, body, variant)?;

        let (position, position_source) = match header.position {
            Some(position) => (position, PositionSource::Header),
            None => {
                let position = self
                    .aux
                    .positions()
                    .position(descriptor.instrument())?
                    .ok_or_else(|| IdaError::MissingPosition {
                        instrument: descriptor.instrument().to_string(),
                        file: file.clone(),
                    })?;
                warn!(
                    instrument = %descriptor.instrument(),
                    period = %descriptor.period(),
                    latitude = position.latitude,
                    longitude = position.longitude,
                    height = position.height,
                    "header has no position, using stored coordinates"
                );
                header.position = Some(position);
                (position, PositionSource::Store)
            }
        };

        let azimuth = header.points_off_zenith();
        let rows: Vec<Row> = readings
            .into_iter()
            .map(|reading| {
                let sample = self.ephemeris.sample(&position, reading.time);
                Row::enrich(reading, &sample, azimuth)
            })
            .collect();
        let row_count = rows.len();

        let artifact = Artifact {
            metadata: ArtifactMetadata {
                header,
                position_source,
            },
            layout: ColumnLayout { variant, azimuth },
            rows,
        };
        artifact.write(&artifact_path)?;
        self.aux.fingerprints().put(&file, fingerprint)?;

        info!(file = %file, rows = row_count, path = %artifact_path, "transformed");
        Ok(TransformOutcome::Transformed {
            rows: row_count,
            position_source,
        })
    }

    fn lock_for(&self, file: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(file.to_string()).or_default())
    }
}
