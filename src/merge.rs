use std::collections::{BTreeSet, HashSet};

use camino::Utf8PathBuf;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactMetadata, MergedArtifact, MergedMetadata};
use crate::domain::{InstrumentName, Period};
use crate::error::IdaError;
use crate::layout::Layout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeWarning {
    /// No artifact for this period in the requested range.
    Gap { period: Period },
    /// Metadata fields that differ between artifacts; the latest period's values were kept.
    MetadataConflict { fields: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub instrument: InstrumentName,
    pub path: Utf8PathBuf,
    pub combined: Vec<String>,
    pub rows: usize,
    pub warnings: Vec<MergeWarning>,
}

#[derive(Debug, Clone)]
pub struct MergeRequest<'r> {
    pub instrument: &'r InstrumentName,
    pub since: Period,
    pub until: Period,
    pub out_filename: Option<&'r str>,
    /// Artifact file names left out of the merge, as if absent.
    pub exclude: &'r HashSet<String>,
}

pub struct Merger<'a> {
    layout: &'a Layout,
}

impl<'a> Merger<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    pub fn merge(&self, request: &MergeRequest<'_>) -> Result<MergeOutcome, IdaError> {
        let instrument = request.instrument;
        let path = self.layout.combined_path(
            instrument,
            request.since,
            request.until,
            request.out_filename,
        )?;
        let entries: Vec<_> = self
            .layout
            .artifacts(instrument)?
            .into_iter()
            .filter(|entry| entry.unit.period >= request.since && entry.unit.period <= request.until)
            .filter(|entry| !request.exclude.contains(entry.filename()))
            .collect();

        let present: BTreeSet<Period> = entries.iter().map(|entry| entry.unit.period).collect();
        let mut warnings: Vec<MergeWarning> = Period::range(request.since, request.until)
            .into_iter()
            .filter(|period| !present.contains(period))
            .map(|period| {
                warn!(instrument = %instrument, period = %period, "no artifact to combine");
                MergeWarning::Gap { period }
            })
            .collect();

        if entries.is_empty() {
            return Err(IdaError::NotFound(format!(
                "artifacts of {instrument} between {} and {}",
                request.since, request.until
            )));
        }
        info!(
            instrument = %instrument,
            artifacts = entries.len(),
            since = %request.since,
            until = %request.until,
            "combining artifacts"
        );

        let mut artifacts = Vec::with_capacity(entries.len());
        for entry in &entries {
            artifacts.push(Artifact::read(&entry.path)?);
        }
        let layout = artifacts[0].layout;
        if let Some(position) = artifacts.iter().position(|artifact| artifact.layout != layout) {
            return Err(IdaError::ColumnMismatch {
                file: entries[position].filename().to_string(),
            });
        }

        let conflicts = conflicting_fields(artifacts.iter().map(|artifact| &artifact.metadata))?;
        if !conflicts.is_empty() {
            warn!(
                instrument = %instrument,
                fields = ?conflicts,
                "metadata differs between periods, keeping the most recent"
            );
            warnings.push(MergeWarning::MetadataConflict { fields: conflicts });
        }

        let combined: Vec<String> = entries
            .iter()
            .map(|entry| entry.filename().to_string())
            .collect();
        let metadata = artifacts[artifacts.len() - 1].metadata.clone();
        let rows = artifacts
            .into_iter()
            .flat_map(|artifact| artifact.rows)
            .collect();

        let merged = MergedArtifact {
            metadata: MergedMetadata {
                metadata,
                combined: combined.clone(),
            },
            layout,
            rows,
        };
        merged.write(&path)?;
        info!(instrument = %instrument, path = %path, rows = merged.rows.len(), "combined artifact written");

        Ok(MergeOutcome {
            instrument: instrument.clone(),
            path,
            combined,
            rows: merged.rows.len(),
            warnings,
        })
    }
}

/// Top-level metadata keys whose values are not identical across all artifacts.
fn conflicting_fields<'m>(
    metadata: impl Iterator<Item = &'m ArtifactMetadata>,
) -> Result<Vec<String>, IdaError> {
    let mut maps = Vec::new();
    for meta in metadata {
        match serde_json::to_value(meta) {
            Ok(Value::Object(map)) => maps.push(map),
            Ok(_) => return Err(IdaError::Filesystem("artifact metadata is not an object".to_string())),
            Err(err) => return Err(IdaError::Filesystem(err.to_string())),
        }
    }
    let keys: BTreeSet<&String> = maps.iter().flat_map(|map| map.keys()).collect();
    let mut conflicts = Vec::new();
    for key in keys {
        let values: BTreeSet<String> = maps
            .iter()
            .map(|map| map.get(key.as_str()).unwrap_or(&Value::Null).to_string())
            .collect();
        if values.len() > 1 {
            conflicts.push(key.clone());
        }
    }
    Ok(conflicts)
}
