mod common;

use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use tess_ida::artifact::{Artifact, PositionSource};
use tess_ida::auxdb::{AuxStore, KeyValueStore};
use tess_ida::domain::{Period, Position, SourceDescriptor};
use tess_ida::error::IdaError;
use tess_ida::fingerprint::fingerprint_bytes;
use tess_ida::layout::Layout;
use tess_ida::transform::{TransformOutcome, Transformer};

use common::{FixedEphemeris, IdaFile, madrid};

struct Workspace {
    _temp: TempDir,
    layout: Layout,
    aux: AuxStore,
    ephemeris: FixedEphemeris,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self {
            layout: Layout::new(root.join("IDA"), root.join("ECSV")),
            aux: AuxStore::open(root.join("aux.db")).unwrap(),
            ephemeris: FixedEphemeris::default(),
            _temp: temp,
        }
    }

    fn stage(&self, file: &IdaFile) -> SourceDescriptor {
        let descriptor = SourceDescriptor::from_filename(&file.filename()).unwrap();
        Layout::write_bytes_atomic(&self.layout.raw_path(&descriptor), file.render().as_bytes()).unwrap();
        descriptor
    }

    fn transformer(&self) -> Transformer<'_, FixedEphemeris> {
        Transformer::new(&self.aux, &self.layout, &self.ephemeris)
    }

    fn artifact_bytes(&self, descriptor: &SourceDescriptor) -> Vec<u8> {
        fs::read(self.layout.artifact_path(descriptor)).unwrap()
    }
}

#[test]
fn unchanged_source_is_skipped_without_recomputing() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars1", 2024, 1));

    let first = workspace.transformer().transform(&descriptor, false).unwrap();
    assert_eq!(
        first,
        TransformOutcome::Transformed {
            rows: 3,
            position_source: PositionSource::Header,
        }
    );
    let calls = workspace.ephemeris.calls();
    assert_eq!(calls, 3);
    let written = workspace.artifact_bytes(&descriptor);

    let second = workspace.transformer().transform(&descriptor, false).unwrap();
    assert_eq!(second, TransformOutcome::Skipped);
    assert_eq!(workspace.ephemeris.calls(), calls);
    assert_eq!(workspace.artifact_bytes(&descriptor), written);
}

#[test]
fn fingerprint_is_committed_after_the_artifact() {
    let workspace = Workspace::new();
    let file = IdaFile::new("stars1", 2024, 1);
    let descriptor = workspace.stage(&file);

    workspace.transformer().transform(&descriptor, false).unwrap();

    let stored = workspace.aux.fingerprints().get(&file.filename()).unwrap();
    assert_eq!(stored, Some(fingerprint_bytes(file.render().as_bytes())));
    assert!(workspace.layout.artifact_path(&descriptor).as_std_path().exists());
}

#[test]
fn changed_source_is_recomputed() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars1", 2024, 1));
    workspace.transformer().transform(&descriptor, false).unwrap();
    let before = workspace.artifact_bytes(&descriptor);

    workspace.stage(&IdaFile::new("stars1", 2024, 1).sky_temperature(-20.0));
    let outcome = workspace.transformer().transform(&descriptor, false).unwrap();

    assert_matches!(outcome, TransformOutcome::Transformed { rows: 3, .. });
    assert_ne!(workspace.artifact_bytes(&descriptor), before);
}

#[test]
fn force_recomputes_unchanged_source() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars1", 2024, 1));
    workspace.transformer().transform(&descriptor, false).unwrap();
    let before = workspace.artifact_bytes(&descriptor);

    let outcome = workspace.transformer().transform(&descriptor, true).unwrap();

    assert_matches!(outcome, TransformOutcome::Transformed { .. });
    assert_eq!(workspace.ephemeris.calls(), 6);
    assert_eq!(workspace.artifact_bytes(&descriptor), before);
}

#[test]
fn deleted_artifact_is_recomputed() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars1", 2024, 1));
    workspace.transformer().transform(&descriptor, false).unwrap();
    fs::remove_file(workspace.layout.artifact_path(&descriptor)).unwrap();

    let outcome = workspace.transformer().transform(&descriptor, false).unwrap();

    assert_matches!(outcome, TransformOutcome::Transformed { .. });
    assert!(workspace.layout.artifact_path(&descriptor).as_std_path().exists());
}

#[test]
fn header_position_wins_over_stored_coordinates() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars1", 2024, 1));
    workspace
        .aux
        .positions()
        .add(
            descriptor.instrument(),
            Position {
                longitude: 2.17,
                latitude: 41.39,
                height: 12.0,
            },
        )
        .unwrap();

    workspace.transformer().transform(&descriptor, false).unwrap();

    let artifact = Artifact::read(&workspace.layout.artifact_path(&descriptor)).unwrap();
    assert_eq!(artifact.metadata.position_source, PositionSource::Header);
    assert_eq!(artifact.metadata.header.position, Some(madrid()));
}

#[test]
fn stored_coordinates_fill_a_missing_header_position() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars7", 2024, 3).without_position());
    workspace.aux.positions().add(descriptor.instrument(), madrid()).unwrap();

    let outcome = workspace.transformer().transform(&descriptor, false).unwrap();

    assert_eq!(
        outcome,
        TransformOutcome::Transformed {
            rows: 3,
            position_source: PositionSource::Store,
        }
    );
    let artifact = Artifact::read(&workspace.layout.artifact_path(&descriptor)).unwrap();
    assert_eq!(artifact.metadata.header.position, Some(madrid()));
    assert_eq!(artifact.metadata.position_source, PositionSource::Store);
}

#[test]
fn missing_position_writes_nothing() {
    let workspace = Workspace::new();
    let file = IdaFile::new("stars7", 2024, 3).without_position();
    let descriptor = workspace.stage(&file);

    let result = workspace.transformer().transform(&descriptor, false);

    assert_matches!(
        result,
        Err(IdaError::MissingPosition { ref instrument, .. }) if instrument == "stars7"
    );
    assert!(!workspace.layout.artifact_path(&descriptor).as_std_path().exists());
    assert_eq!(workspace.aux.fingerprints().get(&file.filename()).unwrap(), None);
    assert_eq!(workspace.ephemeris.calls(), 0);
}

#[test]
fn malformed_source_is_a_parse_error() {
    let workspace = Workspace::new();
    let descriptor = SourceDescriptor::canonical("stars1".parse().unwrap(), Period::new(2024, 1).unwrap());
    Layout::write_bytes_atomic(&workspace.layout.raw_path(&descriptor), b"# not an IDA file\n").unwrap();

    let result = workspace.transformer().transform(&descriptor, false);

    assert_matches!(result, Err(IdaError::Parse { .. }));
    assert!(!workspace.layout.artifact_path(&descriptor).as_std_path().exists());
}

#[test]
fn non_utf8_source_is_a_parse_error() {
    let workspace = Workspace::new();
    let file = IdaFile::new("stars1", 2024, 1).location("Alcala/Madrid/Madrid/Madrid/Spain");
    let descriptor = SourceDescriptor::from_filename(&file.filename()).unwrap();
    let rendered = file.render();
    let (before, after) = rendered.split_once("Alcala/").unwrap();
    let mut latin1 = before.as_bytes().to_vec();
    latin1.extend_from_slice(b"Alcal\xE1/");
    latin1.extend_from_slice(after.as_bytes());
    Layout::write_bytes_atomic(&workspace.layout.raw_path(&descriptor), &latin1).unwrap();

    let result = workspace.transformer().transform(&descriptor, false);

    assert_matches!(result, Err(IdaError::Parse { reason, .. }) if reason.contains("UTF-8"));
    assert!(!workspace.layout.artifact_path(&descriptor).as_std_path().exists());
    assert_eq!(workspace.aux.fingerprints().get(&file.filename()).unwrap(), None);
}

#[test]
fn concurrent_transforms_of_one_file_compute_once() {
    let workspace = Workspace::new();
    let descriptor = workspace.stage(&IdaFile::new("stars1", 2024, 1));
    let transformer = workspace.transformer();

    let outcomes: Vec<TransformOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|_| scope.spawn(|| transformer.transform(&descriptor, false).unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let transformed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, TransformOutcome::Transformed { .. }))
        .count();
    assert_eq!(transformed, 1);
    assert_eq!(
        outcomes.iter().filter(|outcome| **outcome == TransformOutcome::Skipped).count(),
        5
    );
    assert_eq!(workspace.ephemeris.calls(), 3);
}
