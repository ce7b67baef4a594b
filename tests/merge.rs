mod common;

use std::collections::HashSet;
use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tempfile::TempDir;

use tess_ida::artifact::Artifact;
use tess_ida::auxdb::AuxStore;
use tess_ida::domain::{InstrumentName, Period, SourceDescriptor};
use tess_ida::error::IdaError;
use tess_ida::layout::Layout;
use tess_ida::merge::{MergeRequest, MergeWarning, Merger};
use tess_ida::transform::Transformer;

use common::{FixedEphemeris, IdaFile};

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

    /// Stages and transforms `files`, leaving one artifact each.
    fn artifacts(&self, files: &[IdaFile]) {
        let transformer = Transformer::new(&self.aux, &self.layout, &self.ephemeris);
        for file in files {
            let descriptor = SourceDescriptor::from_filename(&file.filename()).unwrap();
            Layout::write_bytes_atomic(&self.layout.raw_path(&descriptor), file.render().as_bytes())
                .unwrap();
            transformer.transform(&descriptor, false).unwrap();
        }
    }
}

fn stars1() -> InstrumentName {
    "stars1".parse().unwrap()
}

fn period(month: u32) -> Period {
    Period::new(2024, month).unwrap()
}

fn merged_metadata(path: &Utf8Path) -> Value {
    let content = fs::read_to_string(path).unwrap();
    let meta = content
        .lines()
        .nth(1)
        .and_then(|line| line.strip_prefix("# meta: "))
        .unwrap();
    serde_json::from_str(meta).unwrap()
}

#[test]
fn merging_twice_is_byte_identical() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 1),
        IdaFile::new("stars1", 2024, 2),
    ]);
    let name = stars1();
    let exclude = HashSet::new();
    let request = MergeRequest {
        instrument: &name,
        since: period(1),
        until: period(2),
        out_filename: None,
        exclude: &exclude,
    };
    let merger = Merger::new(&workspace.layout);

    let first = merger.merge(&request).unwrap();
    let bytes = fs::read(&first.path).unwrap();
    let second = merger.merge(&request).unwrap();

    assert_eq!(fs::read(&second.path).unwrap(), bytes);
    assert!(first.path.as_str().ends_with("stars1_202401-202402.ecsv"));
    assert_eq!(first.rows, 6);
    assert_eq!(first.combined, vec!["stars1_2024-01.ecsv", "stars1_2024-02.ecsv"]);
    assert!(first.warnings.is_empty());

    let metadata = merged_metadata(&first.path);
    assert_eq!(
        metadata["combined"],
        serde_json::json!(["stars1_2024-01.ecsv", "stars1_2024-02.ecsv"])
    );
}

#[test]
fn rows_follow_period_order() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 3),
        IdaFile::new("stars1", 2024, 1),
        IdaFile::new("stars1", 2024, 2),
    ]);
    let name = stars1();
    let exclude = HashSet::new();
    let outcome = Merger::new(&workspace.layout)
        .merge(&MergeRequest {
            instrument: &name,
            since: period(1),
            until: period(3),
            out_filename: Some("all.ecsv"),
            exclude: &exclude,
        })
        .unwrap();

    assert!(outcome.path.as_str().ends_with("stars1/all.ecsv"));
    let content = fs::read_to_string(&outcome.path).unwrap();
    let times: Vec<&str> = content
        .lines()
        .skip(3)
        .map(|line| line.split(',').next().unwrap())
        .collect();
    let mut sorted = times.clone();
    sorted.sort();
    assert_eq!(times.len(), 9);
    assert_eq!(times, sorted);
}

#[test]
fn latest_metadata_wins_on_conflict() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 1).location("A/Madrid/Madrid/Madrid/Spain"),
        IdaFile::new("stars1", 2024, 2).location("A/Madrid/Madrid/Madrid/Spain"),
        IdaFile::new("stars1", 2024, 3).location("B/Madrid/Madrid/Madrid/Spain"),
    ]);
    let name = stars1();
    let exclude = HashSet::new();
    let outcome = Merger::new(&workspace.layout)
        .merge(&MergeRequest {
            instrument: &name,
            since: period(1),
            until: period(3),
            out_filename: None,
            exclude: &exclude,
        })
        .unwrap();

    assert_eq!(
        outcome.warnings,
        vec![MergeWarning::MetadataConflict {
            fields: vec!["Location name".to_string()],
        }]
    );
    let metadata = merged_metadata(&outcome.path);
    assert_eq!(metadata["Location name"]["place"], "B");
    assert_eq!(outcome.rows, 9);
}

#[test]
fn missing_periods_are_reported_as_gaps() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 1),
        IdaFile::new("stars1", 2024, 3),
    ]);
    let name = stars1();
    let exclude = HashSet::new();
    let outcome = Merger::new(&workspace.layout)
        .merge(&MergeRequest {
            instrument: &name,
            since: period(1),
            until: period(4),
            out_filename: None,
            exclude: &exclude,
        })
        .unwrap();

    assert_eq!(
        outcome.warnings,
        vec![
            MergeWarning::Gap { period: period(2) },
            MergeWarning::Gap { period: period(4) },
        ]
    );
    assert_eq!(outcome.rows, 6);
}

#[test]
fn excluded_artifacts_count_as_gaps() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 1),
        IdaFile::new("stars1", 2024, 2),
    ]);
    let name = stars1();
    let exclude: HashSet<String> = ["stars1_2024-02.ecsv".to_string()].into_iter().collect();
    let outcome = Merger::new(&workspace.layout)
        .merge(&MergeRequest {
            instrument: &name,
            since: period(1),
            until: period(2),
            out_filename: None,
            exclude: &exclude,
        })
        .unwrap();

    assert_eq!(outcome.combined, vec!["stars1_2024-01.ecsv"]);
    assert_eq!(outcome.warnings, vec![MergeWarning::Gap { period: period(2) }]);
}

#[test]
fn differing_columns_fail_the_merge() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 1),
        IdaFile::new("stars1", 2024, 2),
    ]);
    let path = workspace.layout.artifact_path(
        &SourceDescriptor::from_filename("stars1_2024-02.dat").unwrap(),
    );
    let mut artifact = Artifact::read(&path).unwrap();
    artifact.layout.azimuth = true;
    for row in &mut artifact.rows {
        row.sun_azimuth = Some(310.46);
        row.moon_azimuth = Some(95.5);
    }
    artifact.write(&path).unwrap();

    let name = stars1();
    let exclude = HashSet::new();
    let result = Merger::new(&workspace.layout).merge(&MergeRequest {
        instrument: &name,
        since: period(1),
        until: period(2),
        out_filename: None,
        exclude: &exclude,
    });

    assert_matches!(result, Err(IdaError::ColumnMismatch { ref file }) if file == "stars1_2024-02.ecsv");
}

#[test]
fn nothing_to_merge_is_not_found() {
    let workspace = Workspace::new();
    let name = stars1();
    let exclude = HashSet::new();
    let result = Merger::new(&workspace.layout).merge(&MergeRequest {
        instrument: &name,
        since: period(1),
        until: period(2),
        out_filename: None,
        exclude: &exclude,
    });

    assert_matches!(result, Err(IdaError::NotFound(_)));
}

#[test]
fn out_filename_naming_a_period_artifact_is_rejected() {
    let workspace = Workspace::new();
    workspace.artifacts(&[
        IdaFile::new("stars1", 2024, 1),
        IdaFile::new("stars1", 2024, 2),
    ]);
    let name = stars1();
    let artifact = workspace
        .layout
        .instrument_ecsv_dir(&name)
        .join("stars1_2024-02.ecsv");
    let before = fs::read(&artifact).unwrap();
    let exclude = HashSet::new();

    let result = Merger::new(&workspace.layout).merge(&MergeRequest {
        instrument: &name,
        since: period(1),
        until: period(2),
        out_filename: Some("stars1_2024-02.ecsv"),
        exclude: &exclude,
    });

    assert_matches!(result, Err(IdaError::InvalidConfig(_)));
    assert_eq!(fs::read(&artifact).unwrap(), before);
}
