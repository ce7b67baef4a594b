mod common;

use std::fs;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use tess_ida::domain::{Period, SourceDescriptor};
use tess_ida::fetch::{FetchOutcome, FetchSettings, Fetcher};
use tess_ida::layout::Layout;

use common::{IdaFile, MockIdaClient};

fn settings() -> FetchSettings {
    FetchSettings {
        concurrency: 2,
        timeout: Duration::from_secs(5),
        deadline: None,
    }
}

fn descriptor(month: u32) -> SourceDescriptor {
    SourceDescriptor::canonical("stars1".parse().unwrap(), Period::new(2024, month).unwrap())
}

#[test]
fn fetched_file_overwrites_staged_copy() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let layout = Layout::new(root.join("IDA"), root.join("ECSV"));
    let client = MockIdaClient::new();
    let fetcher = Fetcher::new(&client, &layout);

    let first = IdaFile::new("stars1", 2024, 1);
    client.serve(&first.filename(), first.render().into_bytes());
    assert_matches!(fetcher.fetch_one(&descriptor(1), &settings()), FetchOutcome::Fetched(_));

    let changed = IdaFile::new("stars1", 2024, 1).sky_temperature(-3.0);
    client.serve(&changed.filename(), changed.render().into_bytes());
    let outcome = fetcher.fetch_one(&descriptor(1), &settings());

    let FetchOutcome::Fetched(raw) = outcome else {
        panic!("expected a fetched file, got {outcome:?}");
    };
    assert_eq!(raw.path, root.join("IDA/stars1/stars1_2024-01.dat"));
    assert_eq!(fs::read_to_string(&raw.path).unwrap(), changed.render());
}

#[test]
fn one_failure_does_not_stop_the_others() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let layout = Layout::new(root.join("IDA"), root.join("ECSV"));
    let client = MockIdaClient::new()
        .with_file(&IdaFile::new("stars1", 2024, 1))
        .with_file(&IdaFile::new("stars1", 2024, 3))
        .failing("stars1_2024-02.dat");

    let outcomes = Fetcher::new(&client, &layout)
        .fetch_all(&[descriptor(1), descriptor(2), descriptor(3), descriptor(4)], &settings());

    assert_matches!(outcomes[0], FetchOutcome::Fetched(_));
    assert_matches!(outcomes[1], FetchOutcome::Failed(_));
    assert_matches!(outcomes[2], FetchOutcome::Fetched(_));
    assert_matches!(outcomes[3], FetchOutcome::NotFound);
    assert!(!layout.raw_path(&descriptor(2)).as_std_path().exists());
    assert!(!layout.raw_path(&descriptor(4)).as_std_path().exists());
}

#[test]
fn passed_deadline_fetches_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let layout = Layout::new(root.join("IDA"), root.join("ECSV"));
    let client = MockIdaClient::new().with_file(&IdaFile::new("stars1", 2024, 1));
    let settings = FetchSettings {
        deadline: Some(Instant::now()),
        ..settings()
    };

    let outcomes = Fetcher::new(&client, &layout).fetch_all(&[descriptor(1)], &settings);

    assert_matches!(outcomes[0], FetchOutcome::Cancelled);
    assert_eq!(client.calls(), 0);
}
