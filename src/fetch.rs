use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::{error, info, warn};

use crate::client::IdaClient;
use crate::domain::SourceDescriptor;
use crate::error::IdaError;
use crate::layout::Layout;
use crate::pool::run_bounded;

/// A staged local copy of one source file.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub descriptor: SourceDescriptor,
    pub path: Utf8PathBuf,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(RawFile),
    NotFound,
    Failed(IdaError),
    /// The run deadline passed before the file was staged.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
}

impl FetchSettings {
    fn expired(&self) -> bool {
        self.deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    fn request_timeout(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.timeout,
        }
    }
}

pub struct Fetcher<'a, C: IdaClient> {
    client: &'a C,
    layout: &'a Layout,
}

impl<'a, C: IdaClient> Fetcher<'a, C> {
    pub fn new(client: &'a C, layout: &'a Layout) -> Self {
        Self { client, layout }
    }

    /// Fetches every descriptor; one outcome per descriptor, in input order.
    pub fn fetch_all(
        &self,
        descriptors: &[SourceDescriptor],
        settings: &FetchSettings,
    ) -> Vec<FetchOutcome> {
        info!(
            files = descriptors.len(),
            concurrency = settings.concurrency,
            "fetching IDA files"
        );
        run_bounded(
            descriptors,
            settings.concurrency,
            || settings.expired(),
            |descriptor| self.fetch_one(descriptor, settings),
        )
        .into_iter()
        .map(|outcome| outcome.unwrap_or(FetchOutcome::Cancelled))
        .collect()
    }

    pub fn fetch_one(&self, descriptor: &SourceDescriptor, settings: &FetchSettings) -> FetchOutcome {
        let file = descriptor.filename();
        if settings.expired() {
            return FetchOutcome::Cancelled;
        }
        match self.client.download(descriptor, settings.request_timeout()) {
            Ok(bytes) => {
                // A download that completes after the deadline is abandoned unstaged.
                if settings.expired() {
                    warn!(file = %file, "deadline reached, discarding download");
                    return FetchOutcome::Cancelled;
                }
                let path = self.layout.raw_path(descriptor);
                if let Err(err) = Layout::write_bytes_atomic(&path, &bytes) {
                    error!(file = %file, error = %err, "cannot stage IDA file");
                    return FetchOutcome::Failed(err);
                }
                info!(file = %file, bytes = bytes.len(), "fetched");
                FetchOutcome::Fetched(RawFile {
                    descriptor: descriptor.clone(),
                    path,
                })
            }
            Err(IdaError::NotFound(_)) => {
                warn!(file = %file, "no monthly file on server");
                FetchOutcome::NotFound
            }
            Err(err) => {
                error!(file = %file, error = %err, "fetch failed");
                FetchOutcome::Failed(err)
            }
        }
    }
}
