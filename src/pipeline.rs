use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::auxdb::AuxStore;
use crate::client::IdaClient;
use crate::config::PipelineConfig;
use crate::domain::{InstrumentName, Period, SourceDescriptor};
use crate::ephemeris::EphemerisProvider;
use crate::error::IdaError;
use crate::fetch::{FetchOutcome, FetchSettings, Fetcher};
use crate::layout::Layout;
use crate::merge::{MergeOutcome, MergeRequest, Merger};
use crate::pool::run_bounded;
use crate::selector::Selector;
use crate::transform::{TransformOutcome, Transformer};

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub selector: Selector,
    pub since: Period,
    pub until: Period,
    /// Transform what is already staged instead of fetching.
    pub skip_download: bool,
    pub combine: bool,
    pub out_filename: Option<String>,
}

impl RunRequest {
    pub fn new(selector: Selector, since: Period, until: Period) -> Self {
        Self {
            selector,
            since,
            until,
            skip_download: false,
            combine: false,
            out_filename: None,
        }
    }

    /// An exact file pins the range to its own period.
    fn bounds(&self) -> (Period, Period) {
        match &self.selector {
            Selector::Exact(descriptor) => (descriptor.period(), descriptor.period()),
            _ => (self.since, self.until),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Fetched,
    NotFound,
    Transformed,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Transform,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub instrument: InstrumentName,
    pub period: Period,
    pub filename: String,
    pub state: UnitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitReport {
    fn pending(descriptor: &SourceDescriptor) -> Self {
        Self {
            instrument: descriptor.instrument().clone(),
            period: descriptor.period(),
            filename: descriptor.filename(),
            state: UnitState::Pending,
            failed_stage: None,
            error: None,
        }
    }

    fn fail(&mut self, stage: Stage, err: &IdaError) {
        self.state = UnitState::Failed;
        self.failed_stage = Some(stage);
        self.error = Some(err.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub planned: usize,
    pub fetched: usize,
    pub not_found: usize,
    pub transformed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub instrument: InstrumentName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MergeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub counts: RunCounts,
    /// Instruments needing a stored position and a forced re-run.
    pub missing_position: Vec<InstrumentName>,
    pub merges: Vec<MergeReport>,
    pub deadline_reached: bool,
}

impl RunReport {
    pub fn unit(&self, filename: &str) -> Option<&UnitReport> {
        self.units.iter().find(|unit| unit.filename == filename)
    }

    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0 || self.merges.iter().any(|merge| merge.error.is_some())
    }

    fn tally(&mut self) {
        let fetched = self.counts.fetched;
        self.counts = RunCounts {
            planned: self.units.len(),
            fetched,
            ..RunCounts::default()
        };
        for unit in &self.units {
            match unit.state {
                UnitState::NotFound => self.counts.not_found += 1,
                UnitState::Transformed => self.counts.transformed += 1,
                UnitState::Skipped => self.counts.skipped += 1,
                UnitState::Failed => self.counts.failed += 1,
                UnitState::Cancelled => self.counts.cancelled += 1,
                UnitState::Pending | UnitState::Fetched => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Stages {
    fetch: bool,
    transform: bool,
    combine: bool,
}

pub struct Pipeline<C: IdaClient, E: EphemerisProvider> {
    config: PipelineConfig,
    layout: Layout,
    client: C,
    ephemeris: E,
    aux: AuxStore,
}

impl<C: IdaClient, E: EphemerisProvider> Pipeline<C, E> {
    pub fn new(config: PipelineConfig, client: C, ephemeris: E) -> Result<Self, IdaError> {
        let aux = AuxStore::open(config.aux_store.clone())?;
        Ok(Self::with_store(config, client, ephemeris, aux))
    }

    pub fn with_store(config: PipelineConfig, client: C, ephemeris: E, aux: AuxStore) -> Self {
        Self {
            layout: config.layout(),
            config,
            client,
            ephemeris,
            aux,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn aux(&self) -> &AuxStore {
        &self.aux
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn ephemeris(&self) -> &E {
        &self.ephemeris
    }

    /// Fetch (unless skipped), transform, then combine when requested.
    pub fn run(&self, request: &RunRequest) -> Result<RunReport, IdaError> {
        self.run_stages(
            request,
            Stages {
                fetch: !request.skip_download,
                transform: true,
                combine: request.combine,
            },
        )
    }

    pub fn fetch(&self, request: &RunRequest) -> Result<RunReport, IdaError> {
        self.run_stages(
            request,
            Stages {
                fetch: true,
                transform: false,
                combine: false,
            },
        )
    }

    pub fn transform(&self, request: &RunRequest) -> Result<RunReport, IdaError> {
        self.run_stages(
            request,
            Stages {
                fetch: false,
                transform: true,
                combine: false,
            },
        )
    }

    pub fn combine(&self, request: &RunRequest) -> Result<RunReport, IdaError> {
        self.run_stages(
            request,
            Stages {
                fetch: false,
                transform: false,
                combine: true,
            },
        )
    }

    fn run_stages(&self, request: &RunRequest, stages: Stages) -> Result<RunReport, IdaError> {
        let started = Instant::now();
        let deadline = self.config.deadline.map(|limit| started + limit);
        let expired = || deadline.is_some_and(|deadline| Instant::now() >= deadline);

        let (since, until) = request.bounds();
        if since > until {
            return Err(IdaError::InvalidPeriod(format!("{since} is after {until}")));
        }
        let instruments = request.selector.instruments(&self.aux.positions())?;
        if instruments.is_empty() {
            warn!("selector matched no instruments");
        }

        let descriptors = if stages.fetch {
            self.planned(request, &instruments, since, until)?
        } else if stages.transform {
            self.staged(request, &instruments, since, until)?
        } else {
            Vec::new()
        };
        let mut report = RunReport {
            units: descriptors.iter().map(UnitReport::pending).collect(),
            ..RunReport::default()
        };

        if stages.fetch {
            self.fetch_stage(&descriptors, deadline, &mut report);
        }
        if stages.transform {
            self.transform_stage(&descriptors, stages.fetch, &expired, &mut report)?;
        }
        report.deadline_reached = expired();
        if stages.combine {
            let exclude: HashSet<String> = report
                .units
                .iter()
                .zip(&descriptors)
                .filter(|(unit, _)| !matches!(unit.state, UnitState::Transformed | UnitState::Skipped))
                .map(|(_, descriptor)| descriptor.artifact_filename())
                .collect();
            report.merges = self.combine_stage(request, &instruments, since, until, &exclude);
        }

        report.tally();
        info!(
            fetched = report.counts.fetched,
            not_found = report.counts.not_found,
            transformed = report.counts.transformed,
            skipped = report.counts.skipped,
            failed = report.counts.failed,
            cancelled = report.counts.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    /// Canonical remote files for every instrument and month in range.
    fn planned(
        &self,
        request: &RunRequest,
        instruments: &[InstrumentName],
        since: Period,
        until: Period,
    ) -> Result<Vec<SourceDescriptor>, IdaError> {
        let descriptors = match &request.selector {
            Selector::Exact(descriptor) => vec![descriptor.clone()],
            _ => instruments
                .iter()
                .flat_map(|name| {
                    Period::range(since, until)
                        .into_iter()
                        .map(move |period| SourceDescriptor::canonical(name.clone(), period))
                })
                .collect(),
        };
        match self.config.base_url.as_deref() {
            Some(base_url) => descriptors
                .into_iter()
                .map(|descriptor| descriptor.with_base_url(base_url))
                .collect(),
            None => Ok(descriptors),
        }
    }

    /// Files already staged locally, relocation variants included.
    fn staged(
        &self,
        request: &RunRequest,
        instruments: &[InstrumentName],
        since: Period,
        until: Period,
    ) -> Result<Vec<SourceDescriptor>, IdaError> {
        if let Selector::Exact(descriptor) = &request.selector {
            return Ok(vec![descriptor.clone()]);
        }
        let mut descriptors = Vec::new();
        for name in instruments {
            descriptors.extend(self.layout.staged_sources(name, since, until)?);
        }
        Ok(descriptors)
    }

    fn fetch_stage(
        &self,
        descriptors: &[SourceDescriptor],
        deadline: Option<Instant>,
        report: &mut RunReport,
    ) {
        let settings = FetchSettings {
            concurrency: self.config.concurrency,
            timeout: self.config.timeout,
            deadline,
        };
        let outcomes = Fetcher::new(&self.client, &self.layout).fetch_all(descriptors, &settings);
        for (unit, outcome) in report.units.iter_mut().zip(outcomes) {
            match outcome {
                FetchOutcome::Fetched(_) => {
                    unit.state = UnitState::Fetched;
                    report.counts.fetched += 1;
                }
                FetchOutcome::NotFound => {
                    unit.state = UnitState::NotFound;
                    unit.error = Some("no monthly file on server".to_string());
                }
                FetchOutcome::Failed(err) => unit.fail(Stage::Fetch, &err),
                FetchOutcome::Cancelled => unit.state = UnitState::Cancelled,
            }
        }
    }

    fn transform_stage(
        &self,
        descriptors: &[SourceDescriptor],
        fetched: bool,
        expired: &(dyn Fn() -> bool + Sync),
        report: &mut RunReport,
    ) -> Result<(), IdaError> {
        let ready = if fetched { UnitState::Fetched } else { UnitState::Pending };
        let indices: Vec<usize> = report
            .units
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.state == ready)
            .map(|(index, _)| index)
            .collect();
        info!(files = indices.len(), "transforming");

        let transformer = Transformer::new(&self.aux, &self.layout, &self.ephemeris);
        let abort = AtomicBool::new(false);
        let results = run_bounded(
            &indices,
            self.config.concurrency,
            || abort.load(Ordering::SeqCst) || expired(),
            |&index| {
                let result = transformer.transform(&descriptors[index], self.config.force);
                if result.as_ref().is_err_and(IdaError::is_fatal) {
                    abort.store(true, Ordering::SeqCst);
                }
                result
            },
        );

        let mut missing = BTreeSet::new();
        for (&index, result) in indices.iter().zip(results) {
            let unit = &mut report.units[index];
            match result {
                None => unit.state = UnitState::Cancelled,
                Some(Ok(TransformOutcome::Transformed { .. })) => unit.state = UnitState::Transformed,
                Some(Ok(TransformOutcome::Skipped)) => unit.state = UnitState::Skipped,
                Some(Err(err)) if err.is_fatal() => {
                    error!(error = %err, "auxiliary store failure, aborting run");
                    return Err(err);
                }
                Some(Err(err)) => {
                    if let IdaError::MissingPosition { .. } = err {
                        missing.insert(unit.instrument.clone());
                    }
                    error!(file = %unit.filename, error = %err, "transform failed");
                    unit.fail(Stage::Transform, &err);
                }
            }
        }
        report.missing_position = missing.into_iter().collect();
        if !report.missing_position.is_empty() {
            let names: Vec<&str> = report.missing_position.iter().map(InstrumentName::as_str).collect();
            warn!(
                instruments = ?names,
                "add coordinates for these instruments and re-run with --force"
            );
        }
        Ok(())
    }

    fn combine_stage(
        &self,
        request: &RunRequest,
        instruments: &[InstrumentName],
        since: Period,
        until: Period,
        exclude: &HashSet<String>,
    ) -> Vec<MergeReport> {
        let merger = Merger::new(&self.layout);
        run_bounded(instruments, self.config.concurrency, || false, |name| {
            let merge_request = MergeRequest {
                instrument: name,
                since,
                until,
                out_filename: request.out_filename.as_deref(),
                exclude,
            };
            match merger.merge(&merge_request) {
                Ok(outcome) => MergeReport {
                    instrument: name.clone(),
                    outcome: Some(outcome),
                    error: None,
                },
                Err(err) => {
                    error!(instrument = %name, error = %err, "combine failed");
                    MergeReport {
                        instrument: name.clone(),
                        outcome: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .into_iter()
        .flatten()
        .collect()
    }
}
