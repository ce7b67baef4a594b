use std::io::{self, Write};

use serde::Serialize;

use crate::merge::MergeWarning;
use crate::pipeline::{RunReport, UnitState};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write_report(&mut stdout, report)
    }

    /// One line per unit, then merges and totals.
    pub fn write_report(out: &mut impl Write, report: &RunReport) -> io::Result<()> {
        for unit in &report.units {
            let state = state_label(unit.state);
            match &unit.error {
                Some(error) if unit.state == UnitState::Failed => {
                    writeln!(out, "{state:<12} {}  {error}", unit.filename)?
                }
                _ => writeln!(out, "{state:<12} {}", unit.filename)?,
            }
        }
        for merge in &report.merges {
            match (&merge.outcome, &merge.error) {
                (Some(outcome), _) => {
                    writeln!(
                        out,
                        "combined     {} ({} files, {} rows)",
                        outcome.path,
                        outcome.combined.len(),
                        outcome.rows
                    )?;
                    for warning in &outcome.warnings {
                        match warning {
                            MergeWarning::Gap { period } => writeln!(out, "  gap: {period}")?,
                            MergeWarning::MetadataConflict { fields } => {
                                writeln!(out, "  metadata differs: {}", fields.join(", "))?
                            }
                        }
                    }
                }
                (None, Some(error)) => writeln!(out, "not combined {}  {error}", merge.instrument)?,
                (None, None) => {}
            }
        }
        if !report.missing_position.is_empty() {
            let names: Vec<&str> = report
                .missing_position
                .iter()
                .map(|name| name.as_str())
                .collect();
            writeln!(
                out,
                "missing coordinates: {} (add them with `coords add`, then re-run with --force)",
                names.join(", ")
            )?;
        }
        let counts = &report.counts;
        writeln!(
            out,
            "{} planned, {} fetched, {} not found, {} transformed, {} skipped, {} failed, {} cancelled",
            counts.planned,
            counts.fetched,
            counts.not_found,
            counts.transformed,
            counts.skipped,
            counts.failed,
            counts.cancelled
        )?;
        if report.deadline_reached {
            writeln!(out, "deadline reached")?;
        }
        Ok(())
    }
}

fn state_label(state: UnitState) -> &'static str {
    match state {
        UnitState::Pending => "pending",
        UnitState::Fetched => "fetched",
        UnitState::NotFound => "not found",
        UnitState::Transformed => "transformed",
        UnitState::Skipped => "unchanged",
        UnitState::Failed => "failed",
        UnitState::Cancelled => "cancelled",
    }
}
