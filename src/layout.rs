use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{InstrumentName, Period, SourceDescriptor, UnitName};
use crate::error::IdaError;

/// On-disk layout: `<ida_root>/<instrument>/<file>.dat` for staged sources and
/// `<ecsv_root>/<instrument>/<file>.ecsv` for artifacts.
#[derive(Debug, Clone)]
pub struct Layout {
    ida_root: Utf8PathBuf,
    ecsv_root: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub unit: UnitName,
    pub path: Utf8PathBuf,
}

impl ArtifactEntry {
    pub fn filename(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }
}

impl Layout {
    pub fn new(ida_root: Utf8PathBuf, ecsv_root: Utf8PathBuf) -> Self {
        Self {
            ida_root,
            ecsv_root,
        }
    }

    pub fn ecsv_root(&self) -> &Utf8Path {
        &self.ecsv_root
    }

    pub fn instrument_ida_dir(&self, name: &InstrumentName) -> Utf8PathBuf {
        self.ida_root.join(name.as_str())
    }

    pub fn instrument_ecsv_dir(&self, name: &InstrumentName) -> Utf8PathBuf {
        self.ecsv_root.join(name.as_str())
    }

    pub fn raw_path(&self, descriptor: &SourceDescriptor) -> Utf8PathBuf {
        self.instrument_ida_dir(descriptor.instrument())
            .join(descriptor.filename())
    }

    pub fn artifact_path(&self, descriptor: &SourceDescriptor) -> Utf8PathBuf {
        self.instrument_ecsv_dir(descriptor.instrument())
            .join(descriptor.artifact_filename())
    }

    pub fn combined_path(
        &self,
        name: &InstrumentName,
        since: Period,
        until: Period,
        out_filename: Option<&str>,
    ) -> Result<Utf8PathBuf, IdaError> {
        let filename = match out_filename {
            // A per-period name would overwrite that period's artifact.
            Some(filename) if UnitName::parse(filename, "ecsv").is_ok() => {
                return Err(IdaError::InvalidConfig(format!(
                    "output file name {filename} collides with a per-period artifact"
                )));
            }
            Some(filename) => filename.to_string(),
            None => format!("{}_{}-{}.ecsv", name, since.compact(), until.compact()),
        };
        Ok(self.instrument_ecsv_dir(name).join(filename))
    }

    /// Staged source files of `name` whose period lies in `periods`, in file name order.
    pub fn staged_sources(
        &self,
        name: &InstrumentName,
        since: Period,
        until: Period,
    ) -> Result<Vec<SourceDescriptor>, IdaError> {
        let mut sources = Vec::new();
        for filename in list_files(&self.instrument_ida_dir(name), "dat")? {
            let Ok(descriptor) = SourceDescriptor::from_filename(&filename) else {
                tracing::debug!(file = %filename, "ignoring non IDA file");
                continue;
            };
            if descriptor.instrument() == name
                && descriptor.period() >= since
                && descriptor.period() <= until
            {
                sources.push(descriptor);
            }
        }
        Ok(sources)
    }

    /// Per-period artifacts of `name`, ordered by period then relocation index.
    pub fn artifacts(&self, name: &InstrumentName) -> Result<Vec<ArtifactEntry>, IdaError> {
        let dir = self.instrument_ecsv_dir(name);
        let mut entries = Vec::new();
        for filename in list_files(&dir, "ecsv")? {
            let Ok(unit) = UnitName::parse(&filename, "ecsv") else {
                continue;
            };
            if &unit.instrument != name {
                continue;
            }
            entries.push(ArtifactEntry {
                path: dir.join(&filename),
                unit,
            });
        }
        entries.sort_by(|a, b| {
            (a.unit.period, a.unit.relocation).cmp(&(b.unit.period, b.unit.relocation))
        });
        Ok(entries)
    }

    /// Writes to a sibling temporary file and renames it over `path`.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IdaError> {
        let parent = path
            .parent()
            .ok_or_else(|| IdaError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IdaError::Filesystem(format!("create {parent}: {err}")))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".tess-ida")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| IdaError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| IdaError::Filesystem(format!("write {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| IdaError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

fn list_files(dir: &Utf8Path, extension: &str) -> Result<Vec<String>, IdaError> {
    if !dir.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let entries =
        fs::read_dir(dir.as_std_path()).map_err(|err| IdaError::Filesystem(format!("{dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| IdaError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().map(|ext| ext != extension).unwrap_or(true) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
