//! Profile set and archive persistence

use crate::error::ValidationError;
use crate::types::observation::{ArchiveRecord, ObservationArchive};
use crate::types::profile::{ProfileSet, PROFILE_SCHEMA_VERSION};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    schema_version: u32,
}

/// Reads and writes serialized profile sets and archive exports
pub struct ProfileLoader;

impl ProfileLoader {
    /// Load a profile set written by [`ProfileLoader::save`].
    ///
    /// Sets written under another schema version are rejected with
    /// [`ValidationError::UnsupportedProfileVersion`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ProfileSet> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profiles from {}", path.display()))?;

        let header: VersionHeader = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse profiles in {}", path.display()))?;
        if header.schema_version != PROFILE_SCHEMA_VERSION {
            return Err(ValidationError::UnsupportedProfileVersion {
                found: header.schema_version,
                expected: PROFILE_SCHEMA_VERSION,
            }
            .into());
        }

        let set: ProfileSet = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to decode profiles in {}", path.display()))?;

        info!(
            path = %path.display(),
            generation = set.generation,
            subjects = set.subjects.len(),
            hotspots = set.incidents.hotspots.len(),
            "Profiles loaded"
        );
        Ok(set)
    }

    /// Load profiles if the file exists, otherwise start from an empty set.
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Result<ProfileSet> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "Profile file not found, starting with empty profiles");
            Ok(ProfileSet::empty())
        }
    }

    /// Write a profile set; the file is replaced atomically.
    pub fn save<P: AsRef<Path>>(path: P, set: &ProfileSet) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let body = serde_json::to_vec_pretty(set).context("Failed to serialize profiles")?;
        let staging = path.with_extension("tmp");
        fs::write(&staging, body)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        info!(path = %path.display(), generation = set.generation, "Profiles saved");
        Ok(())
    }

    /// Read a JSON-lines archive export. Lines that do not decode, invalid
    /// UTF-8 included, are counted in `rejected_records` and otherwise
    /// ignored. Only I/O failures abort the load.
    pub fn load_archive<P: AsRef<Path>>(path: P) -> Result<ObservationArchive> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open archive {}", path.display()))?;

        let mut reader = BufReader::new(file);
        let mut archive = ObservationArchive::default();
        let mut line = Vec::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if read == 0 {
                break;
            }
            line_no += 1;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<ArchiveRecord>(&line) {
                Ok(record) => archive.push(record),
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping undecodable archive record");
                    archive.rejected_records += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            observations = archive.observations.len(),
            incidents = archive.incidents.len(),
            rejected = archive.rejected_records,
            "Archive loaded"
        );
        Ok(archive)
    }
}
