//! Filesystem-backed instance repository.
//!
//! One directory per instance uuid, one JSON file per fragment. Writes go
//! through a sibling temp file and an atomic rename so a crash mid-write
//! never leaves a half-written fragment behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use session_core::InstanceDocument;

use crate::error::PersistenceError;
use crate::persistence::{InstanceBundle, LoadReport};

const ROOT_FRAGMENT: &str = "instance.json";
const TASKS_FRAGMENT: &str = "tasks.json";
const PARTICIPANTS_FRAGMENT: &str = "participants.json";
const SETTINGS_FRAGMENT: &str = "settings.json";
const CUSTOM_FRAGMENT: &str = "custom.json";

/// Stores instance bundles under `<root>/<uuid>/`.
pub struct FileInstanceRepository {
    root: PathBuf,
}

impl FileInstanceRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instance_dir(&self, uuid: Uuid) -> PathBuf {
        self.root.join(uuid.to_string())
    }

    /// Writes every fragment of the bundle, keyed by its root uuid.
    pub fn save(&self, bundle: &InstanceBundle) -> Result<(), PersistenceError> {
        let dir = self.instance_dir(bundle.instance.uuid);
        fs::create_dir_all(&dir)?;

        write_fragment(&dir, ROOT_FRAGMENT, &bundle.instance)?;
        write_fragment(&dir, TASKS_FRAGMENT, &bundle.scheduler)?;
        write_fragment(&dir, PARTICIPANTS_FRAGMENT, &bundle.participants)?;
        write_fragment(&dir, SETTINGS_FRAGMENT, &bundle.settings)?;
        write_fragment(&dir, CUSTOM_FRAGMENT, &bundle.custom)?;

        tracing::debug!(
            target: "runtime::persistence",
            instance = %bundle.instance.uuid,
            path = %dir.display(),
            "bundle saved"
        );
        Ok(())
    }

    /// Loads a bundle. The root fragment must be present and well-formed;
    /// any other fragment that is missing or corrupt falls back to its
    /// default and is listed in the report.
    pub fn load(&self, uuid: Uuid) -> Result<(InstanceBundle, LoadReport), PersistenceError> {
        let dir = self.instance_dir(uuid);
        let root_bytes = match fs::read(dir.join(ROOT_FRAGMENT)) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound(uuid));
            }
            Err(error) => return Err(error.into()),
        };
        let instance: InstanceDocument = serde_json::from_slice(&root_bytes)
            .map_err(|e| PersistenceError::Json(format!("{ROOT_FRAGMENT}: {e}")))?;

        let mut report = LoadReport::default();
        let bundle = InstanceBundle {
            instance,
            scheduler: read_fragment(&dir, TASKS_FRAGMENT, &mut report),
            participants: read_fragment(&dir, PARTICIPANTS_FRAGMENT, &mut report),
            settings: read_fragment(&dir, SETTINGS_FRAGMENT, &mut report),
            custom: read_fragment::<Value>(&dir, CUSTOM_FRAGMENT, &mut report),
        };
        Ok((bundle, report))
    }

    /// Uuids of every bundle stored under the root.
    pub fn list(&self) -> Result<Vec<Uuid>, PersistenceError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        let mut uuids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(uuid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<Uuid>().ok())
            {
                uuids.push(uuid);
            }
        }
        uuids.sort_unstable();
        Ok(uuids)
    }

    /// Removes a stored bundle. Returns false if none existed.
    pub fn delete(&self, uuid: Uuid) -> Result<bool, PersistenceError> {
        let dir = self.instance_dir(uuid);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

fn write_fragment<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PersistenceError::Json(format!("{name}: {e}")))?;
    let tmp = dir.join(format!("{name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, dir.join(name))?;
    Ok(())
}

fn read_fragment<T: DeserializeOwned + Default>(
    dir: &Path,
    name: &str,
    report: &mut LoadReport,
) -> T {
    let degrade = |error: &dyn std::fmt::Display, report: &mut LoadReport| {
        tracing::warn!(
            target: "runtime::persistence",
            fragment = name,
            error = %error,
            "fragment unreadable, using defaults"
        );
        report.degraded_fragments.push(name.to_owned());
        T::default()
    };
    match fs::read(dir.join(name)) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(error) => degrade(&error, report),
        },
        Err(error) => degrade(&error, report),
    }
}
