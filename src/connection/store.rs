//! Persistent record of the active tunnel route.
//!
//! A record that survives a restart means the previous process never
//! disconnected cleanly and a tunnel may still be up.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Route, RouteId};

/// What is remembered about the active route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub route_id: RouteId,
    pub name: String,
    pub interface: Option<String>,
    #[serde(with = "humantime_serde")]
    pub connected_at: SystemTime,
}

impl ActiveRecord {
    pub fn for_route(route: &Route) -> Self {
        Self {
            route_id: route.id.clone(),
            name: route.name.clone(),
            interface: route.interface.clone(),
            connected_at: SystemTime::now(),
        }
    }
}

/// TOML file holding at most one [`ActiveRecord`].
#[derive(Debug, Clone)]
pub struct ActiveRouteStore {
    path: PathBuf,
}

impl ActiveRouteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the platform data directory.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "routescout", "routescout").map_or_else(
            || PathBuf::from("routescout-active.toml"),
            |dirs| dirs.data_dir().join("active-route.toml"),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, if any.
    pub fn load(&self) -> Result<Option<ActiveRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {e}", self.path.display())))
    }

    /// Remember `route` as active, replacing any previous record.
    pub fn save(&self, route: &Route) -> Result<()> {
        let record = ActiveRecord::for_route(route);
        let content = toml::to_string_pretty(&record)
            .map_err(|e| Error::Config(format!("Failed to serialize active route: {e}")))?;

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // Write-then-rename so a crash never leaves half a record.
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Forget the active route. Missing file is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
