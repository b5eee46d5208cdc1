use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, VersionError};

/// A PaperMC release version, e.g. `1.20.4`. The patch component is
/// optional since Mojang ships `x.y` releases (`1.20`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Display for PaperVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for PaperVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('.');

        let major_str = split.next().ok_or(VersionError::MissingMajor)?;
        let minor_str = split.next().ok_or(VersionError::MissingMinor)?;
        let patch_str = split.next();

        if split.next().is_some() {
            return Err(VersionError::ExtraComponents);
        }

        let major = major_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMajor(major_str.to_string()))?;

        let minor = minor_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMinor(minor_str.to_string()))?;

        let patch = match patch_str {
            Some(p) => Some(
                p.parse::<u32>()
                    .map_err(|_| VersionError::IncorrectPatch(p.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

/// The resolved server executable for an instance: which PaperMC version
/// (and optionally which build) its `server.jar` is expected to be. The
/// jar itself is fetched and placed by the download tooling, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSpec {
    pub version: Option<PaperVersion>,
    pub build: Option<u32>,
}

impl Display for PaperSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{version}")?,
            None => write!(f, "latest")?,
        }
        if let Some(build) = self.build {
            write!(f, " build {build}")?;
        }
        Ok(())
    }
}

/// Tool-wide configuration, persisted as JSON under the user config dir.
///
/// The readiness marker and both timeouts are configurable because they
/// vary across PaperMC versions; the defaults below match current
/// releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FujiConfig {
    /// Base directory for all fuji-managed files.
    pub root: PathBuf,
    /// Regex matched against session output to detect a finished startup.
    pub ready_marker: String,
    pub ready_timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub poll_interval_ms: u64,
    /// Flags placed between `java` and `-jar` in the launch command.
    pub java_flags: Vec<String>,
}

impl Default for FujiConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            ready_marker: r"Done \([0-9.]+s\)!".to_string(),
            ready_timeout_secs: 120,
            stop_grace_secs: 30,
            poll_interval_ms: 1000,
            // Subset of Aikar's flags: https://mcflags.emc.gs
            java_flags: vec![
                "-Xms4G".to_string(),
                "-Xmx4G".to_string(),
                "-XX:+UseG1GC".to_string(),
                "-XX:+ParallelRefProcEnabled".to_string(),
                "-XX:MaxGCPauseMillis=200".to_string(),
                "-Dusing.aikars.flags=https://mcflags.emc.gs".to_string(),
            ],
        }
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fuji")
}

impl FujiConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fuji")
            .join("config.json")
    }

    /// Read the persisted configuration, falling back to defaults when the
    /// file is missing or unreadable.
    pub fn load() -> Self {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(err) => {
                    warn!("Ignoring corrupt config at {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), Error> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&path, json)
            .map_err(|e| Error::io(format!("writing {}", path.display()), e))
    }

    /// Create the root directory layout. Refuses to touch a directory that
    /// already exists.
    pub async fn init_root(&self) -> Result<(), Error> {
        if self.root.exists() {
            return Err(Error::Precondition(format!(
                "Directory '{}' already exists",
                self.root.display()
            )));
        }

        for sub in ["backups", "logs", "jars", "servers"] {
            let dir = self.root.join(sub);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;
        }

        Ok(())
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.root.join("servers")
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_release_version() {
        let version = PaperVersion::from_str("1.20.4").unwrap();
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 20);
        assert_eq!(version.patch, Some(4));
        assert_eq!(version.to_string(), "1.20.4");
    }

    #[test]
    fn parses_version_without_patch() {
        let version = PaperVersion::from_str("1.20").unwrap();
        assert_eq!(version.patch, None);
        assert_eq!(version.to_string(), "1.20");
    }

    #[test]
    fn rejects_garbage_components() {
        assert!(matches!(
            PaperVersion::from_str("one.20.4"),
            Err(VersionError::IncorrectMajor(_))
        ));
        assert!(matches!(
            PaperVersion::from_str("1.x.4"),
            Err(VersionError::IncorrectMinor(_))
        ));
        assert!(matches!(
            PaperVersion::from_str("1.20.x"),
            Err(VersionError::IncorrectPatch(_))
        ));
        assert!(matches!(
            PaperVersion::from_str("1.20.4.1"),
            Err(VersionError::ExtraComponents)
        ));
        assert!(matches!(
            PaperVersion::from_str("1"),
            Err(VersionError::MissingMinor)
        ));
    }

    #[test]
    fn paper_spec_displays_latest_when_unpinned() {
        assert_eq!(PaperSpec::default().to_string(), "latest");

        let pinned = PaperSpec {
            version: Some(PaperVersion::from_str("1.20.4").unwrap()),
            build: Some(496),
        };
        assert_eq!(pinned.to_string(), "1.20.4 build 496");
    }

    #[test]
    fn default_root_is_dot_fuji() {
        let config = FujiConfig::default();
        assert!(config.root.ends_with(".fuji"));
        assert!(config.servers_dir().ends_with(".fuji/servers"));
    }
}
