use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{Band, Campaign, TileName};
use crate::error::FetchError;

pub const LOCAL_ROOT_VAR: &str = "DESDATA";
pub const REMOTE_ROOT_VAR: &str = "DESREMOTE_RSYNC";
pub const PASSFILE_VAR: &str = "DES_RSYNC_PASSFILE";
pub const CACHE_DIR_VAR: &str = "COADD_FETCH_CACHE_DIR";

/// The two roots every archive-relative path hangs off: the local materialized
/// tree and the remote archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRoots {
    local: Utf8PathBuf,
    remote: Utf8PathBuf,
}

impl ArchiveRoots {
    pub fn new(local: impl Into<Utf8PathBuf>, remote: impl Into<Utf8PathBuf>) -> Self {
        Self {
            local: strip_trailing_slash(local.into()),
            remote: strip_trailing_slash(remote.into()),
        }
    }

    pub fn from_env() -> Result<Self, FetchError> {
        let local = require_env(LOCAL_ROOT_VAR)?;
        let remote = require_env(REMOTE_ROOT_VAR)?;
        Ok(Self::new(local, remote))
    }

    pub fn local(&self) -> &Utf8Path {
        &self.local
    }

    pub fn remote(&self) -> &Utf8Path {
        &self.remote
    }

    /// Strip the local root from an absolute local path, yielding the
    /// archive-relative form used in transfer lists.
    pub fn relative_to_local<'a>(&self, path: &'a Utf8Path) -> Result<&'a Utf8Path, FetchError> {
        path.strip_prefix(&self.local)
            .map_err(|_| FetchError::MalformedPath(format!("{path} is not under {}", self.local)))
    }
}

fn strip_trailing_slash(path: Utf8PathBuf) -> Utf8PathBuf {
    let trimmed = path.as_str().trim_end_matches('/');
    if trimmed.is_empty() {
        path
    } else {
        Utf8PathBuf::from(trimmed)
    }
}

pub fn require_env(name: &str) -> Result<String, FetchError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(FetchError::MissingEnv(name.to_string())),
    }
}

pub fn cache_dir() -> Result<Utf8PathBuf, FetchError> {
    if let Ok(dir) = std::env::var(CACHE_DIR_VAR) {
        if !dir.trim().is_empty() {
            return Ok(Utf8PathBuf::from(dir.trim()));
        }
    }
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.cache_dir().join("coadd-fetch")).ok())
        .ok_or_else(|| FetchError::Filesystem("unable to resolve cache directory".to_string()))
}

pub fn cache_file_name(campaign: &Campaign) -> String {
    format!("{campaign}-coadd-cache.json.gz")
}

pub fn cache_file_path(campaign: &Campaign) -> Result<Utf8PathBuf, FetchError> {
    Ok(cache_dir()?.join(cache_file_name(campaign)))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetEntry {
    Shorthand(String),
    Detailed(TargetEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TargetEntryObject {
    pub tile: String,
    #[serde(default)]
    pub bands: Option<Vec<String>>,
    #[serde(default)]
    pub sources: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub tile: TileName,
    pub bands: Vec<Band>,
    pub sources: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedBatch {
    pub campaign: Option<Campaign>,
    pub targets: Vec<TargetRequest>,
}

impl ResolvedBatch {
    /// Campaign the batch runs against. A campaign named in the file wins
    /// over the default; an explicitly requested one must agree with it.
    pub fn campaign_or(&self, requested: Option<&Campaign>) -> Result<Campaign, FetchError> {
        match (&self.campaign, requested) {
            (Some(batch), Some(requested)) if batch != requested => {
                Err(FetchError::CampaignConflict {
                    batch: batch.to_string(),
                    requested: requested.to_string(),
                })
            }
            (Some(batch), _) => Ok(batch.clone()),
            (None, Some(requested)) => Ok(requested.clone()),
            (None, None) => Ok(Campaign::default()),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &Utf8Path) -> Result<ResolvedBatch, FetchError> {
        let content = fs::read_to_string(path)
            .map_err(|_| FetchError::ConfigRead(path.as_std_path().to_path_buf()))?;
        let config: BatchConfig = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(err.to_string()))?;
        let mut resolved = Self::resolve_config(config)?;

        // relative source lists are resolved against the batch file's directory
        if let Some(base) = path.parent() {
            for target in &mut resolved.targets {
                if let Some(sources) = target.sources.as_mut() {
                    if sources.is_relative() {
                        *sources = base.join(&*sources);
                    }
                }
            }
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: BatchConfig) -> Result<ResolvedBatch, FetchError> {
        let campaign = config
            .campaign
            .map(|value| value.parse::<Campaign>())
            .transpose()?;

        let targets = config
            .targets
            .into_iter()
            .map(|entry| match entry {
                TargetEntry::Shorthand(value) => Ok(TargetRequest {
                    tile: value.parse()?,
                    bands: Band::defaults(),
                    sources: None,
                }),
                TargetEntry::Detailed(obj) => Ok(TargetRequest {
                    tile: obj.tile.parse()?,
                    bands: match obj.bands {
                        Some(bands) => bands
                            .iter()
                            .map(|band| band.parse())
                            .collect::<Result<Vec<Band>, FetchError>>()?,
                        None => Band::defaults(),
                    },
                    sources: obj.sources,
                }),
            })
            .collect::<Result<Vec<_>, FetchError>>()?;

        Ok(ResolvedBatch { campaign, targets })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn roots_drop_trailing_slash() {
        let roots = ArchiveRoots::new("/data/des/", "rsync://archive/desarchive/");
        assert_eq!(roots.local().as_str(), "/data/des");
        assert_eq!(roots.remote().as_str(), "rsync://archive/desarchive");
    }

    #[test]
    fn relative_to_local_strips_root() {
        let roots = ArchiveRoots::new("/data/des", "rsync://archive/desarchive");
        let path = Utf8Path::new("/data/des/OPS/multiepoch/a.fits");
        assert_eq!(
            roots.relative_to_local(path).unwrap().as_str(),
            "OPS/multiepoch/a.fits"
        );
        assert!(
            roots
                .relative_to_local(Utf8Path::new("/elsewhere/a.fits"))
                .is_err()
        );
    }

    #[test]
    fn unset_variable_is_missing_env() {
        let name = "COADD_FETCH_UNSET_FOR_TESTS";
        assert_matches!(
            require_env(name),
            Err(FetchError::MissingEnv(missing)) if missing == name
        );
    }

    #[test]
    fn cache_file_is_keyed_by_campaign() {
        let campaign: Campaign = "y3a1_coadd".parse().unwrap();
        assert_eq!(cache_file_name(&campaign), "Y3A1_COADD-coadd-cache.json.gz");
    }
}
