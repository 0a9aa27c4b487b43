use std::fs;
use std::io;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheRecord, MetadataCache};
use crate::config::{ArchiveRoots, ResolvedBatch};
use crate::domain::{Band, TileName};
use crate::error::FetchError;
use crate::paths::{CoaddFilename, CoaddPaths, CoaddProduct, PathResolver};
use crate::sources::{SourceCatalog, SourceListFile, SourceProduct, SourceRecord, link_heads};
use crate::transfer::{TransferTool, write_list_file};

/// Everything known about one coadd tile/band: its cache row, the resolved
/// product paths and, when a source catalog is configured, its inputs.
#[derive(Debug, Clone, Serialize)]
pub struct CoaddInfo {
    #[serde(flatten)]
    pub record: CacheRecord,
    pub paths: CoaddPaths,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_info: Option<Vec<SourceRecord>>,
}

impl CoaddInfo {
    pub fn image_path(&self) -> &Utf8Path {
        &self.paths.image.local
    }

    pub fn cat_path(&self) -> &Utf8Path {
        &self.paths.cat.local
    }

    pub fn seg_path(&self) -> &Utf8Path {
        &self.paths.seg.local
    }

    pub fn psf_path(&self) -> &Utf8Path {
        &self.paths.psf.local
    }

    /// Local paths of every file a download fetches: the coadd products,
    /// then each source's image, background, segmap, PSF and header.
    pub fn file_list(&self) -> Result<Vec<&Utf8Path>, FetchError> {
        let mut files = CoaddProduct::ALL
            .iter()
            .map(|product| self.paths.get(*product).local.as_path())
            .collect::<Vec<_>>();
        for source in self.src_info.iter().flatten() {
            for product in SourceProduct::ALL {
                files.push(source.path(product)?);
            }
        }
        Ok(files)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub key: String,
    pub files: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    pub key: String,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Download,
    Remove,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub key: String,
    pub action: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: TransferTool> {
    cache: MetadataCache,
    resolver: PathResolver,
    sources: Option<Box<dyn SourceCatalog>>,
    transfer: T,
}

impl<T: TransferTool> App<T> {
    pub fn new(cache: MetadataCache, roots: ArchiveRoots, transfer: T) -> Self {
        Self {
            cache,
            resolver: PathResolver::new(roots),
            sources: None,
            transfer,
        }
    }

    pub fn with_sources(mut self, sources: Box<dyn SourceCatalog>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    pub fn roots(&self) -> &ArchiveRoots {
        self.resolver.roots()
    }

    pub fn get_info(&self, tile: &TileName, band: Band) -> Result<CoaddInfo, FetchError> {
        self.info_with(tile, band, self.sources.as_deref())
    }

    /// The file list as handed to the transfer tool: archive-relative paths.
    pub fn download_list(&self, info: &CoaddInfo) -> Result<Vec<String>, FetchError> {
        info.file_list()?
            .into_iter()
            .map(|path| {
                self.roots()
                    .relative_to_local(path)
                    .map(|relative| relative.to_string())
            })
            .collect()
    }

    pub fn download(
        &self,
        tile: &TileName,
        band: Band,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, FetchError> {
        let info = self.get_info(tile, band)?;
        self.download_info(&info, sink)
    }

    pub fn remove(
        &self,
        tile: &TileName,
        band: Band,
        sink: &dyn ProgressSink,
    ) -> Result<RemoveResult, FetchError> {
        let info = self.get_info(tile, band)?;
        Ok(self.remove_info(&info, sink))
    }

    /// Download or purge every target of a batch file. Targets missing from
    /// the cache or source list are reported and skipped.
    pub fn run_batch(
        &self,
        batch: &ResolvedBatch,
        mode: BatchMode,
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, FetchError> {
        if let Some(campaign) = &batch.campaign {
            if campaign != self.cache.campaign() {
                return Err(FetchError::CampaignConflict {
                    batch: campaign.to_string(),
                    requested: self.cache.campaign().to_string(),
                });
            }
        }

        let mut items = Vec::new();
        for target in &batch.targets {
            let target_sources = target
                .sources
                .as_deref()
                .map(SourceListFile::open)
                .transpose()?;
            let sources: Option<&dyn SourceCatalog> = match &target_sources {
                Some(list) => Some(list as &dyn SourceCatalog),
                None => self.sources.as_deref(),
            };

            for band in &target.bands {
                let info = match self.info_with(&target.tile, *band, sources) {
                    Ok(info) => info,
                    Err(FetchError::NotFound(key)) => {
                        sink.event(ProgressEvent {
                            message: format!("skipping {key}: not found"),
                            elapsed: None,
                        });
                        items.push(BatchItem {
                            key: format!("{}-{band}", target.tile),
                            action: "skipped".to_string(),
                            detail: Some(format!("{key} not found")),
                        });
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let item = match mode {
                    BatchMode::Download => {
                        let result = self.download_info(&info, sink)?;
                        BatchItem {
                            key: result.key,
                            action: "downloaded".to_string(),
                            detail: Some(format!("{} files", result.files)),
                        }
                    }
                    BatchMode::Remove => {
                        let result = self.remove_info(&info, sink);
                        BatchItem {
                            key: result.key,
                            action: "removed".to_string(),
                            detail: Some(format!("{} files", result.removed.len())),
                        }
                    }
                };
                items.push(item);
            }
        }
        Ok(BatchResult { items })
    }

    fn info_with(
        &self,
        tile: &TileName,
        band: Band,
        sources: Option<&dyn SourceCatalog>,
    ) -> Result<CoaddInfo, FetchError> {
        let record = self.cache.get_info(tile, band)?.clone();
        let paths = self.resolver.resolve(&record)?;

        let src_info = match sources {
            Some(catalog) => {
                let mut src = catalog.sources(tile, band)?;
                let coadd = CoaddFilename::parse(&record.filename)?;
                link_heads(&coadd, &paths.aux_dir, &mut src)?;
                Some(src)
            }
            None => None,
        };

        Ok(CoaddInfo {
            record,
            paths,
            src_info,
        })
    }

    fn download_info(
        &self,
        info: &CoaddInfo,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, FetchError> {
        let relative = self.download_list(info)?;
        let relative = relative.iter().map(Utf8Path::new).collect::<Vec<_>>();
        let list_file = write_list_file(&relative)?;

        sink.event(ProgressEvent {
            message: format!("downloading {} ({} files)", info.record.key, relative.len()),
            elapsed: None,
        });
        let start = Instant::now();
        let outcome = self.transfer.sync(list_file.path(), self.roots());
        drop(list_file);
        outcome?;

        let elapsed = start.elapsed();
        sink.event(ProgressEvent {
            message: format!("downloaded {}", info.record.key),
            elapsed: Some(elapsed),
        });
        Ok(DownloadResult {
            key: info.record.key.clone(),
            files: relative.len(),
            elapsed_ms: elapsed.as_millis(),
        })
    }

    fn remove_info(&self, info: &CoaddInfo, sink: &dyn ProgressSink) -> RemoveResult {
        let mut removed = Vec::new();
        let files = match info.file_list() {
            Ok(files) => files,
            Err(err) => {
                warn!("cannot list files for {}: {err}", info.record.key);
                return RemoveResult {
                    key: info.record.key.clone(),
                    removed,
                };
            }
        };

        for path in files {
            if !path.as_std_path().exists() {
                continue;
            }
            match fs::remove_file(path.as_std_path()) {
                Ok(()) => {
                    info!("removing: {path}");
                    sink.event(ProgressEvent {
                        message: format!("removing: {path}"),
                        elapsed: None,
                    });
                    removed.push(path.to_string());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove {path}: {err}"),
            }
        }

        RemoveResult {
            key: info.record.key.clone(),
            removed,
        }
    }
}
