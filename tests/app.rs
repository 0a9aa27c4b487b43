use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use coadd_fetch::app::{App, BatchMode, ProgressEvent, ProgressSink};
use coadd_fetch::cache::{CacheRecord, MetadataCache};
use coadd_fetch::config::{ArchiveRoots, BatchConfig, ConfigLoader, TargetEntry, TargetEntryObject};
use coadd_fetch::domain::{Band, Campaign, TileName};
use coadd_fetch::error::FetchError;
use coadd_fetch::sources::{SourceCatalog, SourceRecord};
use coadd_fetch::transfer::TransferTool;

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

#[derive(Default)]
struct MockTransfer {
    fail: bool,
    list_files: Mutex<Vec<PathBuf>>,
    contents: Mutex<Vec<String>>,
}

impl MockTransfer {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl TransferTool for MockTransfer {
    fn sync(&self, list_file: &Path, _roots: &ArchiveRoots) -> Result<(), FetchError> {
        self.list_files.lock().unwrap().push(list_file.to_path_buf());
        self.contents
            .lock()
            .unwrap()
            .push(std::fs::read_to_string(list_file).unwrap());
        if self.fail {
            return Err(FetchError::ToolFailure {
                tool: "rsync".to_string(),
                status: "23".to_string(),
            });
        }
        Ok(())
    }
}

struct MockSources {
    root: Utf8PathBuf,
}

impl SourceCatalog for MockSources {
    fn sources(&self, _tile: &TileName, _band: Band) -> Result<Vec<SourceRecord>, FetchError> {
        let dir = self.root.join("OPS/finalcut/Y2A1/r1234/D00123456/p01");
        Ok(["c01", "c02"]
            .into_iter()
            .map(|ccd| {
                let stem = format!("D00123456_i_{ccd}_r1234p01");
                SourceRecord {
                    filename: format!("{stem}_immasked.fits"),
                    image_path: dir.join(format!("red/immask/{stem}_immasked.fits.fz")),
                    bkg_path: dir.join(format!("red/bkg/{stem}_bkg.fits.fz")),
                    seg_path: dir.join(format!("seg/{stem}_segmap.fits.fz")),
                    psf_path: dir.join(format!("psf/{stem}_psfexcat.psf")),
                    head_path: None,
                    extra: Default::default(),
                }
            })
            .collect())
    }
}

fn record() -> CacheRecord {
    CacheRecord {
        key: "DES0215-0458-i".to_string(),
        tile_name: "DES0215-0458".parse().unwrap(),
        band: "i".parse().unwrap(),
        relative_path: "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/coadd".to_string(),
        filename: "DES0215-0458_r2577p01_i.fits".to_string(),
        compression_suffix: ".fz".to_string(),
        attempt_id: 42,
    }
}

fn local_root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("desdata")).unwrap()
}

fn app<T: TransferTool>(temp: &tempfile::TempDir, transfer: T, with_sources: bool) -> App<T> {
    let root = local_root(temp);
    let cache = MetadataCache::from_records(Campaign::default(), vec![record()]);
    let roots = ArchiveRoots::new(root.clone(), "rsync://archive/desarchive");
    let app = App::new(cache, roots, transfer);
    if with_sources {
        app.with_sources(Box::new(MockSources { root }))
    } else {
        app
    }
}

fn target() -> (TileName, Band) {
    ("DES0215-0458".parse().unwrap(), "i".parse().unwrap())
}

fn touch(path: &Utf8Path) {
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(path.as_std_path(), b"x").unwrap();
}

#[test]
fn info_without_sources_has_no_src_info() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), false);
    let (tile, band) = target();

    let info = app.get_info(&tile, band).unwrap();
    assert!(info.src_info.is_none());
    assert_eq!(info.file_list().unwrap().len(), 4);
    assert_eq!(
        info.image_path().file_name(),
        Some("DES0215-0458_r2577p01_i.fits.fz")
    );
}

#[test]
fn file_list_orders_coadd_then_sources() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), true);
    let (tile, band) = target();

    let info = app.get_info(&tile, band).unwrap();
    let relative = app.download_list(&info).unwrap();
    assert_eq!(relative.len(), 4 + 2 * 5);
    assert_eq!(
        &relative[..4],
        &[
            "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/coadd/DES0215-0458_r2577p01_i.fits.fz",
            "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/cat/DES0215-0458_r2577p01_i_cat.fits",
            "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/seg/DES0215-0458_r2577p01_i_segmap.fits",
            "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/psf/DES0215-0458_r2577p01_i_psfcat.psf",
        ]
    );
    assert!(relative[4].ends_with("D00123456_i_c01_r1234p01_immasked.fits.fz"));
    assert!(relative[5].ends_with("D00123456_i_c01_r1234p01_bkg.fits.fz"));
    assert!(relative[6].ends_with("D00123456_i_c01_r1234p01_segmap.fits.fz"));
    assert!(relative[7].ends_with("D00123456_i_c01_r1234p01_psfexcat.psf"));
    assert_eq!(
        relative[8],
        "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/aux/DES0215-0458_r2577p01_D00123456_i_c01_scamp.ohead"
    );
    assert!(relative[9].contains("_c02_"));
}

#[test]
fn download_writes_relative_list_and_cleans_up() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), true);
    let (tile, band) = target();
    let sink = RecordingSink::default();

    let result = app.download(&tile, band, &sink).unwrap();
    assert_eq!(result.key, "DES0215-0458-i");
    assert_eq!(result.files, 14);

    let info = app.get_info(&tile, band).unwrap();
    let expected = app
        .download_list(&info)
        .unwrap()
        .into_iter()
        .map(|line| format!("{line}\n"))
        .collect::<String>();
    let list_files = app_list_files(&app);
    assert_eq!(list_files.len(), 1);
    assert!(!list_files[0].exists());
    assert_eq!(app_contents(&app), vec![expected]);
}

#[test]
fn failed_download_still_removes_list_file() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::failing(), false);
    let (tile, band) = target();

    let err = app
        .download(&tile, band, &RecordingSink::default())
        .unwrap_err();
    assert_matches!(err, FetchError::ToolFailure { .. });

    let list_files = app_list_files(&app);
    assert_eq!(list_files.len(), 1);
    assert!(!list_files[0].exists());
}

#[test]
fn download_of_unknown_tile_never_invokes_tool() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), false);
    let tile: TileName = "DES9999-9999".parse().unwrap();

    let err = app
        .download(&tile, "i".parse().unwrap(), &RecordingSink::default())
        .unwrap_err();
    assert_matches!(err, FetchError::NotFound(_));
    assert!(app_list_files(&app).is_empty());
}

#[test]
fn remove_deletes_present_files_and_tolerates_missing() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), true);
    let (tile, band) = target();

    let info = app.get_info(&tile, band).unwrap();
    let files = info
        .file_list()
        .unwrap()
        .into_iter()
        .map(Utf8Path::to_path_buf)
        .collect::<Vec<_>>();
    // only some of the files were ever materialized
    for path in files.iter().step_by(2) {
        touch(path);
    }

    let sink = RecordingSink::default();
    let result = app.remove(&tile, band, &sink).unwrap();
    assert_eq!(result.removed.len(), files.len().div_ceil(2));
    assert_eq!(sink.messages.lock().unwrap().len(), result.removed.len());
    assert!(files.iter().all(|path| !path.as_std_path().exists()));

    let again = app.remove(&tile, band, &sink).unwrap();
    assert!(again.removed.is_empty());
}

#[test]
fn batch_skips_missing_bands() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), false);

    let batch = ConfigLoader::resolve_config(BatchConfig {
        campaign: None,
        targets: vec![TargetEntry::Detailed(TargetEntryObject {
            tile: "DES0215-0458".to_string(),
            bands: Some(vec!["i".to_string(), "z".to_string()]),
            sources: None,
        })],
    })
    .unwrap();

    let result = app
        .run_batch(&batch, BatchMode::Download, &RecordingSink::default())
        .unwrap();
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[0].action, "downloaded");
    assert_eq!(result.items[1].action, "skipped");
    assert_eq!(result.items[1].key, "DES0215-0458-z");
    assert_eq!(app_list_files(&app).len(), 1);
}

#[test]
fn batch_for_another_campaign_touches_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let app = app(&temp, MockTransfer::default(), false);
    assert_eq!(app.cache().campaign(), &Campaign::default());

    let batch = ConfigLoader::resolve_config(BatchConfig {
        campaign: Some("Y6A2_COADD".to_string()),
        targets: vec![TargetEntry::Shorthand("DES0215-0458".to_string())],
    })
    .unwrap();

    let err = app
        .run_batch(&batch, BatchMode::Download, &RecordingSink::default())
        .unwrap_err();
    assert_matches!(
        err,
        FetchError::CampaignConflict { batch, requested }
            if batch == "Y6A2_COADD" && requested == "Y3A1_COADD"
    );
    assert!(app_list_files(&app).is_empty());
}

fn app_list_files(app: &App<MockTransfer>) -> Vec<PathBuf> {
    app.transfer().list_files.lock().unwrap().clone()
}

fn app_contents(app: &App<MockTransfer>) -> Vec<String> {
    app.transfer().contents.lock().unwrap().clone()
}
