use std::collections::HashMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{Band, CacheKey, TileName};
use crate::error::FetchError;
use crate::paths::{CoaddFilename, ProductLocation};

/// Leading characters of a single-epoch filename that identify its exposure
/// and CCD, e.g. `D00123456_i_c01` in `D00123456_i_c01_r1234p01_immasked.fits`.
pub const SOURCE_ID_WIDTH: usize = 15;

const HEAD_SUFFIX: &str = "_scamp.ohead";

/// Single-epoch input to a coadd. Paths other than `head_path` come from the
/// source catalog as-is. All paths are local; the remote side is the same
/// archive-relative path under the remote root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub filename: String,
    pub image_path: Utf8PathBuf,
    pub bkg_path: Utf8PathBuf,
    pub seg_path: Utf8PathBuf,
    pub psf_path: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_path: Option<Utf8PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceProduct {
    Image,
    Bkg,
    Seg,
    Psf,
    Head,
}

impl SourceProduct {
    pub const ALL: [SourceProduct; 5] = [
        SourceProduct::Image,
        SourceProduct::Bkg,
        SourceProduct::Seg,
        SourceProduct::Psf,
        SourceProduct::Head,
    ];
}

impl SourceRecord {
    pub fn path(&self, product: SourceProduct) -> Result<&Utf8Path, FetchError> {
        match product {
            SourceProduct::Image => Ok(&self.image_path),
            SourceProduct::Bkg => Ok(&self.bkg_path),
            SourceProduct::Seg => Ok(&self.seg_path),
            SourceProduct::Psf => Ok(&self.psf_path),
            SourceProduct::Head => self.head_path.as_deref().ok_or_else(|| {
                FetchError::MalformedPath(format!("{}: no header path linked", self.filename))
            }),
        }
    }
}

/// Supplies the ordered single-epoch inputs of a coadd tile/band.
pub trait SourceCatalog {
    fn sources(&self, tile: &TileName, band: Band) -> Result<Vec<SourceRecord>, FetchError>;
}

/// Source lists read from a JSON object keyed by `{tile}-{band}`.
#[derive(Debug, Clone)]
pub struct SourceListFile {
    path: Utf8PathBuf,
    entries: HashMap<String, Vec<SourceRecord>>,
}

impl SourceListFile {
    pub fn open(path: &Utf8Path) -> Result<Self, FetchError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| FetchError::ConfigRead(path.as_std_path().to_path_buf()))?;
        let entries = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(format!("{path}: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl SourceCatalog for SourceListFile {
    fn sources(&self, tile: &TileName, band: Band) -> Result<Vec<SourceRecord>, FetchError> {
        let key = CacheKey::new(tile, band);
        self.entries
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("{key} in {}", self.path)))
    }
}

/// Exposure/CCD identifier prefix of a single-epoch filename.
pub fn source_id(filename: &str) -> Result<&str, FetchError> {
    match filename.char_indices().nth(SOURCE_ID_WIDTH) {
        Some((cut, _)) => Ok(&filename[..cut]),
        None if filename.chars().count() == SOURCE_ID_WIDTH => Ok(filename),
        None => Err(FetchError::MalformedFilename(format!(
            "{filename}: shorter than {SOURCE_ID_WIDTH} characters"
        ))),
    }
}

pub fn head_filename(coadd: &CoaddFilename, source_filename: &str) -> Result<String, FetchError> {
    let front = coadd.head_front()?;
    let id = source_id(source_filename)?;
    Ok(format!("{front}_{id}{HEAD_SUFFIX}"))
}

/// Attach the scamp header path to every source. Headers live in the coadd's
/// `aux` tree and are named after the coadd, so only this side can derive them.
pub fn link_heads(
    coadd: &CoaddFilename,
    aux_dir: &ProductLocation,
    sources: &mut [SourceRecord],
) -> Result<(), FetchError> {
    for source in sources.iter_mut() {
        let head = aux_dir.local.join(head_filename(coadd, &source.filename)?);
        debug!(source = %source.filename, head = %head, "linked header");
        source.head_path = Some(head);
    }
    Ok(())
}
