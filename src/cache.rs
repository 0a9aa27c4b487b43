//! Persisted per-campaign table mapping `{tile}-{band}` keys to archive
//! storage records.
//!
//! The table is written once from a single catalog query and only ever
//! replaced wholesale. On disk it is a gzip-compressed, column-oriented JSON
//! document whose string columns are padded to fixed widths.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{CatalogClient, CatalogRow, coadd_query};
use crate::domain::{Band, CacheKey, Campaign, TileName};
use crate::error::FetchError;

const FORMAT_TAG: &str = "coadd-cache";

pub const KEY_WIDTH: usize = 14;
pub const TILE_NAME_WIDTH: usize = 12;
pub const RELATIVE_PATH_WIDTH: usize = 65;
pub const FILENAME_WIDTH: usize = 40;
pub const COMPRESSION_WIDTH: usize = 3;
pub const BAND_WIDTH: usize = 1;

/// One coadd image in the archive, identified by tile and band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheRecord {
    pub key: String,
    pub tile_name: TileName,
    pub band: Band,
    /// Archive-relative directory; its last segment is always `coadd`.
    pub relative_path: String,
    /// Base filename ending in `.fits`, without compression suffix.
    pub filename: String,
    pub compression_suffix: String,
    pub attempt_id: i64,
}

impl CacheRecord {
    pub fn from_row(row: CatalogRow) -> Result<Self, FetchError> {
        Ok(Self {
            key: row.key.trim().to_string(),
            tile_name: row.tile_name.parse()?,
            band: row.band.parse()?,
            relative_path: row.relative_path.trim().to_string(),
            filename: row.filename.trim().to_string(),
            compression_suffix: row
                .compression_suffix
                .map(|value| value.trim().to_string())
                .unwrap_or_default(),
            attempt_id: row.attempt_id,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnSpec {
    name: String,
    dtype: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Columns {
    key: Vec<String>,
    tile_name: Vec<String>,
    relative_path: Vec<String>,
    filename: Vec<String>,
    compression_suffix: Vec<String>,
    band: Vec<String>,
    attempt_id: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    format: String,
    campaign: Campaign,
    built_at: DateTime<Utc>,
    schema: Vec<ColumnSpec>,
    columns: Columns,
}

fn schema() -> Vec<ColumnSpec> {
    [
        ("key", format!("S{KEY_WIDTH}")),
        ("tile_name", format!("S{TILE_NAME_WIDTH}")),
        ("relative_path", format!("S{RELATIVE_PATH_WIDTH}")),
        ("filename", format!("S{FILENAME_WIDTH}")),
        ("compression_suffix", format!("S{COMPRESSION_WIDTH}")),
        ("band", format!("S{BAND_WIDTH}")),
        ("attempt_id", "i8".to_string()),
    ]
    .into_iter()
    .map(|(name, dtype)| ColumnSpec {
        name: name.to_string(),
        dtype,
    })
    .collect()
}

fn pad(column: &'static str, width: usize, value: &str) -> Result<String, FetchError> {
    if value.len() > width {
        return Err(FetchError::FieldTooWide {
            column,
            width,
            value: value.to_string(),
        });
    }
    Ok(format!("{value:<width$}"))
}

impl Columns {
    fn from_records(records: &[CacheRecord]) -> Result<Self, FetchError> {
        let mut columns = Columns::default();
        for record in records {
            columns.key.push(pad("key", KEY_WIDTH, &record.key)?);
            columns.tile_name.push(pad(
                "tile_name",
                TILE_NAME_WIDTH,
                record.tile_name.as_str(),
            )?);
            columns.relative_path.push(pad(
                "relative_path",
                RELATIVE_PATH_WIDTH,
                &record.relative_path,
            )?);
            columns
                .filename
                .push(pad("filename", FILENAME_WIDTH, &record.filename)?);
            columns.compression_suffix.push(pad(
                "compression_suffix",
                COMPRESSION_WIDTH,
                &record.compression_suffix,
            )?);
            columns
                .band
                .push(pad("band", BAND_WIDTH, &record.band.to_string())?);
            columns.attempt_id.push(record.attempt_id);
        }
        Ok(columns)
    }

    fn into_records(self, path: &Utf8Path) -> Result<Vec<CacheRecord>, FetchError> {
        let len = self.key.len();
        let lengths = [
            self.tile_name.len(),
            self.relative_path.len(),
            self.filename.len(),
            self.compression_suffix.len(),
            self.band.len(),
            self.attempt_id.len(),
        ];
        if lengths.iter().any(|other| *other != len) {
            return Err(format_error(path, "columns have unequal lengths"));
        }

        let invalid = |err: FetchError| format_error(path, &err.to_string());
        let mut records = Vec::with_capacity(len);
        for i in 0..len {
            records.push(CacheRecord {
                key: self.key[i].trim_end().to_string(),
                tile_name: self.tile_name[i].trim_end().parse().map_err(invalid)?,
                band: self.band[i].trim_end().parse().map_err(invalid)?,
                relative_path: self.relative_path[i].trim_end().to_string(),
                filename: self.filename[i].trim_end().to_string(),
                compression_suffix: self.compression_suffix[i].trim_end().to_string(),
                attempt_id: self.attempt_id[i],
            });
        }
        Ok(records)
    }
}

fn format_error(path: &Utf8Path, message: &str) -> FetchError {
    FetchError::CacheFormat {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// In-memory copy of one campaign's cache table.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    campaign: Campaign,
    path: Option<Utf8PathBuf>,
    built_at: Option<DateTime<Utc>>,
    records: Vec<CacheRecord>,
    index: HashMap<String, Vec<usize>>,
}

impl MetadataCache {
    /// Load the campaign's table, building it from the catalog first when the
    /// file does not exist yet.
    pub fn open(
        campaign: Campaign,
        path: &Utf8Path,
        catalog: &dyn CatalogClient,
    ) -> Result<Self, FetchError> {
        if !path.as_std_path().exists() {
            make_cache(&campaign, path, catalog)?;
        }
        Self::load(campaign, path)
    }

    pub fn load(campaign: Campaign, path: &Utf8Path) -> Result<Self, FetchError> {
        info!("loading cache: {path}");
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| FetchError::Filesystem(format!("open cache {path}: {err}")))?;
        let decoder = GzDecoder::new(BufReader::new(file));
        let contents: CacheFile = serde_json::from_reader(decoder)
            .map_err(|err| format_error(path, &err.to_string()))?;

        if contents.format != FORMAT_TAG {
            return Err(format_error(
                path,
                &format!("unexpected format tag {:?}", contents.format),
            ));
        }
        if contents.campaign != campaign {
            return Err(format_error(
                path,
                &format!(
                    "built for campaign {}, expected {campaign}",
                    contents.campaign
                ),
            ));
        }

        let records = contents.columns.into_records(path)?;
        let mut cache = Self::from_records(campaign, records);
        cache.path = Some(path.to_path_buf());
        cache.built_at = Some(contents.built_at);
        Ok(cache)
    }

    /// Rebuild the table from the catalog, then load the fresh copy.
    pub fn build(
        campaign: Campaign,
        path: &Utf8Path,
        catalog: &dyn CatalogClient,
    ) -> Result<Self, FetchError> {
        make_cache(&campaign, path, catalog)?;
        Self::load(campaign, path)
    }

    pub fn from_records(campaign: Campaign, records: Vec<CacheRecord>) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            index.entry(record.key.clone()).or_default().push(i);
        }
        Self {
            campaign,
            path: None,
            built_at: None,
            records,
            index,
        }
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn get_data(&self) -> &[CacheRecord] {
        &self.records
    }

    pub fn get_info(&self, tile: &TileName, band: Band) -> Result<&CacheRecord, FetchError> {
        let key = CacheKey::new(tile, band);
        match self.index.get(key.as_str()).map(Vec::as_slice) {
            None | Some([]) => Err(FetchError::NotFound(key.to_string())),
            Some([row]) => Ok(&self.records[*row]),
            Some(rows) => Err(FetchError::AmbiguousKey {
                key: key.to_string(),
                count: rows.len(),
            }),
        }
    }

    /// Keys held by more than one row, sorted.
    pub fn duplicate_keys(&self) -> Vec<(&str, usize)> {
        let mut duplicates = self
            .index
            .iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|(key, rows)| (key.as_str(), rows.len()))
            .collect::<Vec<_>>();
        duplicates.sort();
        duplicates
    }
}

/// Query the catalog for every coadd in the campaign and overwrite the cache
/// file with the result. Returns the number of rows written.
pub fn make_cache(
    campaign: &Campaign,
    path: &Utf8Path,
    catalog: &dyn CatalogClient,
) -> Result<usize, FetchError> {
    let rows = catalog.query_rows(&coadd_query(campaign))?;
    let records = rows
        .into_iter()
        .map(CacheRecord::from_row)
        .collect::<Result<Vec<_>, FetchError>>()?;
    write_cache(campaign, path, &records)?;
    Ok(records.len())
}

pub fn write_cache(
    campaign: &Campaign,
    path: &Utf8Path,
    records: &[CacheRecord],
) -> Result<(), FetchError> {
    let contents = CacheFile {
        format: FORMAT_TAG.to_string(),
        campaign: campaign.clone(),
        built_at: Utc::now(),
        schema: schema(),
        columns: Columns::from_records(records)?,
    };

    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;

    info!(rows = records.len(), "writing cache: {path}");
    let temp = tempfile::Builder::new()
        .prefix("coadd-cache")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    {
        let mut encoder = GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
        serde_json::to_writer(&mut encoder, &contents)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let mut writer = encoder
            .finish()
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn record(tile: &str, band: &str) -> CacheRecord {
        CacheRecord {
            key: format!("{tile}-{band}"),
            tile_name: tile.parse().unwrap(),
            band: band.parse().unwrap(),
            relative_path: format!("OPS/multiepoch/Y3A1/r2577/{tile}/p01/coadd"),
            filename: format!("{tile}_r2577p01_{band}.fits"),
            compression_suffix: ".fz".to_string(),
            attempt_id: 7,
        }
    }

    #[test]
    fn pad_rejects_overlong_values() {
        assert_eq!(pad("band", 3, "fz").unwrap(), "fz ");
        let err = pad("band", 1, "ri").unwrap_err();
        assert_matches!(err, FetchError::FieldTooWide { width: 1, .. });
    }

    #[test]
    fn columns_trim_padding_on_read() {
        let records = vec![record("DES0215-0458", "i")];
        let columns = Columns::from_records(&records).unwrap();
        assert_eq!(columns.tile_name[0].len(), TILE_NAME_WIDTH);
        assert_eq!(columns.filename[0].len(), FILENAME_WIDTH);
        let back = columns.into_records(Utf8Path::new("mem")).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn unequal_columns_are_rejected() {
        let mut columns = Columns::from_records(&[record("DES0215-0458", "i")]).unwrap();
        columns.attempt_id.push(8);
        let err = columns.into_records(Utf8Path::new("mem")).unwrap_err();
        assert_matches!(err, FetchError::CacheFormat { .. });
    }

    #[test]
    fn duplicate_keys_are_ambiguous() {
        let campaign = Campaign::default();
        let cache = MetadataCache::from_records(
            campaign,
            vec![
                record("DES0215-0458", "i"),
                record("DES0215-0458", "i"),
                record("DES0215-0458", "r"),
            ],
        );
        let tile: TileName = "DES0215-0458".parse().unwrap();
        let err = cache.get_info(&tile, "i".parse().unwrap()).unwrap_err();
        assert_matches!(err, FetchError::AmbiguousKey { count: 2, .. });
        assert!(cache.get_info(&tile, "r".parse().unwrap()).is_ok());
        assert_eq!(cache.duplicate_keys(), vec![("DES0215-0458-i", 2)]);
    }
}
