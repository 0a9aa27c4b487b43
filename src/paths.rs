use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::debug;

use crate::cache::CacheRecord;
use crate::config::ArchiveRoots;
use crate::domain::ProductDir;
use crate::error::FetchError;

const FITS_EXT: &str = ".fits";

/// Characters stripped from the end of a coadd filename to get the prefix
/// shared by its scamp headers: the `_{band}.fits` tail of
/// `{tile}_r{req}p{attempt}_{band}.fits`.
pub const HEAD_FRONT_STRIP: usize = 7;

/// Coadd data products fetched for every tile/band, in transfer-list order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoaddProduct {
    Image,
    Cat,
    Seg,
    Psf,
}

impl CoaddProduct {
    pub const ALL: [CoaddProduct; 4] = [
        CoaddProduct::Image,
        CoaddProduct::Cat,
        CoaddProduct::Seg,
        CoaddProduct::Psf,
    ];

    pub fn dir(&self) -> ProductDir {
        match self {
            CoaddProduct::Image => ProductDir::Coadd,
            CoaddProduct::Cat => ProductDir::Cat,
            CoaddProduct::Seg => ProductDir::Seg,
            CoaddProduct::Psf => ProductDir::Psf,
        }
    }
}

/// Archive-relative coadd directory, held as the parent segments shared by
/// every sibling product tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePath {
    parent: Utf8PathBuf,
}

impl ArchivePath {
    pub fn parse(relative: &str) -> Result<Self, FetchError> {
        let trimmed = relative.trim().trim_end_matches('/');
        if trimmed.starts_with('/') {
            return Err(FetchError::MalformedPath(format!(
                "{relative}: archive path must be relative"
            )));
        }
        let (parent, last) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
        if last != ProductDir::Coadd.token() {
            return Err(FetchError::MalformedPath(format!(
                "{relative}: expected final segment `{}`",
                ProductDir::Coadd
            )));
        }
        Ok(Self {
            parent: Utf8PathBuf::from(parent),
        })
    }

    pub fn dir(&self, product: ProductDir) -> Utf8PathBuf {
        self.parent.join(product.token())
    }
}

/// Coadd base filename, validated to end in `.fits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoaddFilename {
    stem: String,
}

impl CoaddFilename {
    pub fn parse(filename: &str) -> Result<Self, FetchError> {
        match filename.strip_suffix(FITS_EXT) {
            Some(stem) if !stem.is_empty() && !stem.contains('/') => Ok(Self {
                stem: stem.to_string(),
            }),
            _ => Err(FetchError::MalformedFilename(format!(
                "{filename}: expected a `{FITS_EXT}` suffix"
            ))),
        }
    }

    pub fn base(&self) -> String {
        format!("{}{FITS_EXT}", self.stem)
    }

    pub fn product(&self, product: CoaddProduct, compression_suffix: &str) -> String {
        match product {
            CoaddProduct::Image => format!("{}{compression_suffix}", self.base()),
            CoaddProduct::Cat => format!("{}_cat.fits", self.stem),
            CoaddProduct::Seg => format!("{}_segmap.fits", self.stem),
            CoaddProduct::Psf => format!("{}_psfcat.psf", self.stem),
        }
    }

    /// Filename prefix shared by the scamp headers of this coadd's inputs.
    pub fn head_front(&self) -> Result<String, FetchError> {
        let base = self.base();
        match base.char_indices().rev().nth(HEAD_FRONT_STRIP - 1) {
            Some((cut, _)) if cut > 0 => Ok(base[..cut].to_string()),
            _ => Err(FetchError::MalformedFilename(format!(
                "{base}: too short to strip {HEAD_FRONT_STRIP} characters"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductLocation {
    pub local: Utf8PathBuf,
    pub remote: Utf8PathBuf,
}

impl ProductLocation {
    pub fn join(&self, filename: &str) -> ProductLocation {
        ProductLocation {
            local: self.local.join(filename),
            remote: self.remote.join(filename),
        }
    }
}

/// Full local and remote paths of every coadd product for one tile/band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoaddPaths {
    pub image: ProductLocation,
    pub cat: ProductLocation,
    pub seg: ProductLocation,
    pub psf: ProductLocation,
    pub aux_dir: ProductLocation,
}

impl CoaddPaths {
    pub fn get(&self, product: CoaddProduct) -> &ProductLocation {
        match product {
            CoaddProduct::Image => &self.image,
            CoaddProduct::Cat => &self.cat,
            CoaddProduct::Seg => &self.seg,
            CoaddProduct::Psf => &self.psf,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    roots: ArchiveRoots,
}

impl PathResolver {
    pub fn new(roots: ArchiveRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &ArchiveRoots {
        &self.roots
    }

    pub fn dir(&self, archive_path: &ArchivePath, product: ProductDir) -> ProductLocation {
        let relative = archive_path.dir(product);
        ProductLocation {
            local: self.roots.local().join(&relative),
            remote: self.roots.remote().join(&relative),
        }
    }

    pub fn resolve(&self, record: &CacheRecord) -> Result<CoaddPaths, FetchError> {
        let archive_path = ArchivePath::parse(&record.relative_path)?;
        let filename = CoaddFilename::parse(&record.filename)?;
        let locate = |product: CoaddProduct| {
            self.dir(&archive_path, product.dir())
                .join(&filename.product(product, &record.compression_suffix))
        };

        let paths = CoaddPaths {
            image: locate(CoaddProduct::Image),
            cat: locate(CoaddProduct::Cat),
            seg: locate(CoaddProduct::Seg),
            psf: locate(CoaddProduct::Psf),
            aux_dir: self.dir(&archive_path, ProductDir::Aux),
        };
        debug!(key = %record.key, image = %paths.image.local, "resolved coadd paths");
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn archive_path_requires_trailing_coadd() {
        let path = ArchivePath::parse("OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/coadd/").unwrap();
        assert_eq!(
            path.dir(ProductDir::Psf).as_str(),
            "OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/psf"
        );

        let err = ArchivePath::parse("OPS/multiepoch/Y3A1/r2577/DES0215-0458/p01/cat").unwrap_err();
        assert_matches!(err, FetchError::MalformedPath(_));
        let err = ArchivePath::parse("/OPS/coadd").unwrap_err();
        assert_matches!(err, FetchError::MalformedPath(_));
    }

    #[test]
    fn bare_coadd_segment_has_empty_parent() {
        let path = ArchivePath::parse("coadd").unwrap();
        assert_eq!(path.dir(ProductDir::Seg).as_str(), "seg");
    }

    #[test]
    fn filename_rules_replace_only_the_suffix() {
        let name = CoaddFilename::parse("DES.fits_r1p01_g.fits").unwrap();
        assert_eq!(
            name.product(CoaddProduct::Cat, ""),
            "DES.fits_r1p01_g_cat.fits"
        );
        assert_eq!(
            name.product(CoaddProduct::Image, ""),
            "DES.fits_r1p01_g.fits"
        );
    }

    #[test]
    fn filename_without_fits_suffix_is_rejected() {
        let err = CoaddFilename::parse("DES0215-0458_r2577p01_i.fits.fz").unwrap_err();
        assert_matches!(err, FetchError::MalformedFilename(_));
        let err = CoaddFilename::parse(".fits").unwrap_err();
        assert_matches!(err, FetchError::MalformedFilename(_));
    }

    #[test]
    fn head_front_strips_band_tail() {
        let name = CoaddFilename::parse("DES0215-0458_r2577p01_i.fits").unwrap();
        assert_eq!(name.head_front().unwrap(), "DES0215-0458_r2577p01");

        let short = CoaddFilename::parse("ab.fits").unwrap();
        assert_matches!(short.head_front(), Err(FetchError::MalformedFilename(_)));
    }
}
