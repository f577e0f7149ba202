//! File-backed image pyramids.
//!
//! Each level is stored as its own image file named
//! `<basename>.<level>.<extension>` inside a base directory.

use crate::core::error::{ConfigurationError, TileGraphResult};
use crate::core::raster::Raster;
use crate::core::types::DataType;
use crate::level::model::{AffineTransform, MultiLevelModel};
use crate::level::source::MultiLevelSource;
use image::{ColorType, DynamicImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pyramid whose levels are read from precomputed image files.
#[derive(Debug, Clone)]
pub struct FileMultiLevelSource {
    location: PathBuf,
    basename: String,
    extension: String,
    model: MultiLevelModel,
}

impl FileMultiLevelSource {
    /// Create a source reading `<location>/<basename>.<level>.<extension>`.
    pub fn new(
        location: impl Into<PathBuf>,
        basename: impl Into<String>,
        extension: impl Into<String>,
        model: MultiLevelModel,
    ) -> Self {
        Self {
            location: location.into(),
            basename: basename.into(),
            extension: extension.into(),
            model,
        }
    }

    /// Create a source for the pyramid stored in `location`.
    ///
    /// The directory name is used as basename. Image size and model bounds
    /// are taken from the level-0 file.
    pub fn create(
        location: impl Into<PathBuf>,
        extension: impl Into<String>,
        image_to_model: AffineTransform,
        level_count: usize,
    ) -> TileGraphResult<Self> {
        let location = location.into();
        let basename = location
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ConfigurationError::Other(format!("Pyramid location {} has no directory name", location.display()))
            })?;
        let extension = extension.into();
        let level0 = location.join(level_file_name(&basename, 0, &extension));
        let (width, height) = image::image_dimensions(&level0)?;
        let model = MultiLevelModel::new(level_count, image_to_model, width, height)?;
        log::debug!(
            "Opened pyramid {} ({}x{}, {} levels)",
            location.display(),
            width,
            height,
            level_count
        );
        Ok(Self::new(location, basename, extension, model))
    }

    /// Base directory of the pyramid.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Common file name prefix.
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Full path of a level file.
    pub fn level_path(&self, level: usize) -> PathBuf {
        self.location
            .join(level_file_name(&self.basename, level, &self.extension))
    }
}

impl MultiLevelSource for FileMultiLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        self.model.check_level(level)?;
        let path = self.level_path(level);
        log::debug!("Loading pyramid level {} from {}", level, path.display());
        let decoded = image::open(&path)?;
        Ok(Arc::new(decode_raster(decoded)?))
    }
}

/// `<basename>.<level>.<extension>`
pub fn level_file_name(basename: &str, level: usize, extension: &str) -> String {
    format!("{}.{}.{}", basename, level, extension)
}

/// Convert a decoded image into a single-band raster.
///
/// Multi-channel images are reduced to luminance.
fn decode_raster(image: DynamicImage) -> Result<Raster, ConfigurationError> {
    let (width, height) = (image.width(), image.height());
    match image.color() {
        ColorType::Rgb32F | ColorType::Rgba32F => {
            let samples = image.to_luma32f().into_raw().into_iter().map(f64::from).collect();
            Raster::from_samples(width, height, DataType::Float32, samples)
        }
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            let samples = image.to_luma16().into_raw().into_iter().map(f64::from).collect();
            Raster::from_samples(width, height, DataType::UInt16, samples)
        }
        _ => {
            let samples = image.to_luma8().into_raw().into_iter().map(f64::from).collect();
            Raster::from_samples(width, height, DataType::UInt8, samples)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    fn write_pyramid(dir: &Path, levels: usize) {
        for level in 0..levels {
            let size = 16u32 >> level;
            let img: GrayImage = ImageBuffer::from_fn(size, size, |x, _| Luma([(x * 10 + level as u32) as u8]));
            img.save(dir.join(level_file_name("scene", level, "png"))).unwrap();
        }
    }

    #[test]
    fn test_level_file_name() {
        assert_eq!(level_file_name("scene", 3, "tif"), "scene.3.tif");
    }

    #[test]
    fn test_create_reads_levels() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("scene");
        std::fs::create_dir(&dir).unwrap();
        write_pyramid(&dir, 3);

        let source = FileMultiLevelSource::create(&dir, "png", AffineTransform::scaling(2.0, 2.0), 3).unwrap();
        assert_eq!(source.basename(), "scene");
        assert_eq!(source.level_path(1), dir.join("scene.1.png"));
        assert_eq!((source.model().width(), source.model().height()), (16, 16));
        assert_eq!(source.model().model_bounds().width, 32.0);

        let level1 = source.create_image(1).unwrap();
        assert_eq!((level1.width(), level1.height()), (8, 8));
        assert_eq!(level1.data_type(), DataType::UInt8);
        assert_eq!(level1.sample(2, 0), 21.0);
        assert!(source.create_image(3).is_err());
    }

    #[test]
    fn test_missing_level_file() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("scene");
        std::fs::create_dir(&dir).unwrap();
        write_pyramid(&dir, 1);

        let source = FileMultiLevelSource::create(&dir, "png", AffineTransform::identity(), 2).unwrap();
        assert!(source.create_image(0).is_ok());
        assert!(source.create_image(1).is_err());
    }

    #[test]
    fn test_sixteen_bit_levels() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("deep");
        std::fs::create_dir(&dir).unwrap();
        let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(4, 4, |x, y| Luma([(x + y) as u16 * 1000]));
        img.save(dir.join("deep.0.png")).unwrap();

        let source = FileMultiLevelSource::create(&dir, "png", AffineTransform::identity(), 1).unwrap();
        let level0 = source.create_image(0).unwrap();
        assert_eq!(level0.data_type(), DataType::UInt16);
        assert_eq!(level0.sample(3, 3), 6000.0);
    }
}
