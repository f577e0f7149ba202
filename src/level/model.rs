//! Pyramid geometry.
//!
//! A [`MultiLevelModel`] describes the resolution levels of an image pyramid:
//! level 0 is full resolution, each further level halves both dimensions.

use crate::core::error::{ConfigurationError, ConfigurationResult, IndexError};
use serde::{Deserialize, Serialize};

/// 2-D affine transform `x' = m00*x + m01*y + m02`, `y' = m10*x + m11*y + m12`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub m00: f64,
    pub m01: f64,
    pub m02: f64,
    pub m10: f64,
    pub m11: f64,
    pub m12: f64,
}

impl AffineTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self::scaling(1.0, 1.0)
    }

    /// Pure scaling.
    pub fn scaling(sx: f64, sy: f64) -> Self {
        Self {
            m00: sx,
            m01: 0.0,
            m02: 0.0,
            m10: 0.0,
            m11: sy,
            m12: 0.0,
        }
    }

    /// Pure translation.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m02: tx,
            m12: ty,
            ..Self::identity()
        }
    }

    /// Scaling followed by translation, the usual map geometry.
    pub fn scale_translate(sx: f64, sy: f64, tx: f64, ty: f64) -> Self {
        Self {
            m00: sx,
            m01: 0.0,
            m02: tx,
            m10: 0.0,
            m11: sy,
            m12: ty,
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn concatenate(&self, other: &AffineTransform) -> AffineTransform {
        AffineTransform {
            m00: self.m00 * other.m00 + self.m01 * other.m10,
            m01: self.m00 * other.m01 + self.m01 * other.m11,
            m02: self.m00 * other.m02 + self.m01 * other.m12 + self.m02,
            m10: self.m10 * other.m00 + self.m11 * other.m10,
            m11: self.m10 * other.m01 + self.m11 * other.m11,
            m12: self.m10 * other.m02 + self.m11 * other.m12 + self.m12,
        }
    }

    /// Transform a point.
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m00 * x + self.m01 * y + self.m02,
            self.m10 * x + self.m11 * y + self.m12,
        )
    }

    /// Bounding box of a transformed rectangle.
    pub fn transform_bounds(&self, bounds: &ModelBounds) -> ModelBounds {
        let corners = [
            self.transform(bounds.x, bounds.y),
            self.transform(bounds.x + bounds.width, bounds.y),
            self.transform(bounds.x, bounds.y + bounds.height),
            self.transform(bounds.x + bounds.width, bounds.y + bounds.height),
        ];
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        ModelBounds::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        self.m00 * self.m11 - self.m01 * self.m10
    }

    /// Inverse transform, `None` when singular.
    pub fn inverse(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        Some(AffineTransform {
            m00: self.m11 / det,
            m01: -self.m01 / det,
            m02: (self.m01 * self.m12 - self.m11 * self.m02) / det,
            m10: -self.m10 / det,
            m11: self.m00 / det,
            m12: (self.m10 * self.m02 - self.m00 * self.m12) / det,
        })
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Axis-aligned rectangle in model coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ModelBounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Geometry of an image pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiLevelModel {
    level_count: usize,
    image_to_model: AffineTransform,
    model_bounds: ModelBounds,
    width: u32,
    height: u32,
}

impl MultiLevelModel {
    /// Create a model for a `width` x `height` level-0 image.
    ///
    /// Model bounds are the level-0 image bounds mapped through `image_to_model`.
    pub fn new(
        level_count: usize,
        image_to_model: AffineTransform,
        width: u32,
        height: u32,
    ) -> ConfigurationResult<Self> {
        if level_count == 0 {
            return Err(ConfigurationError::InvalidLevelCount(level_count));
        }
        let model_bounds = image_to_model
            .transform_bounds(&ModelBounds::new(0.0, 0.0, width as f64, height as f64));
        Ok(Self {
            level_count,
            image_to_model,
            model_bounds,
            width,
            height,
        })
    }

    /// Override the model bounds.
    pub fn with_model_bounds(mut self, bounds: ModelBounds) -> Self {
        self.model_bounds = bounds;
        self
    }

    /// Number of levels.
    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Level-0 width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Level-0 height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bounds of the whole image in model coordinates.
    pub fn model_bounds(&self) -> ModelBounds {
        self.model_bounds
    }

    /// Check that `level` lies in `[0, level_count)`.
    pub fn check_level(&self, level: usize) -> Result<(), IndexError> {
        if level >= self.level_count {
            return Err(IndexError::LevelOutOfRange {
                level,
                level_count: self.level_count,
            });
        }
        Ok(())
    }

    /// Scale factor of a level relative to level 0, `2^level`.
    pub fn scale(&self, level: usize) -> Result<f64, IndexError> {
        self.check_level(level)?;
        Ok(2f64.powi(level as i32))
    }

    /// Transform from level image coordinates to model coordinates.
    pub fn image_to_model_transform(&self, level: usize) -> Result<AffineTransform, IndexError> {
        let scale = self.scale(level)?;
        Ok(self
            .image_to_model
            .concatenate(&AffineTransform::scaling(scale, scale)))
    }

    /// Transform from model coordinates to level image coordinates.
    pub fn model_to_image_transform(&self, level: usize) -> Result<AffineTransform, IndexError> {
        let forward = self.image_to_model_transform(level)?;
        Ok(forward.inverse().unwrap_or_else(AffineTransform::identity))
    }

    /// Pixel size of a level, `max(1, floor(size / scale))`.
    pub fn level_size(&self, level: usize) -> Result<(u32, u32), IndexError> {
        let scale = self.scale(level)?;
        let shrink = |size: u32| ((size as f64 / scale).floor() as u32).max(1);
        Ok((shrink(self.width), shrink(self.height)))
    }

    /// Level whose scale is closest to `scale`, clamped to the valid range.
    pub fn level_for_scale(&self, scale: f64) -> usize {
        if !scale.is_finite() || scale <= 1.0 {
            return 0;
        }
        (scale.log2().round() as usize).min(self.level_count - 1)
    }

    /// Number of levels needed until the image fits into a single tile.
    pub fn suggested_level_count(width: u32, height: u32, tile_width: u32, tile_height: u32) -> usize {
        let mut levels = 1;
        let (mut w, mut h) = (width, height);
        while (w > tile_width.max(1) || h > tile_height.max(1)) && levels < 32 {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            levels += 1;
        }
        levels
    }
}
