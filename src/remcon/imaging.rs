//! Field-of-view arithmetic.
//!
//! The console scales pixel size with scan resolution but keeps the field of
//! view fixed, so image width is always 1024 reference pixels wide. Setting a
//! field of view therefore means setting a magnification.

use tracing::debug;

use crate::error::SemResult;
use crate::remcon::client::RemconClient;
use crate::remcon::command::ParameterRange;

/// Reference raster width the field of view is defined on.
pub const REFERENCE_WIDTH_PX: f64 = 1024.0;

/// Settable field of view in meters.
pub const FULL_SIZE: ParameterRange<f64> = ParameterRange::new(1e-9, 3e-3);

/// Image width in meters for a pixel size in meters.
pub fn full_size_from_pixel(pixel_size_m: f64) -> f64 {
    REFERENCE_WIDTH_PX * pixel_size_m
}

/// Magnification that gives `new_full_size_m`, from the current magnification
/// and pixel size.
pub fn magnification_for_full_size(old_mag: f64, old_pixel_m: f64, new_full_size_m: f64) -> f64 {
    old_mag * REFERENCE_WIDTH_PX * old_pixel_m / new_full_size_m
}

impl RemconClient {
    /// Image width in meters.
    pub async fn get_full_size(&self) -> SemResult<f64> {
        Ok(full_size_from_pixel(self.get_pixel_size().await?))
    }

    /// Set the image width in meters, clamped to 1 nm..3 mm.
    ///
    /// Reads magnification and pixel size, then sets the magnification that
    /// yields the requested width. Returns the magnification requested (the
    /// console clamps it further to 5..=1e6).
    pub async fn set_full_size(&self, full_size_m: f64) -> SemResult<f64> {
        let target = FULL_SIZE.clamp(full_size_m);
        let old_mag = self.get_mag().await?;
        let old_pixel = self.get_pixel_size().await?;
        let new_mag = magnification_for_full_size(old_mag, old_pixel, target);
        debug!(old_mag, old_pixel, target, new_mag, "Setting field of view");
        self.set_mag(new_mag).await?;
        Ok(new_mag)
    }
}
