use tracing::debug;

use crate::error::{Error, Result};
use crate::raster::RasterSampler;
use crate::sample::SamplePoint;

/// Annotate a copy of `points` with the first `channels` raster bands.
///
/// A raster with fewer bands than configured channels is a configuration
/// error; extra bands (alpha, for instance) are ignored.
pub fn extract_values(
    points: &[SamplePoint],
    raster: &dyn RasterSampler,
    channels: usize,
) -> Result<Vec<SamplePoint>> {
    let bands = raster.band_count();
    if bands < channels {
        return Err(Error::config(format!(
            "raster has {bands} bands but {channels} channels are configured"
        )));
    }
    if bands > channels {
        debug!(bands, channels, "ignoring trailing raster bands");
    }

    points
        .iter()
        .map(|p| {
            let mut values = raster.sample(p.location.x(), p.location.y())?;
            if values.len() != bands {
                return Err(Error::service(
                    "raster-sampling",
                    format!("expected {bands} values at point {}, got {}", p.id, values.len()),
                ));
            }
            values.truncate(channels);
            Ok(p.clone().with_channels(values))
        })
        .collect()
}
