//! Discrete angle grid used for binning settings and setting differences.

use eprsim_core::{Result, validate_resolution};

/// A grid of `360/Δ` bins at resolution `Δ` degrees, wrapping at 360°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleGrid {
    resolution: f64,
    bins: usize,
}

impl AngleGrid {
    /// `resolution_deg` must be positive and divide 360.
    pub fn new(resolution_deg: f64) -> Result<Self> {
        validate_resolution(resolution_deg)?;
        Ok(Self {
            resolution: resolution_deg,
            bins: (360.0 / resolution_deg).round() as usize,
        })
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Bin index of an angle in degrees. Halfway cases round to even, then
    /// the index wraps modulo the bin count.
    pub fn index_deg(&self, deg: f64) -> usize {
        let k = (deg / self.resolution).round_ties_even() as i64;
        k.rem_euclid(self.bins as i64) as usize
    }

    /// Bin index of an angle in radians.
    pub fn index_rad(&self, rad: f64) -> usize {
        self.index_deg(rad.to_degrees())
    }

    /// Bin index of `(a − b) mod 360` for two angles in radians.
    pub fn difference_index(&self, a_rad: f64, b_rad: f64) -> usize {
        self.index_deg((a_rad - b_rad).to_degrees())
    }

    /// Angle in degrees at the centre of bin `index`.
    pub fn value(&self, index: usize) -> f64 {
        index as f64 * self.resolution
    }

    /// Discretized angle in degrees, in `[0, 360)`.
    pub fn discretize_deg(&self, deg: f64) -> f64 {
        self.value(self.index_deg(deg))
    }

    /// All bin angles in ascending order.
    pub fn angles(&self) -> Vec<f64> {
        (0..self.bins).map(|i| self.value(i)).collect()
    }

    /// Index of the 180° bin, if 180° lies on the grid.
    pub fn opposite_index(&self) -> Option<usize> {
        (self.bins % 2 == 0).then_some(self.bins / 2)
    }

    /// Index of the bin mirrored through 0°, i.e. `360 − angle`.
    pub fn mirror(&self, index: usize) -> usize {
        (self.bins - index % self.bins) % self.bins
    }
}
