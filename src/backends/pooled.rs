//! Pure Rust backbone built from pooled colour and texture statistics
//!
//! Per channel it emits spatial-pyramid means on 1x1, 2x2 and 4x4 grids, the
//! standard deviation, gradient energy on a 2x2 grid and an 8-bin intensity
//! histogram. No model file is needed, which keeps the default pipeline fully
//! self-contained.

use super::{check_input_shape, Backbone};
use crate::error::Result;
use crate::utils::{IMAGENET_MEAN, IMAGENET_STD};
use instant::Duration;
use ndarray::{s, Array2, Array4, ArrayView2};

const PYRAMID_LEVELS: [usize; 3] = [1, 2, 4];
const GRADIENT_GRID: usize = 2;
const HISTOGRAM_BINS: usize = 8;
const CHANNELS: usize = 3;

/// Features per channel: 1 + 4 + 16 means, std, 4 gradient cells, histogram
const FEATURES_PER_CHANNEL: usize = 1 + 4 + 16 + 1 + GRADIENT_GRID * GRADIENT_GRID + HISTOGRAM_BINS;

/// Backbone computing fixed image statistics
#[derive(Debug, Clone)]
pub struct PooledStatsBackbone {
    input_size: u32,
}

impl PooledStatsBackbone {
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    fn channel_features(plane: ArrayView2<f32>, channel: usize, out: &mut Vec<f32>) {
        let (height, width) = plane.dim();

        for &grid in &PYRAMID_LEVELS {
            for row in 0..grid {
                for col in 0..grid {
                    let cell = plane.slice(s![
                        row * height / grid..(row + 1) * height / grid,
                        col * width / grid..(col + 1) * width / grid
                    ]);
                    out.push(cell.mean().unwrap_or(0.0));
                }
            }
        }

        out.push(if plane.is_empty() { 0.0 } else { plane.std(0.0) });

        let gradients = Self::gradient_energy(plane);
        out.extend_from_slice(&gradients);

        // Histogram over de-normalized intensities in 0..=1
        let mut histogram = [0.0_f32; HISTOGRAM_BINS];
        let mean = IMAGENET_MEAN.get(channel).copied().unwrap_or(0.0);
        let std = IMAGENET_STD.get(channel).copied().unwrap_or(1.0);
        for &value in plane {
            let intensity = (value * std + mean).clamp(0.0, 1.0);
            let bin = ((intensity * HISTOGRAM_BINS as f32) as usize).min(HISTOGRAM_BINS - 1);
            if let Some(slot) = histogram.get_mut(bin) {
                *slot += 1.0;
            }
        }
        let total = plane.len().max(1) as f32;
        out.extend(histogram.iter().map(|count| count / total));
    }

    /// Mean absolute horizontal plus vertical difference per grid cell
    fn gradient_energy(plane: ArrayView2<f32>) -> [f32; GRADIENT_GRID * GRADIENT_GRID] {
        let (height, width) = plane.dim();
        let mut sums = [0.0_f32; GRADIENT_GRID * GRADIENT_GRID];
        let mut counts = [0_usize; GRADIENT_GRID * GRADIENT_GRID];

        for y in 0..height.saturating_sub(1) {
            for x in 0..width.saturating_sub(1) {
                let (Some(here), Some(right), Some(below)) =
                    (plane.get((y, x)), plane.get((y, x + 1)), plane.get((y + 1, x)))
                else {
                    continue;
                };
                let cell = (y * GRADIENT_GRID / height) * GRADIENT_GRID + x * GRADIENT_GRID / width;
                if let (Some(sum), Some(count)) = (sums.get_mut(cell), counts.get_mut(cell)) {
                    *sum += (right - here).abs() + (below - here).abs();
                    *count += 1;
                }
            }
        }

        let mut energy = [0.0_f32; GRADIENT_GRID * GRADIENT_GRID];
        for ((e, sum), count) in energy.iter_mut().zip(sums).zip(counts) {
            *e = if count == 0 { 0.0 } else { sum / count as f32 };
        }
        energy
    }
}

impl Backbone for PooledStatsBackbone {
    fn name(&self) -> &str {
        "pooled-stats"
    }

    fn initialize(&mut self) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn feature_dim(&self) -> usize {
        FEATURES_PER_CHANNEL * CHANNELS
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn extract(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        check_input_shape(batch, self.input_size)?;

        let n = batch.dim().0;
        let mut features = Array2::<f32>::zeros((n, self.feature_dim()));
        let mut row = Vec::with_capacity(self.feature_dim());

        for (index, mut target) in features.outer_iter_mut().enumerate() {
            row.clear();
            for channel in 0..CHANNELS {
                Self::channel_features(batch.slice(s![index, channel, .., ..]), channel, &mut row);
            }
            for (slot, value) in target.iter_mut().zip(row.iter()) {
                *slot = *value;
            }
        }

        Ok(features)
    }
}
