// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! Export dimension optimizer
//!
//! Picks the output size for an image under three constraints: the total
//! pixel count must stay within the square of the configured resolution,
//! both dimensions must be multiples of the bucket size, and the pixel area
//! lost to center-cropping should be minimal. This searches the candidate
//! space exhaustively instead of using the common rounding heuristic, so it
//! can find sizes the heuristic misses.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::config::ExportConfig;

/// Loss multiplier applied to candidates matching a preferred size
pub const PREFERRED_SIZE_BONUS: f64 = 0.4;

/// How many bucket-multiple increments to probe beyond the baseline
const GROW_STEPS: u32 = 9;

/// Pixel area discarded when the source is scaled to match one axis of the
/// candidate exactly and center-cropped on the other
fn cropped_area(width: f64, height: f64, test_width: f64, test_height: f64) -> f64 {
    let original_aspect_ratio = width / height;
    let target_aspect_ratio = test_width / test_height;
    if original_aspect_ratio > target_aspect_ratio {
        // Crop horizontally.
        height * (width - (height * test_width) / test_height)
    } else {
        // Crop vertically.
        width * (height - (width * test_height) / test_width)
    }
}

/// Compute the export dimensions for an image.
///
/// With `resolution == 0` the dimensions are only aligned down to bucket
/// multiples, never rescaled. Images smaller than one bucket in either
/// dimension are returned unchanged.
pub fn optimize(
    width: u32,
    height: u32,
    resolution: u32,
    bucket_size: u32,
    allow_upscale: bool,
    preferred_sizes: &[(u32, u32)],
) -> (u32, u32) {
    let bucket = bucket_size.max(1) as u64;
    if resolution == 0 {
        // No rescale in this case, only alignment.
        return (
            ((width as u64 / bucket) * bucket) as u32,
            ((height as u64 / bucket) * bucket) as u32,
        );
    }
    if (width as u64) < bucket || (height as u64) < bucket {
        // Too small to bucket meaningfully.
        return (width, height);
    }

    let w = width as f64;
    let h = height as f64;
    let max_pixels = resolution as u64 * resolution as u64;
    let mut opt_width = (resolution as f64 * (w / h).sqrt()).floor() as u32;
    let mut opt_height = (resolution as f64 * (h / w).sqrt()).floor() as u32;
    if !allow_upscale {
        opt_width = opt_width.min(width);
        opt_height = opt_height.min(height);
    }

    let mut best: Option<(u32, u32, f64)> = None;
    let mut consider = |test_width: u32, test_height: u32| {
        let mut loss = cropped_area(w, h, test_width as f64, test_height as f64);
        if preferred_sizes.contains(&(test_width, test_height))
            || preferred_sizes.contains(&(test_height, test_width))
        {
            loss *= PREFERRED_SIZE_BONUS;
        }
        let replace = match best {
            None => true,
            Some((best_width, best_height, best_loss)) => {
                loss < best_loss
                    || (loss == best_loss
                        && test_width as u64 * test_height as u64
                            > best_width as u64 * best_height as u64)
            }
        };
        if replace {
            best = Some((test_width, test_height, loss));
        }
    };

    // Branch 1: fix the width on a bucket multiple, derive the height.
    for grow in 0..=GROW_STEPS {
        let test_width = ((opt_width as u64 / bucket + grow as u64).max(1) * bucket) as u32;
        let derived = (h * test_width as f64 / w).floor() as u64;
        let test_height = ((derived / bucket).max(1) * bucket) as u32;
        if grow > 0 {
            if test_width as u64 * test_height as u64 > max_pixels {
                break;
            }
            if !allow_upscale && (test_width > width || test_height > height) {
                break;
            }
        }
        consider(test_width, test_height);
    }

    // Branch 2: fix the height, derive the width.
    for grow in 0..=GROW_STEPS {
        let test_height = ((opt_height as u64 / bucket + grow as u64).max(1) * bucket) as u32;
        let derived = (w * test_height as f64 / h).floor() as u64;
        let test_width = ((derived / bucket).max(1) * bucket) as u32;
        if grow > 0 {
            if test_width as u64 * test_height as u64 > max_pixels {
                break;
            }
            if !allow_upscale && (test_width > width || test_height > height) {
                break;
            }
        }
        consider(test_width, test_height);
    }

    let (best_width, best_height, _) = best.unwrap_or((width, height, 0.0));
    (best_width, best_height)
}

/// Memoized optimizer results, keyed by source dimensions.
///
/// The table lives as long as the catalog and must be rebuilt whenever the
/// export configuration changes.
#[derive(Debug)]
pub struct TargetDimensionCache {
    resolution: u32,
    bucket_size: u32,
    upscaling: bool,
    preferred_sizes: Vec<(u32, u32)>,
    cache: RefCell<HashMap<(u32, u32), (u32, u32)>>,
}

impl TargetDimensionCache {
    pub fn new(export: &ExportConfig) -> Self {
        Self {
            resolution: export.resolution,
            bucket_size: export.bucket_size,
            upscaling: export.upscaling,
            preferred_sizes: export.preferred_size_pairs(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Replace the configuration, discarding all memoized results
    pub fn reconfigure(&mut self, export: &ExportConfig) {
        *self = Self::new(export);
    }

    /// The export dimensions for a source size, computed on first access
    pub fn get(&self, width: u32, height: u32) -> (u32, u32) {
        if let Some(&cached) = self.cache.borrow().get(&(width, height)) {
            return cached;
        }
        let result = optimize(
            width,
            height,
            self.resolution,
            self.bucket_size,
            self.upscaling,
            &self.preferred_sizes,
        );
        self.cache.borrow_mut().insert((width, height), result);
        result
    }
}
