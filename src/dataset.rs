//! Labeled image records, deterministic splitting and batched loading
//!
//! The label of each record is taken from its parent directory once, when the
//! record is created. Everything after that works on the explicit `label` field.

use crate::error::{PipelineError, Result};
use crate::services::ImageIOService;
use crate::utils::{ImagePreprocessor, PreprocessingOptions};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One image file and its category label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub label: String,
}

impl ImageRecord {
    /// Record labeled by the name of the file's parent directory
    #[must_use]
    pub fn from_parent_dir(path: PathBuf) -> Option<Self> {
        let label = path.parent()?.file_name()?.to_str()?.to_string();
        Some(Self { path, label })
    }
}

/// Ordered set of records plus the sorted class vocabulary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<ImageRecord>,
    classes: Vec<String>,
}

/// Result of a train/validation split
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDataset {
    pub train: Vec<ImageRecord>,
    pub valid: Vec<ImageRecord>,
    /// Class vocabulary of the whole dataset; index is the class id
    pub classes: Vec<String>,
}

impl SplitDataset {
    /// Fail if nothing was assigned to training
    ///
    /// # Errors
    /// - `PipelineError::EmptyTrainingSet`
    pub fn ensure_trainable(&self) -> Result<()> {
        if self.train.is_empty() {
            return Err(PipelineError::EmptyTrainingSet {
                total: self.train.len() + self.valid.len(),
                valid: self.valid.len(),
            });
        }
        Ok(())
    }
}

impl Dataset {
    /// Build a dataset from image paths under `root`
    ///
    /// Files that sit directly in `root` have no category and are skipped.
    #[must_use]
    pub fn from_paths<P: AsRef<Path>>(root: P, paths: &[PathBuf]) -> Self {
        let root = root.as_ref();
        let mut records: Vec<ImageRecord> = paths
            .iter()
            .filter_map(|path| {
                if path.parent() == Some(root) {
                    log::debug!("Ignoring {}: not inside a category directory", path.display());
                    return None;
                }
                ImageRecord::from_parent_dir(path.clone())
            })
            .collect();
        records.sort();
        records.dedup();
        Self::from_records(records)
    }

    /// Scan `root` recursively for image files
    ///
    /// # Errors
    /// - The directory tree cannot be listed
    pub fn from_directory<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let paths = ImageIOService::list_image_files(root, true)?;
        Ok(Self::from_paths(root, &paths))
    }

    /// Build from explicit records; they are sorted by path
    #[must_use]
    pub fn from_records(mut records: Vec<ImageRecord>) -> Self {
        records.sort_by(|a, b| a.path.cmp(&b.path));
        let mut classes: Vec<String> = records.iter().map(|r| r.label.clone()).collect();
        classes.sort();
        classes.dedup();
        Self { records, classes }
    }

    #[must_use]
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records per label
    #[must_use]
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Deterministic random split
    ///
    /// The record indices are permuted with a generator seeded from `seed`; the
    /// first `floor(valid_fraction * n)` of them go to validation and the rest to
    /// training. The result depends only on the file set, the seed and the fraction.
    ///
    /// # Errors
    /// - `valid_fraction` outside `0.0..1.0`
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn split(&self, valid_fraction: f64, seed: u64) -> Result<SplitDataset> {
        if !(0.0..1.0).contains(&valid_fraction) {
            return Err(PipelineError::config_value_error(
                "valid fraction",
                valid_fraction,
                "0.0-<1.0",
                Some(0.2),
            ));
        }

        let total = self.records.len();
        let mut indices: Vec<usize> = (0..total).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let cut = (valid_fraction * total as f64).floor() as usize;
        let (valid_idx, train_idx) = indices.split_at(cut.min(total));

        let pick = |idx: &[usize]| -> Vec<ImageRecord> {
            idx.iter()
                .filter_map(|&i| self.records.get(i).cloned())
                .collect()
        };

        Ok(SplitDataset {
            train: pick(train_idx),
            valid: pick(valid_idx),
            classes: self.classes.clone(),
        })
    }
}

/// A batch of preprocessed images
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[n, 3, S, S]`, ImageNet normalized
    pub images: Array4<f32>,
    /// Class index per image
    pub labels: Vec<usize>,
    pub paths: Vec<PathBuf>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Batched access to a list of records
#[derive(Debug, Clone)]
pub struct DataLoader {
    records: Vec<ImageRecord>,
    labels: Vec<usize>,
    classes: Vec<String>,
    batch_size: usize,
    options: PreprocessingOptions,
}

impl DataLoader {
    /// Create a loader over `records`
    ///
    /// # Errors
    /// - `batch_size` or `resize_px` is zero
    /// - A record's label is not in `classes`
    pub fn new(
        records: Vec<ImageRecord>,
        classes: &[String],
        batch_size: usize,
        resize_px: u32,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::config_value_error("batch size", batch_size, ">= 1", Some(8)));
        }
        if resize_px == 0 {
            return Err(PipelineError::config_value_error("resize size", resize_px, "1-4096", Some(192)));
        }

        let labels = records
            .iter()
            .map(|record| {
                classes.iter().position(|c| *c == record.label).ok_or_else(|| {
                    PipelineError::internal(format!(
                        "Label '{}' of {} is not a known class",
                        record.label,
                        record.path.display()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            records,
            labels,
            classes: classes.to_vec(),
            batch_size,
            options: PreprocessingOptions::imagenet(resize_px),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.records.len().div_ceil(self.batch_size)
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    /// Class index of every record, in loader order
    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[must_use]
    pub fn preprocessing(&self) -> &PreprocessingOptions {
        &self.options
    }

    /// Same records in a seeded random order
    #[must_use]
    pub fn shuffled(&self, seed: u64) -> Self {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));

        let mut shuffled = self.clone();
        shuffled.records = order.iter().filter_map(|&i| self.records.get(i).cloned()).collect();
        shuffled.labels = order.iter().filter_map(|&i| self.labels.get(i).copied()).collect();
        shuffled
    }

    /// Iterate over batches in loader order; the last batch may be smaller
    #[must_use]
    pub fn batches(&self) -> Batches<'_> {
        Batches {
            loader: self,
            position: 0,
        }
    }

    fn load_batch(&self, start: usize, end: usize) -> Result<Batch> {
        let records = self.records.get(start..end).unwrap_or_default();
        let images = records
            .iter()
            .map(|record| ImageIOService::load_image(&record.path))
            .collect::<Result<Vec<DynamicImage>>>()?;

        Ok(Batch {
            images: ImagePreprocessor::preprocess_batch(&images, &self.options)?,
            labels: self.labels.get(start..end).unwrap_or_default().to_vec(),
            paths: records.iter().map(|r| r.path.clone()).collect(),
        })
    }
}

/// Iterator returned by [`DataLoader::batches`]
pub struct Batches<'a> {
    loader: &'a DataLoader,
    position: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.loader.records.len() {
            return None;
        }
        let start = self.position;
        let end = (start + self.loader.batch_size).min(self.loader.records.len());
        self.position = end;
        Some(self.loader.load_batch(start, end))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .loader
            .records
            .len()
            .saturating_sub(self.position)
            .div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

const GRID_COLUMNS: u32 = 3;
const GRID_GAP: u32 = 4;

/// Render up to `max_n` records as a contact sheet of `tile_px` squares
///
/// # Errors
/// - `tile_px` is zero
/// - A record cannot be decoded
#[allow(clippy::cast_possible_truncation)]
pub fn sample_grid(records: &[ImageRecord], max_n: usize, tile_px: u32) -> Result<RgbImage> {
    if tile_px == 0 {
        return Err(PipelineError::invalid_config("Sample grid tile size must be at least 1"));
    }

    let shown = records.iter().take(max_n).collect::<Vec<_>>();
    let count = shown.len() as u32;
    let columns = count.clamp(1, GRID_COLUMNS);
    let rows = count.div_ceil(GRID_COLUMNS).max(1);
    let width = columns * tile_px + (columns + 1) * GRID_GAP;
    let height = rows * tile_px + (rows + 1) * GRID_GAP;

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let options = PreprocessingOptions::imagenet(tile_px);

    for (index, record) in shown.iter().enumerate() {
        let index = index as u32;
        let tile = ImagePreprocessor::squish(&ImageIOService::load_image(&record.path)?, &options);
        let x = GRID_GAP + (index % GRID_COLUMNS) * (tile_px + GRID_GAP);
        let y = GRID_GAP + (index / GRID_COLUMNS) * (tile_px + GRID_GAP);
        imageops::replace(&mut canvas, &tile, i64::from(x), i64::from(y));
    }

    Ok(canvas)
}
