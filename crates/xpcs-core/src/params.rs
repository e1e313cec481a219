use std::collections::BTreeMap;

use ndarray::Array2;

use crate::bins::{Bin, PixelSelection};
use crate::consts::DEFAULT_SCALE_FACTOR;
use crate::error::{Result, XpcsError};

/// Per-bin normalization factors, keyed by bin.
pub type ScaleFactors = BTreeMap<Bin, f32>;

/// Frame geometry, binning and normalization shared by every algorithm.
///
/// Everything here is derived once at construction and stays read-only for
/// the lifetime of a correlator.
#[derive(Clone, Debug)]
pub struct CorrelatorParams {
    shape: (usize, usize),
    n_frames: usize,
    mask: Option<Array2<u32>>,
    bins: Vec<Bin>,
    selections: BTreeMap<Bin, PixelSelection>,
    scale_factors: ScaleFactors,
}

impl CorrelatorParams {
    /// Validate the inputs and derive the bin set.
    ///
    /// Without a mask the whole frame forms a single [`Bin::Whole`]. With a
    /// mask, every distinct positive label becomes a bin, in ascending order.
    /// Supplied scale factors must cover exactly that bin set.
    pub fn new(
        shape: (usize, usize),
        n_frames: usize,
        mask: Option<Array2<u32>>,
        scale_factors: Option<ScaleFactors>,
    ) -> Result<Self> {
        if n_frames == 0 {
            return Err(XpcsError::InvalidConfig(
                "frame count must be at least 1".into(),
            ));
        }
        if shape.0 == 0 || shape.1 == 0 {
            return Err(XpcsError::InvalidConfig(format!(
                "frame shape {}x{} has no pixels",
                shape.0, shape.1
            )));
        }

        let selections = match &mask {
            None => BTreeMap::from([(Bin::Whole, PixelSelection::All(shape.0 * shape.1))]),
            Some(mask) => {
                if mask.dim() != shape {
                    return Err(XpcsError::ShapeMismatch {
                        what: "bin mask",
                        expected: vec![shape.0, shape.1],
                        found: vec![mask.nrows(), mask.ncols()],
                    });
                }
                let selections = label_selections(mask);
                if selections.is_empty() {
                    return Err(XpcsError::InvalidConfig(
                        "bin mask contains no labelled pixel".into(),
                    ));
                }
                selections
            }
        };

        let bins: Vec<Bin> = selections.keys().copied().collect();
        for bin in &bins {
            if selections[bin].is_empty() {
                return Err(XpcsError::EmptyBin { bin: *bin });
            }
        }
        let scale_factors = resolve_scale_factors(&bins, scale_factors)?;

        tracing::debug!(
            rows = shape.0,
            cols = shape.1,
            n_frames,
            n_bins = bins.len(),
            "correlator parameters"
        );

        Ok(Self {
            shape,
            n_frames,
            mask,
            bins,
            selections,
            scale_factors,
        })
    }

    /// Restrict the bin set to an explicit list of mask labels.
    ///
    /// Labels are deduplicated and kept in ascending order. A label with no
    /// pixel in the mask is an [`XpcsError::EmptyBin`].
    pub fn with_bins(mut self, labels: &[u32]) -> Result<Self> {
        if self.mask.is_none() {
            return Err(XpcsError::InvalidConfig(
                "explicit bins require a bin mask".into(),
            ));
        }

        let mut wanted: Vec<Bin> = Vec::with_capacity(labels.len());
        for &label in labels {
            if label == 0 {
                return Err(XpcsError::InvalidConfig(
                    "label 0 marks excluded pixels and cannot be a bin".into(),
                ));
            }
            let bin = Bin::Label(label);
            if !self.selections.contains_key(&bin) {
                return Err(XpcsError::EmptyBin { bin });
            }
            wanted.push(bin);
        }
        wanted.sort_unstable();
        wanted.dedup();
        if wanted.is_empty() {
            return Err(XpcsError::InvalidConfig("no bin requested".into()));
        }

        self.selections.retain(|bin, _| wanted.binary_search(bin).is_ok());
        self.scale_factors.retain(|bin, _| wanted.binary_search(bin).is_ok());
        self.bins = wanted;
        Ok(self)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Bins in result-row order.
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// Row of `bin` in the result matrix.
    pub fn bin_index(&self, bin: Bin) -> Result<usize> {
        self.bins
            .binary_search(&bin)
            .map_err(|_| XpcsError::UnknownBin(bin))
    }

    pub fn pixels(&self, bin: Bin) -> Result<&PixelSelection> {
        self.selections.get(&bin).ok_or(XpcsError::UnknownBin(bin))
    }

    pub fn pixel_count(&self, bin: Bin) -> Result<usize> {
        self.pixels(bin).map(PixelSelection::len)
    }

    pub fn scale_factor(&self, bin: Bin) -> Result<f32> {
        self.scale_factors
            .get(&bin)
            .copied()
            .ok_or(XpcsError::UnknownBin(bin))
    }

    pub fn scale_factors(&self) -> &ScaleFactors {
        &self.scale_factors
    }

    /// Check a frame stack's `(n_frames, rows, cols)` against these parameters.
    pub fn validate_frames(&self, dim: (usize, usize, usize)) -> Result<()> {
        let expected = (self.n_frames, self.shape.0, self.shape.1);
        if dim != expected {
            return Err(XpcsError::ShapeMismatch {
                what: "frame stack",
                expected: vec![expected.0, expected.1, expected.2],
                found: vec![dim.0, dim.1, dim.2],
            });
        }
        Ok(())
    }
}

fn label_selections(mask: &Array2<u32>) -> BTreeMap<Bin, PixelSelection> {
    let mut indices: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (flat, &label) in mask.iter().enumerate() {
        if label > 0 {
            indices.entry(label).or_default().push(flat);
        }
    }
    indices
        .into_iter()
        .map(|(label, idx)| (Bin::Label(label), PixelSelection::Indices(idx)))
        .collect()
}

fn resolve_scale_factors(bins: &[Bin], supplied: Option<ScaleFactors>) -> Result<ScaleFactors> {
    let Some(supplied) = supplied else {
        return Ok(bins.iter().map(|&b| (b, DEFAULT_SCALE_FACTOR)).collect());
    };

    for (bin, factor) in &supplied {
        if bins.binary_search(bin).is_err() {
            return Err(XpcsError::UnknownBin(*bin));
        }
        if !factor.is_finite() || *factor <= 0.0 {
            return Err(XpcsError::InvalidConfig(format!(
                "scale factor for bin {bin} must be positive, got {factor}"
            )));
        }
    }
    if let Some(missing) = bins.iter().find(|b| !supplied.contains_key(*b)) {
        return Err(XpcsError::InvalidConfig(format!(
            "missing scale factor for bin {missing}"
        )));
    }

    Ok(supplied)
}
