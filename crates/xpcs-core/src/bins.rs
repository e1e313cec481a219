use std::fmt;

use ndarray::{Array2, ArrayView2, ArrayView3, ArrayViewMut1, Axis};
use num_traits::AsPrimitive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Identifier of one group of pixels analyzed as an independent curve.
///
/// `Whole` is used when no bin mask is configured: every pixel of the frame
/// belongs to a single implicit bin. It never collides with the
/// mask labels, where `0` always means "excluded pixel".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bin {
    Whole,
    Label(u32),
}

impl Bin {
    pub fn label(&self) -> Option<u32> {
        match self {
            Bin::Whole => None,
            Bin::Label(label) => Some(*label),
        }
    }
}

impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bin::Whole => write!(f, "whole"),
            Bin::Label(label) => write!(f, "{label}"),
        }
    }
}

/// Pixels of a frame that contribute to one bin.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelSelection {
    /// Every pixel of a frame with this many pixels.
    All(usize),
    /// Row-major flat indices (`row * cols + col`), ascending.
    Indices(Vec<usize>),
}

impl PixelSelection {
    pub fn len(&self) -> usize {
        match self {
            PixelSelection::All(count) => *count,
            PixelSelection::Indices(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extract the pixels of one bin from a frame stack.
///
/// Returns a `(n_frames, n_pixels)` matrix converted to `f32`; columns follow
/// the row-major order of the selected pixels.
pub fn extract_pixels<A>(frames: ArrayView3<'_, A>, selection: &PixelSelection) -> Array2<f32>
where
    A: AsPrimitive<f32> + Sync,
{
    let (n_frames, _, cols) = frames.dim();
    let mut out = Array2::<f32>::zeros((n_frames, selection.len()));

    if n_frames * selection.len() >= PARALLEL_PIXEL_THRESHOLD {
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(frames.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(lane, frame)| gather_frame(frame, selection, cols, lane));
    } else {
        for (lane, frame) in out.axis_iter_mut(Axis(0)).zip(frames.axis_iter(Axis(0))) {
            gather_frame(frame, selection, cols, lane);
        }
    }

    out
}

fn gather_frame<A>(
    frame: ArrayView2<'_, A>,
    selection: &PixelSelection,
    cols: usize,
    mut lane: ArrayViewMut1<'_, f32>,
) where
    A: AsPrimitive<f32>,
{
    match selection {
        PixelSelection::All(_) => {
            for (dst, &src) in lane.iter_mut().zip(frame.iter()) {
                *dst = src.as_();
            }
        }
        PixelSelection::Indices(indices) => {
            for (dst, &idx) in lane.iter_mut().zip(indices) {
                *dst = frame[[idx / cols, idx % cols]].as_();
            }
        }
    }
}
