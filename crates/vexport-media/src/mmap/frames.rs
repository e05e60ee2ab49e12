//! Raw frame files viewed as arrays.

use std::ops::Range;
use std::path::Path;

use ndarray::ArrayView4;

use super::view::MappedView;
use crate::error::{MediaError, MediaResult};

/// Geometry of a raw (headerless or fixed-header) frame file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub bytes_per_channel: usize,
    /// Bytes to skip before the first frame.
    pub header_bytes: usize,
}

impl FrameLayout {
    /// Packed 8-bit RGB, as produced by `-f rawvideo -pix_fmt rgb24`.
    pub fn rgb24(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            channels: 3,
            bytes_per_channel: 1,
            header_bytes: 0,
        }
    }

    /// Bytes in one frame.
    pub fn frame_size(&self) -> usize {
        self.width * self.height * self.channels * self.bytes_per_channel
    }

    pub(crate) fn validate(&self, path: &Path) -> MediaResult<()> {
        let size = self
            .width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.channels))
            .and_then(|n| n.checked_mul(self.bytes_per_channel));
        match size {
            Some(0) => Err(MediaError::mapping(path, "frame layout has zero size")),
            None => Err(MediaError::mapping(path, "frame layout overflows")),
            Some(_) => Ok(()),
        }
    }

    /// Complete frames in a file of `len` bytes.
    pub fn frames_in(&self, len: usize) -> usize {
        len.saturating_sub(self.header_bytes) / self.frame_size()
    }
}

/// A contiguous run of frames inside a mapped file.
#[derive(Debug, Clone)]
pub struct FrameRange {
    view: MappedView,
    layout: FrameLayout,
    start_frame: usize,
    actual_count: usize,
}

impl FrameRange {
    pub(crate) fn new(
        view: MappedView,
        layout: FrameLayout,
        start_frame: usize,
        requested: usize,
    ) -> MediaResult<Self> {
        let total = layout.frames_in(view.len());
        let actual_count = requested.min(total.saturating_sub(start_frame));
        if actual_count < requested {
            tracing::debug!(
                path = %view.path().display(),
                requested,
                actual_count,
                total,
                "Frame request runs past end of file"
            );
        }
        Ok(Self {
            view,
            layout,
            start_frame,
            actual_count,
        })
    }

    /// Frames actually available; may be less than requested.
    pub fn actual_count(&self) -> usize {
        self.actual_count
    }

    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn byte_range(&self) -> Range<usize> {
        let size = self.layout.frame_size();
        let start = (self.layout.header_bytes + self.start_frame.min(self.total_frames()) * size)
            .min(self.view.len());
        start..start + self.actual_count * size
    }

    fn total_frames(&self) -> usize {
        self.layout.frames_in(self.view.len())
    }

    fn bytes(&self) -> &[u8] {
        // Frame files are always mapped read-only.
        match self.view.as_slice() {
            Some(all) => &all[self.byte_range()],
            None => &[],
        }
    }

    /// Raw bytes of the whole range, zero-copy.
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes()
    }

    /// Bytes of the `index`-th frame within this range.
    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        if index >= self.actual_count {
            return None;
        }
        let size = self.layout.frame_size();
        self.bytes().get(index * size..(index + 1) * size)
    }

    /// View as `(frames, height, width, channels * bytes_per_channel)`.
    pub fn as_array(&self) -> MediaResult<ArrayView4<'_, u8>> {
        let shape = (
            self.actual_count,
            self.layout.height,
            self.layout.width,
            self.layout.channels * self.layout.bytes_per_channel,
        );
        ArrayView4::from_shape(shape, self.bytes())
            .map_err(|e| MediaError::internal(format!("frame array shape: {e}")))
    }
}
