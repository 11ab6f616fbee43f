//! Per-frame delivery.
//!
//! This module enforces the frame lifetime rules at the type level.
//!
//! - `Frame<'a>`: borrowed view over one native frame's three planes. A sink only
//!   ever sees `&Frame<'_>`, so it cannot keep plane references past the call.
//! - `deliver_frame`: consumes the native frame. The buffer is returned to its pool
//!   exactly once when the frame drops at the end of the call, on every path
//!   (delivered, no sink, malformed, sink panicked).
//! - `PlanarBuffer`: owned I420 storage for backends that copy frames out of the
//!   driver.

use std::panic::{self, AssertUnwindSafe};

use crate::device::NativeFrame;

/// One image plane.
#[derive(Clone, Copy, Debug)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows.
    pub row_stride: usize,
    /// Bytes between horizontally adjacent samples.
    pub pixel_stride: usize,
}

/// Planar YUV 4:2:0 frame, valid only for the duration of a sink call.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    pub y: Plane<'a>,
    pub u: Plane<'a>,
    pub v: Plane<'a>,
    pub width: u32,
    pub height: u32,
}

impl<'a> Frame<'a> {
    /// Borrow the planes of a native frame. `None` if any plane is missing.
    pub fn from_native(native: &'a dyn NativeFrame) -> Option<Self> {
        Some(Self {
            y: native.plane(0)?,
            u: native.plane(1)?,
            v: native.plane(2)?,
            width: native.width(),
            height: native.height(),
        })
    }
}

/// Consumer of decoded frames. Runs on the session worker thread.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &Frame<'_>);
}

impl<F> FrameSink for F
where
    F: Fn(&Frame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: &Frame<'_>) {
        self(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// No sink registered; the frame was dropped.
    NoSink,
    /// The native frame did not expose three planes.
    Malformed,
    SinkPanicked,
}

/// Hand `native` to `sink` and release it.
pub fn deliver_frame(native: Box<dyn NativeFrame>, sink: Option<&dyn FrameSink>) -> DeliveryOutcome {
    let Some(sink) = sink else {
        return DeliveryOutcome::NoSink;
    };
    let Some(frame) = Frame::from_native(native.as_ref()) else {
        log::warn!(
            "dropping {}x{} frame without three planes",
            native.width(),
            native.height()
        );
        return DeliveryOutcome::Malformed;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| sink.on_frame(&frame))) {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(_) => {
            log::error!("frame sink panicked; frame released");
            DeliveryOutcome::SinkPanicked
        }
    }
}

/// Owned I420 (YUV 4:2:0, three planes, chroma subsampled 2x2) image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanarBuffer {
    width: u32,
    height: u32,
    y_stride: usize,
    chroma_stride: usize,
    data: Vec<u8>,
}

impl PlanarBuffer {
    /// Allocate a tightly packed buffer filled with `luma` / `chroma`.
    pub fn filled(width: u32, height: u32, luma: u8, chroma: u8) -> Self {
        let y_stride = width as usize;
        let chroma_stride = (width as usize).div_ceil(2);
        let y_len = y_stride * height as usize;
        let chroma_len = chroma_stride * (height as usize).div_ceil(2);
        let mut data = vec![luma; y_len + 2 * chroma_len];
        data[y_len..].fill(chroma);
        Self {
            width,
            height,
            y_stride,
            chroma_stride,
            data,
        }
    }

    /// Wrap a driver buffer laid out as I420 with the given luma row stride.
    ///
    /// Returns `None` when `data` is too short for the geometry.
    pub fn from_i420(width: u32, height: u32, y_stride: usize, data: &[u8]) -> Option<Self> {
        let y_stride = y_stride.max(width as usize);
        let chroma_stride = y_stride.div_ceil(2);
        let y_len = y_stride * height as usize;
        let chroma_len = chroma_stride * (height as usize).div_ceil(2);
        let needed = y_len + 2 * chroma_len;
        let data = data.get(..needed)?.to_vec();
        Some(Self {
            width,
            height,
            y_stride,
            chroma_stride,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn plane(&self, index: usize) -> Option<Plane<'_>> {
        let y_len = self.y_stride * self.height as usize;
        let chroma_len = self.chroma_stride * (self.height as usize).div_ceil(2);
        let (range, row_stride) = match index {
            0 => (0..y_len, self.y_stride),
            1 => (y_len..y_len + chroma_len, self.chroma_stride),
            2 => (y_len + chroma_len..y_len + 2 * chroma_len, self.chroma_stride),
            _ => return None,
        };
        Some(Plane {
            data: self.data.get(range)?,
            row_stride,
            pixel_stride: 1,
        })
    }
}
