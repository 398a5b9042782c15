// Data handed to the recorder by the capture producer

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RecordError, Result};
use crate::skeleton::Joint;

/// Raw pixel layout of an image plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 16-bit little-endian single channel (depth in mm, IR intensity)
    Gray16Le,
    /// 32-bit blue/green/red/alpha
    Bgra,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray16Le => 2,
            PixelFormat::Bgra => 4,
        }
    }
}

/// The independently recorded image streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Depth,
    Colour,
    Infrared,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Depth, StreamKind::Colour, StreamKind::Infrared];

    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            StreamKind::Depth | StreamKind::Infrared => PixelFormat::Gray16Le,
            StreamKind::Colour => PixelFormat::Bgra,
        }
    }

    /// Suffix appended to the session file stem
    pub fn file_suffix(&self) -> &'static str {
        match self {
            StreamKind::Depth => "_depth",
            StreamKind::Colour => "_colour",
            StreamKind::Infrared => "_ir",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamKind::Depth => "Depth",
            StreamKind::Colour => "Colour",
            StreamKind::Infrared => "IR",
        })
    }
}

/// A borrowed image from the capture thread. Only valid for the duration of
/// one `data_callback`.
#[derive(Debug, Clone, Copy)]
pub struct ImagePlane<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows
    pub stride: u32,
}

impl<'a> ImagePlane<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, stride: u32) -> Self {
        Self {
            data,
            width,
            height,
            stride,
        }
    }

    /// Copy the top-left `width` x `height` region into a tightly packed buffer.
    ///
    /// Fails if the plane cannot supply that region.
    pub fn copy_packed(&self, format: PixelFormat, width: u32, height: u32) -> Result<Vec<u8>> {
        let row_bytes = width as usize * format.bytes_per_pixel();
        let stride = self.stride as usize;

        if self.width < width || self.height < height || stride < row_bytes {
            return Err(RecordError::Config(format!(
                "plane {}x{} (stride {}) cannot supply {}x{} frame",
                self.width, self.height, self.stride, width, height
            )));
        }
        let needed = match height {
            0 => 0,
            h => stride * (h as usize - 1) + row_bytes,
        };
        if self.data.len() < needed {
            return Err(RecordError::Config(format!(
                "plane buffer holds {} bytes, {} needed",
                self.data.len(),
                needed
            )));
        }

        let mut packed = Vec::with_capacity(row_bytes * height as usize);
        for row in self.data.chunks(stride).take(height as usize) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        Ok(packed)
    }
}

/// One tracked capture. Absent planes are `None`; an empty joint slice means
/// no body was detected.
#[derive(Debug, Clone, Copy)]
pub struct SensorSample<'a> {
    /// Device clock, microseconds
    pub timestamp: u64,
    pub depth: Option<ImagePlane<'a>>,
    pub colour: Option<ImagePlane<'a>>,
    pub infrared: Option<ImagePlane<'a>>,
    /// Body index mask; preview only, never recorded
    pub shadow_mask: Option<ImagePlane<'a>>,
    pub joints: &'a [Joint],
}

impl<'a> SensorSample<'a> {
    pub fn plane(&self, kind: StreamKind) -> Option<&ImagePlane<'a>> {
        match kind {
            StreamKind::Depth => self.depth.as_ref(),
            StreamKind::Colour => self.colour.as_ref(),
            StreamKind::Infrared => self.infrared.as_ref(),
        }
    }
}

/// Width and height of a sensor stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Valid numeric range of a 16-bit stream, in raw sensor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u16,
    pub max: u16,
}

impl ValueRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Factor that stretches the valid range over the full 16-bit output range
    pub fn brightness_scale(&self) -> f32 {
        let span = self.max.saturating_sub(self.min);
        if span == 0 {
            1.0
        } else {
            65536.0 / span as f32
        }
    }
}

/// Sensor geometry, supplied once the device is ready
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationInfo {
    pub depth: Dimensions,
    pub colour: Dimensions,
    pub infrared: Dimensions,
    pub fps: u32,
    pub depth_range: ValueRange,
    pub ir_range: ValueRange,
}

impl CalibrationInfo {
    pub fn dimensions(&self, kind: StreamKind) -> Dimensions {
        match kind {
            StreamKind::Depth => self.depth,
            StreamKind::Colour => self.colour,
            StreamKind::Infrared => self.infrared,
        }
    }

    /// Brightness normalisation applied before encoding
    pub fn scale(&self, kind: StreamKind) -> f32 {
        match kind {
            StreamKind::Depth => self.depth_range.brightness_scale(),
            StreamKind::Infrared => self.ir_range.brightness_scale(),
            StreamKind::Colour => 1.0,
        }
    }
}

/// Which data types a session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOptions {
    pub depth: bool,
    pub colour: bool,
    pub infrared: bool,
    pub skeleton: bool,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            depth: true,
            colour: false,
            infrared: false,
            skeleton: true,
        }
    }
}

impl RecordOptions {
    pub fn new(depth: bool, colour: bool, infrared: bool, skeleton: bool) -> Self {
        Self {
            depth,
            colour,
            infrared,
            skeleton,
        }
    }

    pub fn records(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Depth => self.depth,
            StreamKind::Colour => self.colour,
            StreamKind::Infrared => self.infrared,
        }
    }

    pub fn image_streams(&self) -> impl Iterator<Item = StreamKind> + '_ {
        StreamKind::ALL.into_iter().filter(|kind| self.records(*kind))
    }

    pub fn is_empty(&self) -> bool {
        !(self.depth || self.colour || self.infrared || self.skeleton)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_packed_strips_row_padding() {
        // 2x2 gray16 plane with 2 bytes of padding per row
        let data = [1, 0, 2, 0, 0xAA, 0xAA, 3, 0, 4, 0, 0xAA, 0xAA];
        let plane = ImagePlane::new(&data, 2, 2, 6);

        let packed = plane.copy_packed(PixelFormat::Gray16Le, 2, 2).unwrap();
        assert_eq!(packed, vec![1, 0, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn copy_packed_accepts_unpadded_last_row() {
        let data = [1, 0, 2, 0, 0xAA, 0xAA, 3, 0, 4, 0];
        let plane = ImagePlane::new(&data, 2, 2, 6);
        assert!(plane.copy_packed(PixelFormat::Gray16Le, 2, 2).is_ok());
    }

    #[test]
    fn copy_packed_rejects_undersized_plane() {
        let data = [0u8; 8];
        let plane = ImagePlane::new(&data, 2, 2, 4);
        let err = plane.copy_packed(PixelFormat::Gray16Le, 4, 2).unwrap_err();
        assert!(matches!(err, RecordError::Config(_)));

        let short = [0u8; 5];
        let plane = ImagePlane::new(&short, 2, 2, 4);
        assert!(plane.copy_packed(PixelFormat::Gray16Le, 2, 2).is_err());
    }

    #[test]
    fn brightness_scale_covers_full_range() {
        let range = ValueRange::new(0, 1024);
        assert_eq!(range.brightness_scale(), 64.0);
        assert_eq!(ValueRange::new(10, 10).brightness_scale(), 1.0);
    }

    #[test]
    fn options_list_enabled_image_streams_in_order() {
        let options = RecordOptions::new(true, false, true, false);
        let kinds: Vec<_> = options.image_streams().collect();
        assert_eq!(kinds, vec![StreamKind::Depth, StreamKind::Infrared]);
        assert!(RecordOptions::new(false, false, false, false).is_empty());
    }
}
