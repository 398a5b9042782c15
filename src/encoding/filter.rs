// Per-frame pixel processing applied before frames reach the encoding backend
//
// 16-bit streams: mirror, then brightness rescale (cheaper on raw samples).
// Colour streams: nearest-neighbour resize to the target width, then mirror
// (cheaper on fewer pixels).

use crate::error::{RecordError, Result};
use crate::types::PixelFormat;

/// Fixed conversion chain for one stream, built once at stream open
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    format: PixelFormat,
    input_width: u32,
    input_height: u32,
    output_width: u32,
    output_height: u32,
    scale: f32,
}

impl FilterChain {
    /// `target_width` only applies to colour; 0 keeps the input size.
    pub fn new(format: PixelFormat, width: u32, height: u32, scale: f32, target_width: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RecordError::Config(format!("invalid frame size {}x{}", width, height)));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RecordError::Config(format!("invalid brightness scale {}", scale)));
        }
        if format == PixelFormat::Bgra && target_width == 1 {
            return Err(RecordError::Config("colour target width must be at least 2".into()));
        }

        let (output_width, output_height) = match format {
            PixelFormat::Bgra if target_width > 0 => {
                let aspect = height as f32 / width as f32;
                // 4:2:0 encoders need even dimensions
                let scaled = ((target_width as f32 * aspect) as u32) & !1;
                (target_width & !1, scaled.max(2))
            }
            _ => (width, height),
        };

        Ok(Self {
            format,
            input_width: width,
            input_height: height,
            output_width,
            output_height,
            scale,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }

    pub fn input_len(&self) -> usize {
        self.input_width as usize * self.input_height as usize * self.format.bytes_per_pixel()
    }

    /// Convert one tightly packed input frame into a packed output frame
    pub fn apply(&self, input: &[u8]) -> Result<Vec<u8>> {
        if input.len() != self.input_len() {
            return Err(RecordError::Config(format!(
                "frame holds {} bytes, expected {}",
                input.len(),
                self.input_len()
            )));
        }
        Ok(match self.format {
            PixelFormat::Gray16Le => self.mirror_and_scale_gray16(input),
            PixelFormat::Bgra => self.resize_and_mirror_bgra(input),
        })
    }

    fn mirror_and_scale_gray16(&self, input: &[u8]) -> Vec<u8> {
        let width = self.input_width as usize;
        let row_bytes = width * 2;
        let mut out = vec![0u8; input.len()];

        for (src_row, dst_row) in input.chunks_exact(row_bytes).zip(out.chunks_exact_mut(row_bytes)) {
            for x in 0..width {
                let src = (width - 1 - x) * 2;
                let raw = u16::from_le_bytes([src_row[src], src_row[src + 1]]);
                let scaled = (raw as f32 * self.scale).min(u16::MAX as f32) as u16;
                dst_row[x * 2..x * 2 + 2].copy_from_slice(&scaled.to_le_bytes());
            }
        }
        out
    }

    fn resize_and_mirror_bgra(&self, input: &[u8]) -> Vec<u8> {
        let (in_w, in_h) = (self.input_width as usize, self.input_height as usize);
        let (out_w, out_h) = (self.output_width as usize, self.output_height as usize);
        let mut out = vec![0u8; out_w * out_h * 4];

        for y in 0..out_h {
            let src_y = (y * in_h / out_h).min(in_h - 1);
            let src_row = &input[src_y * in_w * 4..(src_y + 1) * in_w * 4];
            let dst_row = &mut out[y * out_w * 4..(y + 1) * out_w * 4];
            for x in 0..out_w {
                // Sample the resized image at the mirrored column
                let mirrored = out_w - 1 - x;
                let src_x = (mirrored * in_w / out_w).min(in_w - 1);
                dst_row[x * 4..x * 4 + 4].copy_from_slice(&src_row[src_x * 4..src_x * 4 + 4]);
            }
        }
        out
    }
}
