use image::{ColorType, DynamicImage, RgbImage, RgbaImage};

use crate::{convert, shm::FrameFormat, shotcopyerror::ShotCopyError};

/// How the fourth byte of every pixel is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// R, G, B and a padding byte, always 255
    Rgbx,
    /// R, G, B, A straight alpha
    Rgba,
}

/// A captured frame, top-down and red-first, rows packed without padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub layout: ChannelLayout,
    pub width: u32,
    pub height: u32,
    /// always `4 * width`
    pub stride: u32,
    pub data: Vec<u8>,
}

impl CapturedImage {
    pub fn color_type(&self) -> ColorType {
        match self.layout {
            ChannelLayout::Rgbx => ColorType::Rgb8,
            ChannelLayout::Rgba => ColorType::Rgba8,
        }
    }

    /// Pixels of row `y` counted from the top, `None` past the last row
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let stride = self.stride as usize;
        let start = (y as usize).checked_mul(stride)?;
        self.data.get(start..start.checked_add(stride)?)
    }

    /// padding bytes are dropped for [ChannelLayout::Rgbx]
    pub fn into_dynamic_image(self) -> Option<DynamicImage> {
        match self.layout {
            ChannelLayout::Rgba => RgbaImage::from_raw(self.width, self.height, self.data)
                .map(DynamicImage::ImageRgba8),
            ChannelLayout::Rgbx => {
                let rgb: Vec<u8> = self
                    .data
                    .chunks_exact(4)
                    .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                    .collect();
                RgbImage::from_raw(self.width, self.height, rgb).map(DynamicImage::ImageRgb8)
            }
        }
    }
}

/// Copy the raw frame out of `data` into a [CapturedImage].
///
/// `data` is the whole shm region described by `format`. When `y_invert` is set
/// the compositor delivered the rows bottom-up and they are reversed here.
pub fn materialize(
    data: &[u8],
    format: &FrameFormat,
    y_invert: bool,
) -> Result<CapturedImage, ShotCopyError> {
    let FrameFormat {
        format: shm_format,
        width,
        height,
        stride,
    } = *format;
    let converter = convert::create_converter(shm_format)
        .ok_or(ShotCopyError::UnsupportedFormat(shm_format.into()))?;

    let row_bytes = width.checked_mul(4).ok_or_else(|| invalid_geometry(format))?;
    let needed = (stride as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| invalid_geometry(format))?;
    if row_bytes == 0 || row_bytes > stride || data.len() < needed {
        return Err(invalid_geometry(format));
    }

    let row_bytes = row_bytes as usize;
    let mut out = vec![0u8; row_bytes * height as usize];
    for (y, dst) in out.chunks_exact_mut(row_bytes).enumerate() {
        let src_row = if y_invert {
            height as usize - 1 - y
        } else {
            y
        };
        let start = src_row * stride as usize;
        converter.convert_row(&data[start..start + row_bytes], dst);
    }

    Ok(CapturedImage {
        layout: converter.layout(),
        width,
        height,
        stride: row_bytes as u32,
        data: out,
    })
}

fn invalid_geometry(format: &FrameFormat) -> ShotCopyError {
    ShotCopyError::InvalidGeometry {
        width: format.width,
        height: format.height,
        stride: format.stride,
    }
}
