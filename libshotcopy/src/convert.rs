use wayland_client::protocol::wl_shm;

use crate::capturedimage::ChannelLayout;

/// Rewrites one row of compositor pixels into red-first bytes
pub(crate) trait Convert {
    fn layout(&self) -> ChannelLayout;

    /// `src` and `dst` hold the same number of whole pixels
    fn convert_row(&self, src: &[u8], dst: &mut [u8]);
}

/// Memory order is already R, G, B, A/X
struct ConvertNone {
    layout: ChannelLayout,
}

/// Memory order is B, G, R, A/X on little endian, swap red and blue
struct ConvertRGB8 {
    layout: ChannelLayout,
}

fn fix_padding(layout: ChannelLayout, pixel: &mut [u8]) {
    if layout == ChannelLayout::Rgbx {
        pixel[3] = 255;
    }
}

impl Convert for ConvertNone {
    fn layout(&self) -> ChannelLayout {
        self.layout
    }

    fn convert_row(&self, src: &[u8], dst: &mut [u8]) {
        dst.copy_from_slice(src);
        for pixel in dst.chunks_exact_mut(4) {
            fix_padding(self.layout, pixel);
        }
    }
}

impl Convert for ConvertRGB8 {
    fn layout(&self) -> ChannelLayout {
        self.layout
    }

    fn convert_row(&self, src: &[u8], dst: &mut [u8]) {
        for (from, to) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
            to[0] = from[2];
            to[1] = from[1];
            to[2] = from[0];
            to[3] = from[3];
            fix_padding(self.layout, to);
        }
    }
}

/// Only the four 8 bit per channel formats are read, everything else has no converter
pub(crate) fn create_converter(format: wl_shm::Format) -> Option<Box<dyn Convert>> {
    match format {
        wl_shm::Format::Xbgr8888 => Some(Box::new(ConvertNone {
            layout: ChannelLayout::Rgbx,
        })),
        wl_shm::Format::Abgr8888 => Some(Box::new(ConvertNone {
            layout: ChannelLayout::Rgba,
        })),
        wl_shm::Format::Xrgb8888 => Some(Box::new(ConvertRGB8 {
            layout: ChannelLayout::Rgbx,
        })),
        wl_shm::Format::Argb8888 => Some(Box::new(ConvertRGB8 {
            layout: ChannelLayout::Rgba,
        })),
        _ => None,
    }
}
