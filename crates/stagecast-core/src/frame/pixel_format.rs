// crates/stagecast-core/src/frame/pixel_format.rs
//
// Pixel format descriptors. A descriptor is a format tag plus an ordered list
// of plane descriptors; the mixer consumes the planes as opaque byte spans,
// so this is the complete contract between decode and output.

/// Pixel layout tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray,
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    Argb,
    Abgr,
    Ycbcr,
    Ycbcra,
    Uyvy,
    Gbrp,
    Gbrap,
    Invalid,
}

/// Bits per component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BitDepth {
    #[default]
    Bit8,
    Bit10,
    Bit12,
    Bit16,
}

impl BitDepth {
    /// Bytes used to store one component at this depth.
    pub fn bytes_per_component(self) -> usize {
        match self {
            BitDepth::Bit8 => 1,
            BitDepth::Bit10 | BitDepth::Bit12 | BitDepth::Bit16 => 2,
        }
    }
}

/// One plane of a frame. `linesize` is in pixels; the byte span of a plane is
/// `linesize * channels * bytes_per_component * height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneDesc {
    pub linesize: usize,
    pub width:    usize,
    pub height:   usize,
    pub channels: usize,
    pub depth:    BitDepth,
}

impl PlaneDesc {
    pub fn new(linesize: usize, height: usize, channels: usize, depth: BitDepth) -> Self {
        Self { linesize, width: linesize, height, channels, depth }
    }

    pub fn size_bytes(&self) -> usize {
        self.linesize * self.channels * self.depth.bytes_per_component() * self.height
    }
}

/// Tagged pixel format plus its plane list.
///
/// The plane count must match the tag: packed formats carry one plane, planar
/// YCbCr three (four with alpha), GBRP three (four with alpha). `uyvy` is the
/// odd one out with two descriptors aliasing the same data span.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelFormatDesc {
    pub format: PixelFormat,
    pub planes: Vec<PlaneDesc>,
}

impl PixelFormatDesc {
    pub fn new(format: PixelFormat) -> Self {
        Self { format, planes: Vec::new() }
    }

    pub fn invalid() -> Self {
        Self::new(PixelFormat::Invalid)
    }

    pub fn is_valid(&self) -> bool {
        self.format != PixelFormat::Invalid
    }

    /// Whether the plane list is structurally consistent with the format tag.
    pub fn planes_match_format(&self) -> bool {
        match self.format {
            PixelFormat::Gray | PixelFormat::Rgb | PixelFormat::Bgr => self.planes.len() == 1,
            PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Abgr => {
                self.planes.len() == 1 && self.planes[0].channels == 4
            }
            PixelFormat::Ycbcr => self.planes.len() == 3,
            PixelFormat::Ycbcra => self.planes.len() == 4,
            PixelFormat::Uyvy => self.planes.len() == 2,
            PixelFormat::Gbrp => self.planes.len() == 3,
            PixelFormat::Gbrap => self.planes.len() == 4,
            PixelFormat::Invalid => self.planes.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_size_accounts_for_depth_and_channels() {
        let plane = PlaneDesc::new(1920, 1080, 1, BitDepth::Bit10);
        assert_eq!(plane.size_bytes(), 1920 * 1080 * 2);

        let packed = PlaneDesc::new(1280, 720, 4, BitDepth::Bit8);
        assert_eq!(packed.size_bytes(), 1280 * 720 * 4);
    }

    #[test]
    fn ycbcr_needs_three_planes() {
        let mut desc = PixelFormatDesc::new(PixelFormat::Ycbcr);
        desc.planes.push(PlaneDesc::new(1920, 1080, 1, BitDepth::Bit8));
        desc.planes.push(PlaneDesc::new(960, 540, 1, BitDepth::Bit8));
        assert!(!desc.planes_match_format());
        desc.planes.push(PlaneDesc::new(960, 540, 1, BitDepth::Bit8));
        assert!(desc.planes_match_format());
    }

    #[test]
    fn invalid_desc_has_no_planes() {
        assert!(PixelFormatDesc::invalid().planes_match_format());
        assert!(!PixelFormatDesc::invalid().is_valid());
    }
}
