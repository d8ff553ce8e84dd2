use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

/// Owned 8-bit image with `channels` interleaved samples per pixel
/// (1 = gray, 3 = RGB, 4 = RGBA).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterleavedImage {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl InterleavedImage {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; width * height * channels],
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width as u32, self.height as u32)
    }

    /// Copy out the rectangle `[x, x+w) × [y, y+h)`, clipped to the image.
    pub fn crop(&self, x: usize, y: usize, w: usize, h: usize) -> InterleavedImage {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let w = w.min(self.width - x0);
        let h = h.min(self.height - y0);
        let mut out = InterleavedImage::new(w, h, self.channels);
        let row_len = w * self.channels;
        for row in 0..h {
            let src_start = ((y0 + row) * self.width + x0) * self.channels;
            let dst_start = row * row_len;
            out.data[dst_start..dst_start + row_len]
                .copy_from_slice(&self.data[src_start..src_start + row_len]);
        }
        out
    }
}

/// Bilinear sample at `(x, y)` with edge replication outside the image,
/// the border mode sub-pixel corner refinement expects.
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    if src.width == 0 || src.height == 0 {
        return 0.0;
    }
    let max_x = (src.width - 1) as f32;
    let max_y = (src.height - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let (xi, yi) = (x as usize, y as usize);
    let (tx, ty) = (x - xi as f32, y - yi as f32);
    let xn = (xi + 1).min(src.width - 1);
    let row0 = &src.data[yi * src.width..];
    let row1 = &src.data[(yi + 1).min(src.height - 1) * src.width..];

    let top = row0[xi] as f32 * (1.0 - tx) + row0[xn] as f32 * tx;
    let bottom = row1[xi] as f32 * (1.0 - tx) + row1[xn] as f32 * tx;
    top * (1.0 - ty) + bottom * ty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let data = [0u8, 100, 200, 50];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(sample_bilinear(&view, 0.0, 0.0), 0.0);
        assert!((sample_bilinear(&view, 0.5, 0.0) - 50.0).abs() < 1e-4);
        assert!((sample_bilinear(&view, 0.5, 0.5) - 87.5).abs() < 1e-4);
    }

    #[test]
    fn outside_samples_replicate_the_edge() {
        let data = [10u8, 20, 30, 40];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(sample_bilinear(&view, -3.0, 0.0), 10.0);
        assert_eq!(sample_bilinear(&view, 1.5, 5.0), 40.0);
        assert!((sample_bilinear(&view, 0.5, -1.0) - 15.0).abs() < 1e-4);
    }

    #[test]
    fn crop_is_clipped_to_bounds() {
        let mut img = InterleavedImage::new(4, 3, 3);
        for (i, v) in img.data.iter_mut().enumerate() {
            *v = i as u8;
        }
        let c = img.crop(2, 1, 10, 10);
        assert_eq!((c.width, c.height, c.channels), (2, 2, 3));
        assert_eq!(&c.data[..3], &img.data[(4 + 2) * 3..(4 + 2) * 3 + 3]);
    }
}
