//! Pure image transforms feeding the canonical tensor.

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::constants::vision::{CANONICAL_SIZE, CANONICAL_TENSOR_LEN, MEAN_PIXEL, TARGET_ASPECT};
use crate::error::{AppError, Result};

/// A height x width x 3 frame in blue-green-red byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BgrImage {
    /// Wrap a row-major BGR buffer.
    ///
    /// # Arguments
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    /// * `data` - `width * height * 3` bytes, rows top to bottom
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(AppError::InvalidInput(format!(
                "image must be non-empty, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(AppError::InvalidInput(format!(
                "expected {} bytes for a {}x{} BGR image, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a BGR frame from an RGB image (e.g. one decoded from disk).
    pub fn from_rgb(image: &RgbImage) -> Self {
        let mut data = image.as_raw().clone();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }
}

/// The fixed-size RGB u8 tensor the remote model expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTensor {
    data: Vec<u8>,
}

impl CanonicalTensor {
    pub fn width(&self) -> u32 {
        CANONICAL_SIZE
    }

    pub fn height(&self) -> u32 {
        CANONICAL_SIZE
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flattened bytes for the wire.
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }
}

/// Turns arbitrary BGR frames into [`CanonicalTensor`]s.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    aspect: f64,
    size: u32,
    fill: Rgb<u8>,
    filter: FilterType,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            aspect: TARGET_ASPECT,
            size: CANONICAL_SIZE,
            fill: Rgb(MEAN_PIXEL),
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel swap, pad to 16:9 with the mean pixel, resize to 299 x 299.
    pub fn prepare(&self, image: &BgrImage) -> Result<CanonicalTensor> {
        let rgb = bgr_to_rgb(image)?;
        let padded = pad_to_aspect(&rgb, self.aspect, self.fill);
        let resized = resize_to(&padded, Some(self.size), Some(self.size), self.filter);

        let data = resized.into_raw();
        debug_assert_eq!(data.len(), CANONICAL_TENSOR_LEN);
        Ok(CanonicalTensor { data })
    }
}

/// Reverse the channel order of a BGR frame.
pub fn bgr_to_rgb(image: &BgrImage) -> Result<RgbImage> {
    let mut data = image.data.clone();
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    RgbImage::from_raw(image.width, image.height, data)
        .ok_or_else(|| AppError::InvalidInput("BGR buffer does not match its dimensions".into()))
}

/// Symmetrically pad `img` with `fill` until width / height equals `aspect`.
///
/// A narrow image gets a wider canvas, a short image a taller one. The image
/// is centered; an odd remainder leaves the extra row/column on the right or bottom.
pub fn pad_to_aspect(img: &RgbImage, aspect: f64, fill: Rgb<u8>) -> RgbImage {
    let (ow, oh) = img.dimensions();
    let current = ow as f64 / oh as f64;

    let (nw, nh) = if aspect > current {
        ((oh as f64 * aspect) as u32, oh)
    } else if aspect < current {
        (ow, (ow as f64 / aspect) as u32)
    } else {
        return img.clone();
    };

    // Truncation can land back on the current size.
    if nw <= ow && nh <= oh {
        return img.clone();
    }

    let left = nw.saturating_sub(ow) / 2;
    let top = nh.saturating_sub(oh) / 2;
    let mut canvas = RgbImage::from_pixel(nw.max(ow), nh.max(oh), fill);
    imageops::replace(&mut canvas, img, left as i64, top as i64);
    canvas
}

/// Resize to `width` x `height`.
///
/// With only one side given the other follows the current aspect ratio;
/// with both given the aspect ratio is not preserved.
pub fn resize_to(
    img: &RgbImage,
    width: Option<u32>,
    height: Option<u32>,
    filter: FilterType,
) -> RgbImage {
    let (ow, oh) = img.dimensions();
    let asp = ow as f64 / oh as f64;

    let (w, h) = match (width, height) {
        (None, None) => return img.clone(),
        (Some(w), Some(h)) => (w, h),
        (None, Some(h)) => ((h as f64 * asp) as u32, h),
        (Some(w), None) => (w, (w as f64 / asp) as u32),
    };

    imageops::resize(img, w.max(1), h.max(1), filter)
}

/// Crop the central `width` x `height` region.
///
/// Leaves the image untouched if either target side exceeds the source.
pub fn center_crop_to(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (ow, oh) = img.dimensions();
    if ow < width || oh < height {
        return img.clone();
    }
    let left = (ow - width) / 2;
    let top = (oh - height) / 2;
    imageops::crop_imm(img, left, top, width, height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_bgr(width: u32, height: u32, bgr: [u8; 3]) -> BgrImage {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        BgrImage::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn test_prepare_always_canonical() {
        let prep = ImagePreprocessor::new();
        for (w, h) in [(1, 1), (640, 480), (1920, 1080), (37, 911), (1200, 50)] {
            let tensor = prep.prepare(&solid_bgr(w, h, [10, 20, 30])).unwrap();
            assert_eq!(tensor.len(), CANONICAL_TENSOR_LEN, "input {}x{}", w, h);
            assert_eq!(tensor.width(), 299);
            assert_eq!(tensor.height(), 299);
        }
    }

    #[test]
    fn test_prepare_outputs_rgb_order() {
        // 16:9 input skips padding, so every pixel keeps the source color.
        let tensor = ImagePreprocessor::new()
            .prepare(&solid_bgr(160, 90, [255, 0, 0]))
            .unwrap();
        let center = (149 * 299 + 149) * 3;
        assert_eq!(&tensor.as_slice()[center..center + 3], &[0, 0, 255]);
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let rgb = bgr_to_rgb(&solid_bgr(2, 2, [1, 2, 3])).unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [3, 2, 1]);
    }

    #[test]
    fn test_from_rgb_round_trip_to_bgr() {
        let rgb = RgbImage::from_pixel(3, 2, Rgb([7, 8, 9]));
        let bgr = BgrImage::from_rgb(&rgb);
        assert_eq!(&bgr.as_raw()[..3], &[9, 8, 7]);
        assert_eq!(bgr_to_rgb(&bgr).unwrap(), rgb);
    }

    #[test]
    fn test_from_raw_rejects_bad_buffers() {
        assert!(matches!(
            BgrImage::from_raw(4, 4, vec![0; 10]),
            Err(AppError::InvalidInput(_))
        ));
        assert!(BgrImage::from_raw(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_pad_narrow_image_widens_canvas() {
        let img = RgbImage::from_pixel(100, 100, Rgb([1, 1, 1]));
        let padded = pad_to_aspect(&img, TARGET_ASPECT, Rgb(MEAN_PIXEL));
        assert_eq!(padded.dimensions(), (177, 100));
        // 77 columns of padding: 38 on the left, 39 on the right.
        assert_eq!(padded.get_pixel(37, 50).0, MEAN_PIXEL);
        assert_eq!(padded.get_pixel(38, 50).0, [1, 1, 1]);
        assert_eq!(padded.get_pixel(137, 50).0, [1, 1, 1]);
        assert_eq!(padded.get_pixel(138, 50).0, MEAN_PIXEL);
    }

    #[test]
    fn test_pad_wide_image_heightens_canvas() {
        let img = RgbImage::from_pixel(400, 100, Rgb([1, 1, 1]));
        let padded = pad_to_aspect(&img, TARGET_ASPECT, Rgb(MEAN_PIXEL));
        assert_eq!(padded.dimensions(), (400, 225));
        assert_eq!(padded.get_pixel(0, 0).0, MEAN_PIXEL);
        assert_eq!(padded.get_pixel(0, 62).0, [1, 1, 1]);
        assert_eq!(padded.get_pixel(0, 224).0, MEAN_PIXEL);
    }

    #[test]
    fn test_pad_is_idempotent() {
        for (w, h) in [(100, 100), (400, 100), (33, 71), (160, 90)] {
            let img = RgbImage::from_pixel(w, h, Rgb([5, 6, 7]));
            let once = pad_to_aspect(&img, TARGET_ASPECT, Rgb(MEAN_PIXEL));
            let twice = pad_to_aspect(&once, TARGET_ASPECT, Rgb(MEAN_PIXEL));
            assert_eq!(once, twice, "input {}x{}", w, h);
        }
    }

    #[test]
    fn test_pad_matching_aspect_is_noop() {
        let img = RgbImage::from_pixel(320, 180, Rgb([5, 6, 7]));
        assert_eq!(pad_to_aspect(&img, TARGET_ASPECT, Rgb(MEAN_PIXEL)), img);
    }

    #[test]
    fn test_resize_single_side_keeps_aspect() {
        let img = RgbImage::new(200, 100);
        assert_eq!(
            resize_to(&img, Some(100), None, FilterType::Triangle).dimensions(),
            (100, 50)
        );
        assert_eq!(
            resize_to(&img, None, Some(20), FilterType::Triangle).dimensions(),
            (40, 20)
        );
        assert_eq!(
            resize_to(&img, Some(30), Some(30), FilterType::Triangle).dimensions(),
            (30, 30)
        );
        assert_eq!(resize_to(&img, None, None, FilterType::Triangle), img);
    }

    #[test]
    fn test_center_crop_never_enlarges() {
        let img = RgbImage::from_pixel(50, 40, Rgb([9, 9, 9]));
        assert_eq!(center_crop_to(&img, 60, 10), img);
        assert_eq!(center_crop_to(&img, 10, 41), img);
    }

    #[test]
    fn test_center_crop_takes_middle() {
        let mut img = RgbImage::new(5, 5);
        img.put_pixel(2, 2, Rgb([200, 0, 0]));
        let cropped = center_crop_to(&img, 3, 3);
        assert_eq!(cropped.dimensions(), (3, 3));
        assert_eq!(cropped.get_pixel(1, 1).0, [200, 0, 0]);
    }
}
