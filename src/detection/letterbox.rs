// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/agriscan

//! Aspect-preserving resize into the model's square input, and its inverse

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

/// Scale and padding applied to fit a source image into the model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub ratio: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub src_width: u32,
    pub src_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Letterbox {
    /// Single ratio = min(target_h / src_h, target_w / src_w), padding split
    /// evenly with any odd pixel going to the bottom/right
    pub fn compute(src_width: u32, src_height: u32, target_width: u32, target_height: u32) -> Self {
        let src_w = src_width.max(1);
        let src_h = src_height.max(1);
        let ratio = (target_height as f32 / src_h as f32).min(target_width as f32 / src_w as f32);

        let resized_width = ((src_w as f32 * ratio).round() as u32).clamp(1, target_width);
        let resized_height = ((src_h as f32 * ratio).round() as u32).clamp(1, target_height);

        Self {
            ratio,
            pad_left: (target_width - resized_width) / 2,
            pad_top: (target_height - resized_height) / 2,
            resized_width,
            resized_height,
            src_width: src_w,
            src_height: src_h,
            target_width,
            target_height,
        }
    }

    /// Resize and pad `image` with a constant grey
    pub fn apply(&self, image: &DynamicImage, pad_value: u8) -> RgbImage {
        let rgb = if image.width() == self.resized_width && image.height() == self.resized_height {
            image.to_rgb8()
        } else {
            image
                .resize_exact(self.resized_width, self.resized_height, FilterType::Triangle)
                .to_rgb8()
        };

        let mut canvas = RgbImage::from_pixel(
            self.target_width,
            self.target_height,
            Rgb([pad_value, pad_value, pad_value]),
        );
        imageops::overlay(&mut canvas, &rgb, self.pad_left as i64, self.pad_top as i64);
        canvas
    }

    /// Original-space box to padded/resized space
    pub fn forward_box(&self, b: [f32; 4]) -> [f32; 4] {
        let (px, py) = (self.pad_left as f32, self.pad_top as f32);
        [
            b[0] * self.ratio + px,
            b[1] * self.ratio + py,
            b[2] * self.ratio + px,
            b[3] * self.ratio + py,
        ]
    }

    /// Padded/resized-space box back to original space, clipped to the image
    pub fn inverse_box(&self, b: [f32; 4]) -> [f32; 4] {
        let (px, py) = (self.pad_left as f32, self.pad_top as f32);
        let (w, h) = (self.src_width as f32, self.src_height as f32);
        [
            ((b[0] - px) / self.ratio).clamp(0.0, w),
            ((b[1] - py) / self.ratio).clamp(0.0, h),
            ((b[2] - px) / self.ratio).clamp(0.0, w),
            ((b[3] - py) / self.ratio).clamp(0.0, h),
        ]
    }
}

/// HWC u8 RGB to NCHW f32 in [0, 1]
pub fn to_nchw_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::zeros((1, 3, h, w));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}
