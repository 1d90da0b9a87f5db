// 该文件是 RT-DETR Live 项目的一部分。
// src/letterbox.rs - Letterbox 缩放与坐标变换
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 RT-DETR Live Developers

//! 原始帧像素坐标与固定尺寸输入张量坐标之间的仿射映射。
//!
//! `input = orig * scale + pad`，`orig = (input - pad) / scale`。

use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};

/// 填充色（YOLO/RT-DETR 系列的惯用灰色）
pub const LETTERBOX_PAD_COLOR: [u8; 3] = [114, 114, 114];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  /// 输入张量像素 / 原始像素
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub orig_w: u32,
  pub orig_h: u32,
}

impl LetterboxTransform {
  pub fn new(scale: f32, pad_x: f32, pad_y: f32, orig_w: u32, orig_h: u32) -> Self {
    debug_assert!(scale > 0.0, "letterbox scale must be positive, got {scale}");
    Self {
      scale,
      pad_x,
      pad_y,
      orig_w,
      orig_h,
    }
  }

  /// 保持宽高比地把 `orig_w x orig_h` 放入 `input_w x input_h`，居中填充
  ///
  /// 填充量取整数像素，与 [`letterbox_image`] 实际粘贴的位置一致。
  pub fn fit(orig_w: u32, orig_h: u32, input_w: u32, input_h: u32) -> Self {
    debug_assert!(orig_w > 0 && orig_h > 0, "empty source frame");
    debug_assert!(input_w > 0 && input_h > 0, "empty input tensor");
    let scale = (input_w as f32 / orig_w as f32).min(input_h as f32 / orig_h as f32);
    let (new_w, new_h) = Self::resized_dims(orig_w, orig_h, scale, input_w, input_h);
    let pad_x = (input_w.saturating_sub(new_w) / 2) as f32;
    let pad_y = (input_h.saturating_sub(new_h) / 2) as f32;
    Self::new(scale, pad_x, pad_y, orig_w, orig_h)
  }

  fn resized_dims(orig_w: u32, orig_h: u32, scale: f32, input_w: u32, input_h: u32) -> (u32, u32) {
    let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, input_w.max(1));
    let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, input_h.max(1));
    (new_w, new_h)
  }

  pub fn to_input_space(&self, orig_x: f32, orig_y: f32) -> (f32, f32) {
    (
      orig_x * self.scale + self.pad_x,
      orig_y * self.scale + self.pad_y,
    )
  }

  pub fn to_original_space(&self, input_x: f32, input_y: f32) -> (f32, f32) {
    (
      (input_x - self.pad_x) / self.scale,
      (input_y - self.pad_y) / self.scale,
    )
  }

  /// 原始帧四个角是否都落在输入张量范围内
  pub fn fits_within(&self, input_w: u32, input_h: u32) -> bool {
    let eps = 1e-3;
    let (x0, y0) = self.to_input_space(0.0, 0.0);
    let (x1, y1) = self.to_input_space(self.orig_w as f32, self.orig_h as f32);
    x0 >= -eps && y0 >= -eps && x1 <= input_w as f32 + eps && y1 <= input_h as f32 + eps
  }
}

/// 将图像 letterbox 到 `input_w x input_h`，返回填充后的图像和对应的变换
pub fn letterbox_image(image: &RgbImage, input_w: u32, input_h: u32) -> (RgbImage, LetterboxTransform) {
  let (orig_w, orig_h) = image.dimensions();
  let transform = LetterboxTransform::fit(orig_w, orig_h, input_w, input_h);
  let (new_w, new_h) =
    LetterboxTransform::resized_dims(orig_w, orig_h, transform.scale, input_w, input_h);

  let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
  let mut canvas: RgbImage = ImageBuffer::from_pixel(input_w, input_h, Rgb(LETTERBOX_PAD_COLOR));
  image::imageops::replace(
    &mut canvas,
    &resized,
    transform.pad_x as i64,
    transform.pad_y as i64,
  );

  (canvas, transform)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn fit_centers_landscape_frame() {
    let lb = LetterboxTransform::fit(1920, 1080, 640, 640);
    assert!((lb.scale - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 140.0);
    assert!(lb.fits_within(640, 640));
  }

  #[test]
  fn fit_centers_portrait_frame() {
    let lb = LetterboxTransform::fit(480, 640, 640, 640);
    assert_eq!(lb.scale, 1.0);
    assert_eq!(lb.pad_x, 80.0);
    assert_eq!(lb.pad_y, 0.0);
  }

  #[test]
  fn letterbox_image_pads_with_gray() {
    let image = ImageBuffer::from_pixel(200, 100, Rgb([255u8, 0, 0]));
    let (padded, lb) = letterbox_image(&image, 64, 64);
    assert_eq!(padded.dimensions(), (64, 64));
    assert_eq!(lb.pad_y, 16.0);
    assert_eq!(padded.get_pixel(32, 2).0, LETTERBOX_PAD_COLOR);
    let inner = padded.get_pixel(32, 32).0;
    assert!(inner[0] > 250 && inner[1] < 5 && inner[2] < 5);
  }

  #[test]
  fn odd_padding_matches_pasted_rows() {
    let image = ImageBuffer::from_pixel(640, 479, Rgb([0u8, 0, 255]));
    let (padded, lb) = letterbox_image(&image, 640, 640);
    assert_eq!(lb.scale, 1.0);
    assert_eq!(lb.pad_y, 80.0);

    assert_eq!(padded.get_pixel(320, 79).0, LETTERBOX_PAD_COLOR);
    assert_eq!(padded.get_pixel(320, 80).0, [0, 0, 255]);
    assert_eq!(padded.get_pixel(320, 558).0, [0, 0, 255]);
    assert_eq!(padded.get_pixel(320, 559).0, LETTERBOX_PAD_COLOR);

    // 第一行图像像素映射回原图第 0 行
    assert_eq!(lb.to_original_space(0.0, 80.0), (0.0, 0.0));
    assert_eq!(lb.to_original_space(0.0, 559.0).1, 479.0);
  }

  proptest! {
    #[test]
    fn pads_are_whole_pixels(
      orig_w in 1u32..4096,
      orig_h in 1u32..4096,
    ) {
      let lb = LetterboxTransform::fit(orig_w, orig_h, 640, 640);
      prop_assert_eq!(lb.pad_x.fract(), 0.0);
      prop_assert_eq!(lb.pad_y.fract(), 0.0);
      prop_assert!(lb.fits_within(640, 640));
    }

    #[test]
    fn original_input_round_trip(
      orig_w in 1u32..4096,
      orig_h in 1u32..4096,
      fx in 0.0f32..1.0,
      fy in 0.0f32..1.0,
    ) {
      let lb = LetterboxTransform::fit(orig_w, orig_h, 640, 640);
      let (x, y) = (fx * orig_w as f32, fy * orig_h as f32);
      let (ix, iy) = lb.to_input_space(x, y);
      let (ox, oy) = lb.to_original_space(ix, iy);
      let tol = 1e-3 * (orig_w.max(orig_h) as f32).max(1.0);
      prop_assert!((ox - x).abs() <= tol);
      prop_assert!((oy - y).abs() <= tol);
    }

    #[test]
    fn arbitrary_transform_round_trip(
      scale in 0.05f32..8.0,
      pad_x in 0.0f32..200.0,
      pad_y in 0.0f32..200.0,
      x in 0.0f32..2000.0,
      y in 0.0f32..2000.0,
    ) {
      let lb = LetterboxTransform::new(scale, pad_x, pad_y, 2000, 2000);
      let (ox, oy) = lb.to_original_space(lb.to_input_space(x, y).0, lb.to_input_space(x, y).1);
      prop_assert!((ox - x).abs() <= 1e-2);
      prop_assert!((oy - y).abs() <= 1e-2);
    }
  }
}
