// 该文件是 RT-DETR Live 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{path::Path, time::Duration};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{frame::Frame, labels::label_name, model::Detection, output::latency_label};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const OVERLAY_COLOR: [u8; 3] = [0, 255, 0];

/// 未指定字体时依次尝试的系统字体
const FALLBACK_FONTS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

// 按类别循环使用的边框颜色
const PALETTE: [[u8; 3]; 8] = [
  [255, 56, 56],
  [255, 157, 151],
  [255, 112, 31],
  [255, 178, 29],
  [72, 249, 10],
  [26, 147, 52],
  [0, 212, 187],
  [52, 69, 147],
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

pub fn class_color(class_id: u32) -> [u8; 3] {
  PALETTE[class_id as usize % PALETTE.len()]
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    let font = FALLBACK_FONTS
      .iter()
      .find_map(|path| load_font(Path::new(path)).ok());
    if font.is_none() {
      warn!("未找到可用字体，仅绘制检测框");
    }
    Self::with_font(font)
  }
}

fn load_font(path: &Path) -> Result<FontVec, DrawError> {
  let data = std::fs::read(path)?;
  FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))
}

impl Draw {
  pub fn with_font(font: Option<FontVec>) -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font,
    }
  }

  pub fn from_font_path(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    debug!("加载字体: {}", path.display());
    Ok(Self::with_font(Some(load_font(path)?)))
  }

  /// 读取 URL 中的 `font=<path>` 参数，未指定时使用系统字体
  pub fn from_url_query(url: &Url) -> Result<Self, DrawError> {
    match url.query_pairs().find(|(k, _)| k == "font") {
      Some((_, path)) => Self::from_font_path(path.as_ref()),
      None => Ok(Self::default()),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn draw_box_with_label(&self, image: &mut RgbImage, det: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (det.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (det.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (det.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (det.y2.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(class_color(det.class_id));
    for t in 0..BOX_THICKNESS {
      let bw = x_max - x_min - 2 * t;
      let bh = y_max - y_min - 2 * t;
      if bw <= 0 || bh <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(bw as u32 + 1, bh as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", label_name(det.class_id), det.score);
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签放在边框上方，放不下时贴住图像上沿
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, text_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255, 255]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }

  fn draw_overlay(&self, image: &mut RgbImage, elapsed: Duration) {
    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(OVERLAY_COLOR),
        10,
        10,
        PxScale::from(self.font_size),
        font,
        &latency_label(elapsed),
      );
    }
  }

  pub fn draw_detections_on_image(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    elapsed: Option<Duration>,
  ) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    for det in detections {
      self.draw_box_with_label(image, det);
    }
    if let Some(elapsed) = elapsed {
      self.draw_overlay(image, elapsed);
    }
  }

  /// 生成带标注的 RGB 图像，原帧不变
  pub fn annotate(&self, frame: &Frame, detections: &[Detection], elapsed: Option<Duration>) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, detections, elapsed);
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
    Detection {
      class_id: 0,
      score: 0.9,
      x1,
      y1,
      x2,
      y2,
    }
  }

  #[test]
  fn outlines_box_in_class_color() {
    let draw = Draw::with_font(None);
    let frame = Frame::filled(64, 48, [0, 0, 0]).unwrap();
    let image = draw.annotate(&frame, &[det(10.0, 10.0, 30.0, 20.0)], None);

    let color = Rgb(class_color(0));
    assert_eq!(*image.get_pixel(10, 15), color);
    assert_eq!(*image.get_pixel(30, 15), color);
    assert_eq!(*image.get_pixel(20, 10), color);
    assert_eq!(*image.get_pixel(20, 15), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_and_offscreen_boxes_are_skipped() {
    let draw = Draw::with_font(None);
    let frame = Frame::filled(16, 16, [0, 0, 0]).unwrap();
    let image = draw.annotate(
      &frame,
      &[det(5.0, 5.0, 5.0, 9.0), det(100.0, 100.0, 120.0, 120.0)],
      Some(Duration::from_millis(3)),
    );
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn empty_image_is_left_untouched() {
    let draw = Draw::with_font(None);
    let mut image = RgbImage::new(0, 0);
    draw.draw_detections_on_image(
      &mut image,
      &[det(0.0, 0.0, 10.0, 10.0)],
      Some(Duration::from_millis(1)),
    );
    assert_eq!(image.dimensions(), (0, 0));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::from_font_path("/nonexistent/font.ttf"),
      Err(DrawError::FontIo(_))
    ));
  }
}
