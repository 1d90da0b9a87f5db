// 该文件是 RT-DETR Live 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸为零: {0}x{1}")]
  EmptyFrame(u32, u32),
}

/// 原始分辨率的 BGR 帧，HWC 排布
#[derive(Debug, Clone)]
pub struct Frame {
  width: u32,
  height: u32,
  index: u64,
  bgr: Box<[u8]>,
}

impl Frame {
  pub fn from_bgr(width: u32, height: u32, bgr: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame(width, height));
    }
    let expected = BGR_CHANNELS * width as usize * height as usize;
    if bgr.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: bgr.len(),
      });
    }

    Ok(Self {
      width,
      height,
      index: 0,
      bgr: bgr.into_boxed_slice(),
    })
  }

  /// 纯色帧，主要用于测试和占位
  pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Result<Self, FrameError> {
    let data = bgr
      .iter()
      .copied()
      .cycle()
      .take(BGR_CHANNELS * width as usize * height as usize)
      .collect::<Vec<u8>>();
    Self::from_bgr(width, height, data)
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn as_bgr(&self) -> &[u8] {
    &self.bgr
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width as usize;
    let data = &self.bgr;

    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width + x as usize) * BGR_CHANNELS;
      Rgb([data[idx + 2], data[idx + 1], data[idx]])
    })
  }

  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut data = vec![0u8; BGR_CHANNELS * width as usize * height as usize];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = (y as usize * width as usize + x as usize) * BGR_CHANNELS;
      data[idx] = pixel[2];
      data[idx + 1] = pixel[1];
      data[idx + 2] = pixel[0];
    }

    Self {
      width,
      height,
      index: 0,
      bgr: data.into_boxed_slice(),
    }
  }
}

impl AsRef<[u8]> for Frame {
  fn as_ref(&self) -> &[u8] {
    &self.bgr
  }
}
