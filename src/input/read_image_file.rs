// 该文件是 RT-DETR Live 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, input::VideoSource, url_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像作为视频源：读出一帧后即流结束
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_path(url);
    debug!("读取图像文件: {}", path);
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;

    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }
}

impl From<RgbImage> for ImageFileInput {
  fn from(image: RgbImage) -> Self {
    Self { image: Some(image) }
  }
}

impl VideoSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn open(url: &Url) -> Result<Self, Self::Error> {
    Self::from_url(url)
  }

  fn read(&mut self) -> Result<Option<Frame>, Self::Error> {
    Ok(self.image.take().map(|image| Frame::from_rgb_image(&image)))
  }

  fn close(&mut self) {
    self.image = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageBuffer, Rgb};

  #[test]
  fn yields_one_frame_then_end_of_stream() {
    let mut input = ImageFileInput::from(ImageBuffer::from_pixel(8, 4, Rgb([1u8, 2, 3])));
    let frame = input.read().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (8, 4));
    assert_eq!(&frame.as_bgr()[..3], &[3, 2, 1]);
    assert!(input.read().unwrap().is_none());
  }

  #[test]
  fn reads_image_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    ImageBuffer::from_pixel(5, 7, Rgb([9u8, 9, 9])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let mut input = ImageFileInput::open(&url).unwrap();
    let frame = input.read().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (5, 7));

    input.close();
    input.close();
    assert!(input.read().unwrap().is_none());
  }
}
