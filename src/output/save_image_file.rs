// 该文件是 RT-DETR Live 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::{path::PathBuf, time::Duration};

use image::RgbImage;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::Detection,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  url_path,
};

/// 每帧覆盖写同一个文件，留下最新一帧的标注结果
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制初始化失败: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(url_path(uri)),
      draw: Draw::from_url_query(uri)?,
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>, draw: Draw) -> Self {
    Self {
      path: path.into(),
      draw,
    }
  }

  fn save_image(&self, image: RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    debug!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    elapsed: Duration,
  ) -> Result<(), Self::Error> {
    let image = self.draw.annotate(frame, detections, Some(elapsed));
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_annotated_frame_to_nested_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/nested/result.png");
    let mut output = SaveImageFileOutput::new(&path, Draw::with_font(None));

    let frame = Frame::filled(32, 24, [10, 20, 30]).unwrap();
    let det = Detection {
      class_id: 2,
      score: 0.8,
      x1: 4.0,
      y1: 4.0,
      x2: 20.0,
      y2: 16.0,
    };
    output
      .render_result(&frame, &[det], Duration::from_millis(5))
      .unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (32, 24));
    assert_eq!(saved.get_pixel(0, 0).0, [30, 20, 10]);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("record:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
