// 该文件是 RT-DETR Live 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 目录记录输出：`record:///<dir>?mode=draw|record&always`
//!
//! 每次运行在 `<dir>` 下新建一个以启动时间命名的子目录，写入：
//! - `frame_<index>.png`，`draw` 模式为标注后的图像，`record` 模式为原图；
//! - `detections.jsonl`，每帧一行检测记录。
//!
//! 默认只保存有检测结果的帧图像，带 `always` 参数时每帧都保存。

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  labels::label_name,
  model::Detection,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  url_path,
};

const RECORD_FILE_NAME: &str = "detections.jsonl";

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的记录模式: {0}")]
  UnknownMode(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("绘制初始化失败: {0}")]
  DrawError(#[from] DrawError),
}

pub enum RecordMode {
  /// 保存标注后的图像
  Draw(Box<Draw>),
  /// 保存原图
  Record,
}

#[derive(Serialize)]
struct LabeledDetection<'a> {
  label: String,
  #[serde(flatten)]
  detection: &'a Detection,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  frame: u64,
  timestamp: String,
  elapsed_ms: f64,
  detections: Vec<LabeledDetection<'a>>,
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  mode: RecordMode,
  always: bool,
  records: Option<BufWriter<File>>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "record";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mode = match uri.query_pairs().find(|(k, _)| k == "mode") {
      None => RecordMode::Draw(Box::new(Draw::from_url_query(uri)?)),
      Some((_, v)) if v == "draw" => RecordMode::Draw(Box::new(Draw::from_url_query(uri)?)),
      Some((_, v)) if v == "record" => RecordMode::Record,
      Some((_, v)) => return Err(DirectoryRecordOutputError::UnknownMode(v.into_owned())),
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Self::create(url_path(uri), mode, always)
  }
}

impl DirectoryRecordOutput {
  /// 在 `root` 下创建本次运行的时间戳子目录
  pub fn create(
    root: impl AsRef<Path>,
    mode: RecordMode,
    always: bool,
  ) -> Result<Self, DirectoryRecordOutputError> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut directory = root.as_ref().join(&stamp);
    let mut suffix = 1;
    while directory.exists() {
      directory = root.as_ref().join(format!("{}-{}", stamp, suffix));
      suffix += 1;
    }
    std::fs::create_dir_all(&directory)?;

    let records = BufWriter::new(File::create(directory.join(RECORD_FILE_NAME))?);
    info!("检测记录目录: {}", directory.display());

    Ok(Self {
      directory,
      mode,
      always,
      records: Some(records),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_path(&self, frame: &Frame) -> PathBuf {
    self.directory.join(format!("frame_{:06}.png", frame.index()))
  }

  fn write_record(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    elapsed: Duration,
  ) -> Result<(), DirectoryRecordOutputError> {
    let Some(records) = self.records.as_mut() else {
      return Ok(());
    };
    let record = FrameRecord {
      frame: frame.index(),
      timestamp: Local::now().to_rfc3339(),
      elapsed_ms: elapsed.as_secs_f64() * 1000.0,
      detections: detections
        .iter()
        .map(|detection| LabeledDetection {
          label: label_name(detection.class_id).into_owned(),
          detection,
        })
        .collect(),
    };
    serde_json::to_writer(&mut *records, &record)?;
    records.write_all(b"\n")?;
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    elapsed: Duration,
  ) -> Result<(), Self::Error> {
    self.write_record(frame, detections, elapsed)?;

    if self.always || !detections.is_empty() {
      let path = self.frame_path(frame);
      let image = match &self.mode {
        RecordMode::Draw(draw) => draw.annotate(frame, detections, Some(elapsed)),
        RecordMode::Record => frame.to_rgb_image(),
      };
      image.save(path)?;
    }
    Ok(())
  }

  fn close(&mut self) {
    if let Some(mut records) = self.records.take()
      && let Err(e) = records.flush()
    {
      warn!("写入检测记录失败: {}", e);
    }
  }
}

impl Drop for DirectoryRecordOutput {
  fn drop(&mut self) {
    self.close();
  }
}
