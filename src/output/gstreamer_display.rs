// 该文件是 RT-DETR Live 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口显示输出
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

//! # GStreamer 显示输出
//!
//! `gstdisplay://?sink=autovideosink&fps=30&font=/path/to/font.ttf`
//!
//! 管道为 `appsrc ! videoconvert ! <sink>`，caps 取自第一帧的尺寸。
//! 推送 RGBx 像素，每行步长为 `4 * width`，无需按 GStreamer 的 4 字节行对齐补齐。
//! 显示窗口被关闭时 sink 会在总线上报告 EOS 或错误，此时 `stop_requested` 返回 true。

use std::{collections::HashMap, time::Duration};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::Detection,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

const DEFAULT_SINK: &str = "autovideosink";
const DEFAULT_FPS: i32 = 30;

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
  #[error("绘制初始化失败: {0}")]
  DrawError(#[from] DrawError),
}

pub struct GStreamerDisplayOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  fps: i32,
  caps_size: Option<(u32, u32)>,
  frame_count: u64,
  stop: bool,
  closed: bool,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "gstdisplay";
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }

    gst::init()?;

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (k.into_owned(), v.into_owned()))
      .collect();
    let fps: i32 = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_FPS);
    let sink = query.get("sink").map(String::as_str).unwrap_or(DEFAULT_SINK);

    let pipeline_desc = display_pipeline(sink);
    info!("创建显示管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    Ok(GStreamerDisplayOutput {
      pipeline,
      appsrc,
      draw: Draw::from_url_query(url)?,
      fps,
      caps_size: None,
      frame_count: 0,
      stop: false,
      closed: false,
    })
  }
}

/// 每个像素补一个填充字节
fn to_rgbx(image: &RgbImage) -> Vec<u8> {
  let mut data = Vec::with_capacity(image.width() as usize * image.height() as usize * 4);
  for pixel in image.pixels() {
    data.extend_from_slice(&[pixel[0], pixel[1], pixel[2], 0]);
  }
  data
}

fn display_pipeline(sink: &str) -> String {
  format!(
    "appsrc name=src is-live=true do-timestamp=false ! videoconvert ! {} sync=false",
    sink
  )
}

impl GStreamerDisplayOutput {
  /// 第一帧或尺寸变化时重新设置 caps
  fn ensure_caps(&mut self, width: u32, height: u32) -> Result<(), GStreamerDisplayOutputError> {
    if self.caps_size == Some((width, height)) {
      return Ok(());
    }

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGBx")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(self.fps, 1))
      .build();
    self.appsrc.set_caps(Some(&caps));

    if self.caps_size.is_none() {
      self.pipeline.set_state(gst::State::Playing)?;
      info!("显示输出启动: {}x{} @ {} fps", width, height, self.fps);
    } else {
      info!("显示尺寸变化: {}x{}", width, height);
    }
    self.caps_size = Some((width, height));
    Ok(())
  }

  fn push_frame(&mut self, data: Vec<u8>) -> Result<(), GStreamerDisplayOutputError> {
    let frame_duration = 1_000_000_000 / self.fps as u64;
    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerDisplayOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_duration));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayOutputError::PipelineError(format!("推送缓冲区失败: {:?}", e))
    })?;
    Ok(())
  }

  fn poll_bus(&mut self) {
    let Some(bus) = self.pipeline.bus() else {
      return;
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Eos, gst::MessageType::Error]) {
      match msg.view() {
        gst::MessageView::Eos(..) => {
          info!("显示窗口已关闭");
          self.stop = true;
        }
        gst::MessageView::Error(err) => {
          warn!(
            "显示管道错误 {:?}: {}",
            err.src().map(|s| s.path_string()),
            err.error()
          );
          self.stop = true;
        }
        _ => {}
      }
    }
  }
}

impl Render for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    elapsed: Duration,
  ) -> Result<(), Self::Error> {
    if self.closed {
      return Err(GStreamerDisplayOutputError::PipelineError("显示输出已关闭".to_string()));
    }
    self.ensure_caps(frame.width(), frame.height())?;
    let image = self.draw.annotate(frame, detections, Some(elapsed));
    self.push_frame(to_rgbx(&image))
  }

  fn stop_requested(&mut self) -> bool {
    if !self.stop && !self.closed {
      self.poll_bus();
    }
    self.stop
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;

    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止显示管道失败: {}", e);
    }
    info!("显示输出关闭，共显示 {} 帧", self.frame_count);
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    self.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pipeline_uses_requested_sink() {
    assert_eq!(
      display_pipeline("fakesink"),
      "appsrc name=src is-live=true do-timestamp=false ! videoconvert ! fakesink sync=false"
    );
  }

  #[test]
  fn odd_width_frame_is_padded_per_pixel() {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(0, 0, image::Rgb([1, 2, 3]));
    image.put_pixel(2, 1, image::Rgb([7, 8, 9]));

    let data = to_rgbx(&image);
    assert_eq!(data.len(), 3 * 2 * 4);
    // 每行 12 字节，4 字节对齐
    assert_eq!(&data[0..4], &[1, 2, 3, 0]);
    assert_eq!(&data[20..24], &[7, 8, 9, 0]);
  }
}
