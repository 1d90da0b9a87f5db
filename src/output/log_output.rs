// 该文件是 RT-DETR Live 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::time::Duration;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, frame::Frame, labels::label_name, model::Detection, output::Render,
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 只把检测结果写进日志，不做任何绘制
#[derive(Debug, Default)]
pub struct LogOutput {
  frames: u64,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogOutput::default())
  }
}

impl LogOutput {
  pub fn frames(&self) -> u64 {
    self.frames
  }
}

impl Render for LogOutput {
  type Error = LogOutputError;

  fn render_result(
    &mut self,
    frame: &Frame,
    detections: &[Detection],
    elapsed: Duration,
  ) -> Result<(), Self::Error> {
    self.frames += 1;
    info!(
      "第 {} 帧: {} 个目标, 推理+后处理 {:.1} ms",
      frame.index(),
      detections.len(),
      elapsed.as_secs_f64() * 1000.0
    );
    for det in detections {
      info!(
        "  {} {:.2} [{:.1}, {:.1}, {:.1}, {:.1}]",
        label_name(det.class_id),
        det.score,
        det.x1,
        det.y1,
        det.x2,
        det.y2
      );
    }
    Ok(())
  }

  fn close(&mut self) {
    info!("日志输出结束，共 {} 帧", self.frames);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_rendered_frames() {
    let mut output = LogOutput::from_url(&Url::parse("log://").unwrap()).unwrap();
    let frame = Frame::filled(4, 4, [0, 0, 0]).unwrap();
    output.render_result(&frame, &[], Duration::ZERO).unwrap();
    output.render_result(&frame, &[], Duration::ZERO).unwrap();
    assert_eq!(output.frames(), 2);
    assert!(!output.stop_requested());
  }
}
