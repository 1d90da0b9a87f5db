// 该文件是 RT-DETR Live 项目的一部分。
// src/bin/rtdetr_oneshot.rs - 单张图像推理
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

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;
use url::Url;

use rtdetr_live::{
  FromUrl,
  input::{ImageFileInput, VideoSource},
  model::{Decode, Model, OnnxModelBuilder, PostprocessOptions, RtDetrDecoder},
  output::{OutputWrapper, Render},
};

/// 对单张图像推理并输出检测结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///tmp/bus.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，例如 image:///tmp/result.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  #[arg(long, default_value_t = 0.6)]
  pub score_thresh: f32,
  #[arg(long, default_value_t = 80)]
  pub num_classes: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let decoder = RtDetrDecoder::new(
    PostprocessOptions::default()
      .with_score_thresh(args.score_thresh)
      .with_num_classes(args.num_classes),
  )?;
  let model = OnnxModelBuilder::from_url(&args.model)?.build()?;
  let mut output = OutputWrapper::from_url(&args.output)?;
  let mut input = ImageFileInput::open(&args.input)?;

  let frame = input.read()?.ok_or_else(|| anyhow!("没有输入帧"))?;
  input.close();
  info!("输入帧获取成功，开始推理...");

  let now = std::time::Instant::now();
  let result = model.infer(&frame)?;
  let detections = decoder.decode(
    &result.outputs,
    model.input_size(),
    &result.lb,
    (result.orig_w, result.orig_h),
  )?;
  let elapsed = now.elapsed();
  info!("推理完成，耗时: {:.2?}, {} 个目标", elapsed, detections.len());

  let rendered = output.render_result(&frame, &detections, elapsed);
  output.close();
  rendered?;

  println!("{}", serde_json::to_string_pretty(&detections)?);
  Ok(())
}
