// 该文件是 RT-DETR Live 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::{collections::HashMap, sync::Mutex};

use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  letterbox::{LetterboxTransform, letterbox_image},
  model::{InferOutput, Model, RawDetectionTensor, TensorShapeError},
  url_path,
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;
const ONNX_DEFAULT_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(String),
  #[error("模型没有输出")]
  NoOutput,
  #[error("输出张量形状错误: {0}")]
  OutputShape(#[from] TensorShapeError),
  #[error("输入张量构建失败: {0}")]
  InputShape(#[from] ndarray::ShapeError),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
  #[error("输入尺寸无效: {0}")]
  InvalidInputSize(u32),
}

fn ort_err(e: impl std::fmt::Display) -> OnnxModelError {
  OnnxModelError::Ort(e.to_string())
}

pub struct OnnxModelBuilder {
  model_path: String,
  input_size: u32,
  threads: usize,
  cuda: bool,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let model_path = url_path(url);
    if model_path.is_empty() || model_path == "/" {
      return Err(OnnxModelError::ModelPathError(url.to_string()));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let input_size = query
      .get("size")
      .and_then(|v| v.parse().ok())
      .unwrap_or(ONNX_DEFAULT_INPUT_SIZE);
    if input_size == 0 {
      return Err(OnnxModelError::InvalidInputSize(input_size));
    }

    Ok(OnnxModelBuilder {
      model_path,
      input_size,
      threads: query
        .get("threads")
        .and_then(|v| v.parse().ok())
        .unwrap_or(ONNX_DEFAULT_THREADS),
      cuda: query.get("cuda").map(|v| v == "true" || v == "1").unwrap_or(false),
    })
  }
}

impl OnnxModelBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      input_size: ONNX_DEFAULT_INPUT_SIZE,
      threads: ONNX_DEFAULT_THREADS,
      cuda: false,
    }
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  pub fn cuda(mut self, cuda: bool) -> Self {
    self.cuda = cuda;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    if self.input_size == 0 {
      return Err(OnnxModelError::InvalidInputSize(self.input_size));
    }
    info!("加载模型文件: {}", self.model_path);

    let builder = Session::builder()
      .map_err(ort_err)?
      .with_intra_threads(self.threads)
      .map_err(ort_err)?;

    #[cfg(feature = "cuda")]
    let builder = if self.cuda {
      use ort::execution_providers::CUDAExecutionProvider;
      info!("注册 CUDA 执行提供程序");
      builder
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .map_err(ort_err)?
    } else {
      builder
    };
    #[cfg(not(feature = "cuda"))]
    if self.cuda {
      warn!("未启用 cuda 特性，使用 CPU 推理");
    }

    let session = builder.commit_from_file(&self.model_path).map_err(ort_err)?;

    info!(
      "模型加载完成, 输入尺寸 {}x{}",
      self.input_size, self.input_size
    );

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_w: self.input_size,
      input_h: self.input_size,
    })
  }
}

pub struct OnnxModel {
  session: Mutex<Session>,
  input_w: u32,
  input_h: u32,
}

impl OnnxModel {
  /// letterbox 后转为 NCHW，取值范围 [0, 1]
  fn preprocess(&self, frame: &Frame) -> Result<(Array4<f32>, LetterboxTransform), OnnxModelError> {
    let (padded, lb) = letterbox_image(&frame.to_rgb_image(), self.input_w, self.input_h);
    let (w, h) = (self.input_w as usize, self.input_h as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in padded.enumerate_pixels() {
      let idx = y as usize * w + x as usize;
      for c in 0..3 {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }

    let tensor = Array4::from_shape_vec((1, 3, h, w), data)?;
    Ok((tensor, lb))
  }
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn input_size(&self) -> (u32, u32) {
    (self.input_w, self.input_h)
  }

  fn infer(&self, frame: &Frame) -> Result<InferOutput, Self::Error> {
    debug!("预处理第 {} 帧", frame.index());
    let (input, lb) = self.preprocess(frame)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxModelError::SessionPoisoned)?;

    debug!("执行模型推理");
    let input_ref = TensorRef::from_array_view(input.view()).map_err(ort_err)?;
    let outputs = session.run(ort::inputs![input_ref]).map_err(ort_err)?;

    if outputs.len() == 0 {
      return Err(OnnxModelError::NoOutput);
    }
    let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(ort_err)?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    debug!("模型输出形状: {:?}", dims);

    let raw = RawDetectionTensor::from_shape(data.to_vec(), &dims)?;

    Ok(InferOutput {
      outputs: raw,
      lb,
      orig_w: frame.width(),
      orig_h: frame.height(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_reads_query_parameters() {
    let url = Url::parse("onnx:///models/rtdetr-l.onnx?size=512&threads=2&cuda=1").unwrap();
    let builder = OnnxModelBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/rtdetr-l.onnx");
    assert_eq!(builder.input_size, 512);
    assert_eq!(builder.threads, 2);
    assert!(builder.cuda);
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("file:///models/rtdetr-l.onnx").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn zero_input_size_is_rejected() {
    let url = Url::parse("onnx:///m.onnx?size=0").unwrap();
    assert!(matches!(
      OnnxModelBuilder::from_url(&url),
      Err(OnnxModelError::InvalidInputSize(0))
    ));

    // 在加载模型文件之前就失败
    assert!(matches!(
      OnnxModelBuilder::new("/nonexistent/m.onnx").input_size(0).build(),
      Err(OnnxModelError::InvalidInputSize(0))
    ));
  }
}
