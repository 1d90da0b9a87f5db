// 该文件是 RT-DETR Live 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

use crate::{frame::Frame, letterbox::LetterboxTransform};

/// 推理后端：输入一帧，输出原始张量及其 letterbox 信息
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型固定输入尺寸 `(input_w, input_h)`
  fn input_size(&self) -> (u32, u32);

  fn infer(&self, frame: &Frame) -> Result<InferOutput, Self::Error>;
}

/// 一次推理的结果
#[derive(Debug, Clone)]
pub struct InferOutput {
  pub outputs: RawDetectionTensor,
  pub lb: LetterboxTransform,
  pub orig_w: u32,
  pub orig_h: u32,
}

/// 最终检测结果，坐标位于原始帧像素空间
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_id: u32,
  pub score: f32,
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl Detection {
  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum TensorShapeError {
  #[error("不支持的张量维度: {0:?}")]
  UnsupportedRank(Vec<usize>),
  #[error("批大小必须为 1, 实际为 {0}")]
  BatchSize(usize),
  #[error("数据长度 {actual} 与形状 {shape:?} 不符")]
  LengthMismatch { shape: Vec<usize>, actual: usize },
}

/// 检测头原始输出：N 行，每行 `4 + C` 个值
#[derive(Debug, Clone)]
pub struct RawDetectionTensor {
  data: Box<[f32]>,
  num_queries: usize,
  row_len: usize,
}

impl RawDetectionTensor {
  pub fn new(data: Vec<f32>, num_queries: usize, row_len: usize) -> Result<Self, TensorShapeError> {
    if data.len() != num_queries * row_len {
      return Err(TensorShapeError::LengthMismatch {
        shape: vec![num_queries, row_len],
        actual: data.len(),
      });
    }
    Ok(Self {
      data: data.into_boxed_slice(),
      num_queries,
      row_len,
    })
  }

  /// 接受 `[N, D]` 或 `[1, N, D]` 形状
  pub fn from_shape(data: Vec<f32>, shape: &[usize]) -> Result<Self, TensorShapeError> {
    match *shape {
      [n, d] => Self::new(data, n, d),
      [1, n, d] => Self::new(data, n, d),
      [b, _, _] => Err(TensorShapeError::BatchSize(b)),
      _ => Err(TensorShapeError::UnsupportedRank(shape.to_vec())),
    }
  }

  pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, TensorShapeError> {
    let row_len = rows.first().map(Vec::len).unwrap_or(0);
    let data = rows.iter().flatten().copied().collect::<Vec<f32>>();
    Self::new(data, rows.len(), row_len)
  }

  pub fn num_queries(&self) -> usize {
    self.num_queries
  }

  pub fn row_len(&self) -> usize {
    self.row_len
  }

  pub fn row(&self, query: usize) -> Option<&[f32]> {
    if query >= self.num_queries {
      return None;
    }
    let start = query * self.row_len;
    self.data.get(start..start + self.row_len)
  }

  pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
    (0..self.num_queries).filter_map(move |q| self.row(q))
  }
}

mod postprocess;
pub use self::postprocess::{
  BoxUnits, Decode, DecodeError, PostprocessOptions, RtDetrDecoder, postprocess_rtdetr, sigmoid,
};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_batched_shape() {
    let t = RawDetectionTensor::from_shape(vec![0.0; 2 * 6], &[1, 2, 6]).unwrap();
    assert_eq!(t.num_queries(), 2);
    assert_eq!(t.row_len(), 6);
    assert_eq!(t.rows().count(), 2);
  }

  #[test]
  fn rejects_bad_shapes() {
    assert_eq!(
      RawDetectionTensor::from_shape(vec![0.0; 12], &[2, 2, 3]).unwrap_err(),
      TensorShapeError::BatchSize(2)
    );
    assert!(matches!(
      RawDetectionTensor::from_shape(vec![0.0; 5], &[1, 6]),
      Err(TensorShapeError::LengthMismatch { .. })
    ));
    assert!(matches!(
      RawDetectionTensor::from_shape(vec![0.0; 5], &[5]),
      Err(TensorShapeError::UnsupportedRank(_))
    ));
  }

  #[test]
  fn empty_tensor_has_no_rows() {
    let t = RawDetectionTensor::from_rows(&[]).unwrap();
    assert_eq!(t.num_queries(), 0);
    assert!(t.row(0).is_none());
  }
}
