// 该文件是 RT-DETR Live 项目的一部分。
// src/model/postprocess.rs - RT-DETR 检测头后处理
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

//! 将 RT-DETR 的每个 query 输出解码为原始帧坐标下的检测框。
//!
//! 每个 query 行为 `[cx, cy, w, h, logit_0, .., logit_{C-1}]`。
//! 各类别独立做 sigmoid，同一 query 可以输出多个类别。
//! 这里不做 NMS：模型保证 query 之间互不重复。换用会产生重叠候选框的检测头时，
//! 需要另写一个 [`Decode`] 实现并在其中加入抑制步骤。

use thiserror::Error;
use tracing::debug;

use crate::{
  letterbox::LetterboxTransform,
  model::{Detection, RawDetectionTensor},
};

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("输出张量形状不匹配: 每行期望 {expected} 个值 (4 + {num_classes} 类), 实际 {actual}")]
  ShapeMismatch {
    expected: usize,
    actual: usize,
    num_classes: usize,
  },
  #[error("置信度阈值必须位于 [0, 1], 实际为 {0}")]
  InvalidThreshold(f32),
  #[error("类别数必须大于 0")]
  NoClasses,
  #[error("输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
}

/// 回归值的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoxUnits {
  /// `input_w` / `input_h` 的比例，位于 [0, 1]
  #[default]
  Normalized,
  /// 已经是输入张量像素
  InputPixels,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostprocessOptions {
  /// 作用于 sigmoid 之后的分数；0.5 对应 logit 0
  pub score_thresh: f32,
  pub num_classes: usize,
  pub box_units: BoxUnits,
}

impl Default for PostprocessOptions {
  fn default() -> Self {
    Self {
      score_thresh: 0.5,
      num_classes: 80,
      box_units: BoxUnits::Normalized,
    }
  }
}

impl PostprocessOptions {
  pub fn with_score_thresh(mut self, score_thresh: f32) -> Self {
    self.score_thresh = score_thresh;
    self
  }

  pub fn with_num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  pub fn with_box_units(mut self, box_units: BoxUnits) -> Self {
    self.box_units = box_units;
    self
  }

  pub fn row_len(&self) -> usize {
    4 + self.num_classes
  }

  pub fn validate(&self) -> Result<(), DecodeError> {
    if !(0.0..=1.0).contains(&self.score_thresh) {
      return Err(DecodeError::InvalidThreshold(self.score_thresh));
    }
    if self.num_classes == 0 {
      return Err(DecodeError::NoClasses);
    }
    Ok(())
  }
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// 解码 RT-DETR 原始输出
///
/// 出错时不返回任何部分结果。
pub fn postprocess_rtdetr(
  raw: &RawDetectionTensor,
  input_w: u32,
  input_h: u32,
  lb: &LetterboxTransform,
  orig_w: u32,
  orig_h: u32,
  opts: &PostprocessOptions,
) -> Result<Vec<Detection>, DecodeError> {
  opts.validate()?;
  if input_w == 0 || input_h == 0 {
    return Err(DecodeError::InvalidInputSize(input_w, input_h));
  }

  let expected = opts.row_len();
  if raw.num_queries() > 0 && raw.row_len() != expected {
    return Err(DecodeError::ShapeMismatch {
      expected,
      actual: raw.row_len(),
      num_classes: opts.num_classes,
    });
  }

  let (unit_w, unit_h) = match opts.box_units {
    BoxUnits::Normalized => (input_w as f32, input_h as f32),
    BoxUnits::InputPixels => (1.0, 1.0),
  };
  // [0, orig) 的闭区间上界
  let max_x = orig_w.saturating_sub(1) as f32;
  let max_y = orig_h.saturating_sub(1) as f32;

  let mut detections = Vec::new();

  for row in raw.rows() {
    // 框坐标含 NaN/Inf 的 query 整行丢弃
    if !row[..4].iter().all(|v| v.is_finite()) {
      continue;
    }
    let cx = row[0] * unit_w;
    let cy = row[1] * unit_h;
    let w = row[2] * unit_w;
    let h = row[3] * unit_h;

    let (ix1, iy1) = (cx - w / 2.0, cy - h / 2.0);
    let (ix2, iy2) = (cx + w / 2.0, cy + h / 2.0);

    let mut mapped = None;

    for (class_id, &logit) in row[4..].iter().enumerate() {
      let score = sigmoid(logit);
      if score.is_nan() || score < opts.score_thresh {
        continue;
      }

      let (x1, y1, x2, y2) = *mapped.get_or_insert_with(|| {
        let (ox1, oy1) = lb.to_original_space(ix1, iy1);
        let (ox2, oy2) = lb.to_original_space(ix2, iy2);
        (
          ox1.min(ox2).clamp(0.0, max_x),
          oy1.min(oy2).clamp(0.0, max_y),
          ox1.max(ox2).clamp(0.0, max_x),
          oy1.max(oy2).clamp(0.0, max_y),
        )
      });

      detections.push(Detection {
        class_id: class_id as u32,
        score,
        x1,
        y1,
        x2,
        y2,
      });
    }
  }

  debug!(
    "解码 {} 个 query, 得到 {} 个检测结果",
    raw.num_queries(),
    detections.len()
  );

  Ok(detections)
}

/// 检测头解码接口，流水线只依赖这一层
pub trait Decode: Send + Sync {
  fn decode(
    &self,
    raw: &RawDetectionTensor,
    input_size: (u32, u32),
    lb: &LetterboxTransform,
    orig_size: (u32, u32),
  ) -> Result<Vec<Detection>, DecodeError>;
}

/// 无 NMS 的 RT-DETR 解码器
#[derive(Debug, Clone, Default)]
pub struct RtDetrDecoder {
  options: PostprocessOptions,
}

impl RtDetrDecoder {
  pub fn new(options: PostprocessOptions) -> Result<Self, DecodeError> {
    options.validate()?;
    Ok(Self { options })
  }

  pub fn options(&self) -> &PostprocessOptions {
    &self.options
  }
}

impl Decode for RtDetrDecoder {
  fn decode(
    &self,
    raw: &RawDetectionTensor,
    (input_w, input_h): (u32, u32),
    lb: &LetterboxTransform,
    (orig_w, orig_h): (u32, u32),
  ) -> Result<Vec<Detection>, DecodeError> {
    postprocess_rtdetr(raw, input_w, input_h, lb, orig_w, orig_h, &self.options)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn identity_lb(w: u32, h: u32) -> LetterboxTransform {
    LetterboxTransform::new(1.0, 0.0, 0.0, w, h)
  }

  fn opts(score_thresh: f32, num_classes: usize) -> PostprocessOptions {
    PostprocessOptions::default()
      .with_score_thresh(score_thresh)
      .with_num_classes(num_classes)
  }

  #[test]
  fn sigmoid_of_zero_is_half() {
    assert_eq!(sigmoid(0.0), 0.5);
    assert!((sigmoid(2.0) - 0.880_797).abs() < 1e-5);
  }

  #[test]
  fn empty_tensor_yields_nothing() {
    let raw = RawDetectionTensor::new(Vec::new(), 0, 6).unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.5, 2))
      .unwrap();
    assert!(dets.is_empty());
  }

  #[test]
  fn row_below_threshold_contributes_nothing() {
    let raw = RawDetectionTensor::from_rows(&[vec![0.5, 0.5, 0.1, 0.1, -1.0, 0.0]]).unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.6, 2))
      .unwrap();
    assert!(dets.is_empty());
  }

  #[test]
  fn threshold_is_inclusive() {
    // sigmoid(0) == 0.5 exactly
    let raw = RawDetectionTensor::from_rows(&[vec![0.5, 0.5, 0.1, 0.1, 0.0]]).unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.5, 1))
      .unwrap();
    assert_eq!(dets.len(), 1);
  }

  #[test]
  fn multi_label_query_emits_each_class() {
    let raw = RawDetectionTensor::from_rows(&[vec![0.5, 0.5, 0.2, 0.2, 2.0, 2.0]]).unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.6, 2))
      .unwrap();

    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].class_id, 0);
    assert_eq!(dets[1].class_id, 1);
    assert!((dets[0].score - 0.8808).abs() < 1e-3);
    assert_eq!(
      (dets[0].x1, dets[0].y1, dets[0].x2, dets[0].y2),
      (dets[1].x1, dets[1].y1, dets[1].x2, dets[1].y2)
    );
  }

  #[test]
  fn overlapping_queries_are_not_suppressed() {
    let raw = RawDetectionTensor::from_rows(&[
      vec![0.5, 0.5, 0.3, 0.3, 3.0, -5.0],
      vec![0.5, 0.5, 0.3, 0.3, -5.0, 3.0],
    ])
    .unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.5, 2))
      .unwrap();

    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].class_id, 0);
    assert_eq!(dets[1].class_id, 1);
    assert_eq!(dets[0].x1, dets[1].x1);
    assert_eq!(dets[0].y2, dets[1].y2);
  }

  #[test]
  fn corners_are_clamped_into_frame() {
    // 输入空间 x 在 pad 区域内，映射回原图为负
    let lb = LetterboxTransform::new(0.5, 100.0, 0.0, 1000, 1280);
    let raw = RawDetectionTensor::from_rows(&[vec![0.0, 0.5, 0.2, 2.0, 4.0]]).unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &lb, 1000, 1280, &opts(0.5, 1)).unwrap();

    assert_eq!(dets.len(), 1);
    let d = &dets[0];
    assert_eq!(d.x1, 0.0);
    assert_eq!(d.x2, 0.0);
    assert_eq!(d.y1, 0.0);
    assert_eq!(d.y2, 1279.0);
    assert!(d.x1 <= d.x2 && d.y1 <= d.y2);
  }

  #[test]
  fn nan_logit_never_passes_threshold() {
    let raw = RawDetectionTensor::from_rows(&[vec![0.5, 0.5, 0.2, 0.2, f32::NAN]]).unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.9, 1))
      .unwrap();
    assert!(dets.is_empty());
  }

  #[test]
  fn non_finite_box_drops_the_query() {
    let raw = RawDetectionTensor::from_rows(&[
      vec![f32::NAN, 0.5, 0.2, 0.2, 3.0],
      vec![0.5, 0.5, f32::INFINITY, 0.2, 3.0],
      vec![0.5, 0.5, 0.2, 0.2, 3.0],
    ])
    .unwrap();
    let dets = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.5, 1))
      .unwrap();
    assert_eq!(dets.len(), 1);
    assert!([dets[0].x1, dets[0].y1, dets[0].x2, dets[0].y2].iter().all(|v| v.is_finite()));
    assert_eq!((dets[0].x1, dets[0].x2), (256.0, 384.0));
  }

  #[test]
  fn short_rows_are_a_configuration_error() {
    let raw = RawDetectionTensor::from_rows(&[vec![0.5, 0.5, 0.2, 0.2, 2.0, 2.0]]).unwrap();
    let err = postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &opts(0.5, 3))
      .unwrap_err();
    assert_eq!(
      err,
      DecodeError::ShapeMismatch {
        expected: 7,
        actual: 6,
        num_classes: 3
      }
    );
  }

  #[test]
  fn invalid_options_are_rejected() {
    assert_eq!(
      RtDetrDecoder::new(opts(1.5, 80)).unwrap_err(),
      DecodeError::InvalidThreshold(1.5)
    );
    assert_eq!(
      RtDetrDecoder::new(opts(0.5, 0)).unwrap_err(),
      DecodeError::NoClasses
    );
  }

  #[test]
  fn pixel_units_skip_scaling() {
    let raw = RawDetectionTensor::from_rows(&[vec![320.0, 320.0, 128.0, 128.0, 3.0]]).unwrap();
    let options = opts(0.5, 1).with_box_units(BoxUnits::InputPixels);
    let dets =
      postprocess_rtdetr(&raw, 640, 640, &identity_lb(640, 640), 640, 640, &options).unwrap();
    assert_eq!((dets[0].x1, dets[0].y1), (256.0, 256.0));
    assert_eq!((dets[0].x2, dets[0].y2), (384.0, 384.0));
  }

  #[test]
  fn decoder_trait_matches_free_function() {
    let raw = RawDetectionTensor::from_rows(&[vec![0.25, 0.75, 0.1, 0.1, 1.0, 2.0]]).unwrap();
    let lb = LetterboxTransform::fit(1280, 720, 640, 640);
    let decoder = RtDetrDecoder::new(opts(0.6, 2)).unwrap();

    let via_trait = decoder.decode(&raw, (640, 640), &lb, (1280, 720)).unwrap();
    let direct = postprocess_rtdetr(&raw, 640, 640, &lb, 1280, 720, decoder.options()).unwrap();
    assert_eq!(via_trait, direct);
  }

  fn raw_rows() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(
      (0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, 0.0f32..1.0, -6.0f32..6.0, -6.0f32..6.0, -6.0f32..6.0)
        .prop_map(|(cx, cy, w, h, a, b, c)| vec![cx, cy, w, h, a, b, c]),
      0..32,
    )
  }

  proptest! {
    #[test]
    fn raising_threshold_never_adds_detections(
      rows in raw_rows(),
      lo in 0.0f32..1.0,
      delta in 0.0f32..1.0,
    ) {
      let hi = (lo + delta).min(1.0);
      let raw = RawDetectionTensor::new(rows.concat(), rows.len(), 7).unwrap();
      let lb = LetterboxTransform::fit(1920, 1080, 640, 640);

      let low = postprocess_rtdetr(&raw, 640, 640, &lb, 1920, 1080, &opts(lo, 3)).unwrap();
      let high = postprocess_rtdetr(&raw, 640, 640, &lb, 1920, 1080, &opts(hi, 3)).unwrap();

      prop_assert!(high.len() <= low.len());
      for det in &high {
        prop_assert!(low.contains(det));
      }
    }

    #[test]
    fn emitted_boxes_respect_invariants(rows in raw_rows(), thresh in 0.0f32..1.0) {
      let raw = RawDetectionTensor::new(rows.concat(), rows.len(), 7).unwrap();
      let lb = LetterboxTransform::fit(1920, 1080, 640, 640);
      let dets = postprocess_rtdetr(&raw, 640, 640, &lb, 1920, 1080, &opts(thresh, 3)).unwrap();

      for d in dets {
        prop_assert!(d.score >= thresh);
        prop_assert!(d.x1 <= d.x2 && d.y1 <= d.y2);
        prop_assert!(d.x1 >= 0.0 && d.x2 < 1920.0);
        prop_assert!(d.y1 >= 0.0 && d.y2 < 1080.0);
      }
    }
  }
}
