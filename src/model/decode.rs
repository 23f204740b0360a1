// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/model/decode.rs - 检测结果解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
  label::LabelTable,
  model::{BoundingBox, Detection, RAW_RECORD_LEN, RawOutput},
};

/// 置信度必须严格大于该值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  labels: Arc<LabelTable>,
  threshold: f32,
}

impl DetectionDecoder {
  pub fn new(labels: Arc<LabelTable>) -> Self {
    Self {
      labels,
      threshold: DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  /// 按记录顺序输出，不排序、不去重、不做 NMS
  pub fn decode(&self, output: &RawOutput) -> Vec<Detection> {
    debug!("后处理模型输出: {} 个数值", output.len());
    if output.remainder() != 0 {
      warn!(
        "模型输出长度 {} 不是 {} 的整数倍，忽略末尾 {} 个数值",
        output.len(),
        RAW_RECORD_LEN,
        output.remainder()
      );
    }

    let mut items = Vec::new();
    for record in output.records() {
      let &[x1, y1, x2, y2, confidence, class_id] = record else {
        continue;
      };

      // NaN 同样被过滤
      if !(confidence > self.threshold) {
        continue;
      }

      let Some(label) = self.label_of(class_id) else {
        warn!("无效的类别编号: {}", class_id);
        continue;
      };

      items.push(Detection {
        label: label.to_string(),
        confidence: round2(f64::from(confidence) * 100.0),
        bbox: BoundingBox {
          x1: round2(f64::from(x1)),
          y1: round2(f64::from(y1)),
          x2: round2(f64::from(x2)),
          y2: round2(f64::from(y2)),
        },
      });
    }

    if items.is_empty() {
      debug!("没有置信度大于 {} 的检测结果", self.threshold);
    } else {
      debug!("检测到 {} 个物体", items.len());
    }
    items
  }

  fn label_of(&self, class_id: f32) -> Option<&str> {
    if !class_id.is_finite() {
      return None;
    }
    // 半数向上取整，-0.5 归为 0
    let rounded = (f64::from(class_id) + 0.5).floor();
    if rounded < 0.0 || rounded >= self.labels.len() as f64 {
      return None;
    }
    self.labels.get(rounded as usize)
  }
}

fn round2(value: f64) -> f32 {
  ((value * 100.0).round() / 100.0) as f32
}

#[cfg(test)]
mod tests {
  use super::*;

  fn decoder() -> DetectionDecoder {
    DetectionDecoder::new(Arc::new(LabelTable::from_iter(["Beans", "Bitter_Gourd"])))
  }

  fn decode(data: Vec<f32>) -> Vec<Detection> {
    decoder().decode(&RawOutput::from(data))
  }

  #[test]
  fn single_record_end_to_end() {
    let detections = decode(vec![0.0, 0.0, 10.0, 10.0, 0.9, 0.0]);
    assert_eq!(
      detections,
      vec![Detection {
        label: "Beans".to_string(),
        confidence: 90.0,
        bbox: BoundingBox {
          x1: 0.0,
          y1: 0.0,
          x2: 10.0,
          y2: 10.0
        },
      }]
    );
  }

  #[test]
  fn empty_output_is_not_an_error() {
    assert!(decode(Vec::new()).is_empty());
  }

  #[test]
  fn threshold_is_strict() {
    assert!(decode(vec![0.0, 0.0, 1.0, 1.0, 0.5, 1.0]).is_empty());

    let detections = decode(vec![0.0, 0.0, 1.0, 1.0, 0.50001, 1.0]);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "Bitter_Gourd");
    assert_eq!(detections[0].confidence, 50.0);
  }

  #[test]
  fn nan_confidence_is_skipped() {
    assert!(decode(vec![0.0, 0.0, 1.0, 1.0, f32::NAN, 0.0]).is_empty());
  }

  #[test]
  fn out_of_range_class_is_skipped() {
    let detections = decode(vec![
      1.0, 1.0, 2.0, 2.0, 0.9, 2.0, // class_id == label count
      3.0, 3.0, 4.0, 4.0, 0.8, 1.0, //
      5.0, 5.0, 6.0, 6.0, 0.7, -3.0, //
      7.0, 7.0, 8.0, 8.0, 0.6, f32::INFINITY,
    ]);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "Bitter_Gourd");
    assert_eq!(detections[0].bbox.x1, 3.0);
  }

  #[test]
  fn class_id_rounds_to_nearest() {
    let detections = decode(vec![
      0.0, 0.0, 1.0, 1.0, 0.9, 0.6, //
      0.0, 0.0, 1.0, 1.0, 0.9, 1.4, //
      0.0, 0.0, 1.0, 1.0, 0.9, -0.5, //
      0.0, 0.0, 1.0, 1.0, 0.9, 1.5,
    ]);
    let labels = detections.iter().map(|d| d.label.as_str()).collect::<Vec<_>>();
    assert_eq!(labels, vec!["Bitter_Gourd", "Bitter_Gourd", "Beans"]);
  }

  #[test]
  fn values_round_to_two_decimals() {
    let detections = decode(vec![12.3456, 0.004, 99.995_1, 223.999, 0.87654, 0.0]);
    let detection = &detections[0];
    assert_eq!(detection.confidence, 87.65);
    assert_eq!(detection.bbox.x1, 12.35);
    assert_eq!(detection.bbox.y1, 0.0);
    assert_eq!(detection.bbox.x2, 100.0);
    assert_eq!(detection.bbox.y2, 224.0);
  }

  #[test]
  fn record_order_is_preserved() {
    let detections = decode(vec![
      0.0, 0.0, 5.0, 5.0, 0.6, 1.0, //
      0.0, 0.0, 5.0, 5.0, 0.99, 0.0, //
      0.0, 0.0, 5.0, 5.0, 0.99, 0.0,
    ]);
    let confidences = detections.iter().map(|d| d.confidence).collect::<Vec<_>>();
    assert_eq!(confidences, vec![60.0, 99.0, 99.0]);
  }

  #[test]
  fn trailing_partial_record_is_ignored() {
    let detections = decode(vec![0.0, 0.0, 1.0, 1.0, 0.9, 0.0, 0.9, 0.9, 0.9]);
    assert_eq!(detections.len(), 1);
  }

  #[test]
  fn custom_threshold() {
    let decoder = decoder().threshold(0.8);
    let output = RawOutput::from(vec![
      0.0, 0.0, 1.0, 1.0, 0.79, 0.0, //
      0.0, 0.0, 1.0, 1.0, 0.81, 0.0,
    ]);
    assert_eq!(decoder.decode(&output).len(), 1);
  }
}
