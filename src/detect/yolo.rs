// 该文件是 Shanshi （膳食） 项目的一部分。
// src/detect/yolo.rs - YOLO 目标检测模型封装
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Wei Lin <weilin@shanshi.dev>

use std::path::Path;

use image::RgbImage;
use ndarray::ArrayViewD;
use ort::Session;
use thiserror::Error;
use tracing::{debug, info};

use crate::device::Device;
use crate::frame::{self, BoundingBox};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 模型输入边长
const YOLO_INPUT_SIZE: u32 = 640;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("onnxruntime error: {0}")]
  OrtError(#[from] ort::Error),
  #[error("unexpected model output shape: {0:?}")]
  OutputShape(Vec<usize>),
}

/// 单个检测框，坐标为原图像素坐标。
#[derive(Debug, Clone)]
pub struct RawDetection {
  pub class_id: usize,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

/// 基于 ONNX Runtime 的 YOLO 检测模型。
/// 加载后只读，可被多个并发请求共享。
pub struct YoloModel {
  session: Session,
  labels: Vec<String>,
  confidence_threshold: f32,
  nms_threshold: f32,
}

impl YoloModel {
  pub fn load(
    model_path: &Path,
    labels: Vec<String>,
    device: Device,
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Self, YoloError> {
    info!("加载检测模型: {}", model_path.display());
    if let Ok(meta) = std::fs::metadata(model_path) {
      debug!("模型文件大小: {:.2} MB", meta.len() as f64 / (1024.0 * 1024.0));
    }
    let session = crate::device::session_builder(device)?.commit_from_file(model_path)?;
    info!("检测模型加载完成（{} 个类别）", labels.len());

    Ok(YoloModel {
      session,
      labels,
      confidence_threshold,
      nms_threshold,
    })
  }

  /// 对整幅图像运行检测，返回超过置信度阈值并经过 NMS 的检测框。
  pub fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, YoloError> {
    let (original_width, original_height) = image.dimensions();

    let resized = image::imageops::resize(
      image,
      YOLO_INPUT_SIZE,
      YOLO_INPUT_SIZE,
      image::imageops::FilterType::Triangle,
    );
    let input = frame::to_nchw_scaled(&resized);

    debug!("执行检测模型推理");
    let outputs = self.session.run(ort::inputs![input.view()]?)?;
    let output = outputs[0].try_extract_tensor::<f32>()?;

    self.postprocess(&output, original_width, original_height)
  }

  /// 解析 YOLOv8 风格输出 [1, 4 + 类别数, 锚点数]：
  /// 前 4 行为 cx/cy/w/h（输入尺度），其余为各类别得分。
  fn postprocess(
    &self,
    output: &ArrayViewD<'_, f32>,
    original_width: u32,
    original_height: u32,
  ) -> Result<Vec<RawDetection>, YoloError> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[1] < 5 {
      return Err(YoloError::OutputShape(shape));
    }
    let num_classes = shape[1] - 4;
    let num_anchors = shape[2];

    let scale_x = original_width as f32 / YOLO_INPUT_SIZE as f32;
    let scale_y = original_height as f32 / YOLO_INPUT_SIZE as f32;

    let mut detections = Vec::new();
    for anchor in 0..num_anchors {
      let mut best_score = 0.0f32;
      let mut best_class = 0usize;
      for class_id in 0..num_classes {
        let score = output[[0, 4 + class_id, anchor]];
        if score > best_score {
          best_score = score;
          best_class = class_id;
        }
      }
      if best_score < self.confidence_threshold {
        continue;
      }

      let cx = output[[0, 0, anchor]];
      let cy = output[[0, 1, anchor]];
      let w = output[[0, 2, anchor]];
      let h = output[[0, 3, anchor]];

      let bbox = match BoundingBox::from_xyxy(
        (cx - w / 2.0) * scale_x,
        (cy - h / 2.0) * scale_y,
        (cx + w / 2.0) * scale_x,
        (cy + h / 2.0) * scale_y,
        original_width,
        original_height,
      ) {
        Some(bbox) => bbox,
        None => continue,
      };

      detections.push(RawDetection {
        class_id: best_class,
        class_name: self
          .labels
          .get(best_class)
          .map(String::as_str)
          .unwrap_or("unknown")
          .to_string(),
        confidence: best_score.clamp(0.0, 1.0),
        bbox,
      });
    }

    let detections = nms(detections, self.nms_threshold);
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

/// 非极大值抑制：按置信度降序贪心保留，抑制同类高重叠框。
pub fn nms(mut detections: Vec<RawDetection>, nms_threshold: f32) -> Vec<RawDetection> {
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(std::cmp::Ordering::Equal)
  });

  let mut result: Vec<RawDetection> = Vec::new();
  while !detections.is_empty() {
    let best = detections.remove(0);
    detections.retain(|det| det.class_id != best.class_id || iou(&best.bbox, &det.bbox) < nms_threshold);
    result.push(best);
  }
  result
}

/// 计算两个边界框的 IoU。
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.x1.max(b.x1) as f32;
  let y1 = a.y1.max(b.y1) as f32;
  let x2 = a.x2.min(b.x2) as f32;
  let y2 = a.y2.min(b.y2) as f32;

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = a.width() as f32 * a.height() as f32;
  let area_b = b.width() as f32 * b.height() as f32;
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
