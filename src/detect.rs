// 该文件是 Shanshi （膳食） 项目的一部分。
// src/detect.rs - 食物区域检测器
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
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::frame::{self, BoundingBox, FrameError};
use crate::labels;

pub mod yolo;

use yolo::{COCO_CLASSES, RawDetection, YoloModel};

/// 专用食物检测模型工件名
pub const FOOD_DETECTOR_FILE: &str = "food_detector.onnx";
/// 通用目标检测模型工件名
pub const GENERIC_DETECTOR_FILE: &str = "yolov8n.onnx";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.45;

/// 无模型时整图候选的固定置信度
const WHOLE_IMAGE_CONFIDENCE: f32 = 0.6;
/// 仅检出餐桌场景物体时合成候选的置信度
const DINING_CONTEXT_CONFIDENCE: f32 = 0.45;
/// 通用模型一无所获时整图候选的置信度
const GENERIC_EMPTY_CONFIDENCE: f32 = 0.3;

const GENERIC_LABEL_HINT: &str = "food";

/// 通用 COCO 词表中与食物直接相关的类别
const FOOD_ALLOW_LIST: [&str; 10] = [
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
];

/// 暗示就餐场景但本身不是食物的类别
const DINING_CONTEXT_CLASSES: [&str; 8] = [
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "dining table",
];

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("invalid image: {0}")]
  InvalidImage(#[from] FrameError),
}

/// 源图像中定位到的一个候选物体。
/// 请求期间创建，分类消费其裁剪图后即丢弃，不跨请求共享。
pub struct DetectionCandidate {
  pub label_hint: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub crop: RgbImage,
}

/// 检测策略，在模型构造时根据工件存在性确定一次，此后不再判定。
pub enum DetectorStrategy {
  /// 专用食物检测模型：所有检出框都视作食物候选
  Specialized(YoloModel),
  /// 通用目标检测模型：按食物类别白名单过滤
  GenericFiltered(YoloModel),
  /// 无可用模型：固定返回一个覆盖整图的候选
  WholeImage,
  /// 预设检测结果。供测试在不加载真实模型的情况下驱动完整管线。
  Scripted(Vec<RawDetection>),
}

pub struct Detector {
  strategy: DetectorStrategy,
}

impl Detector {
  /// 按工件存在性选择检测策略。模型缺失或损坏不视为错误，
  /// 逐级退化到整图回退模式。
  pub fn load(
    model_dir: &Path,
    device: crate::device::Device,
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Self {
    let specialized = model_dir.join(FOOD_DETECTOR_FILE);
    if specialized.exists() {
      let class_labels = labels::load_sidecar(&specialized)
        .unwrap_or_else(|| vec![GENERIC_LABEL_HINT.to_string()]);
      match YoloModel::load(
        &specialized,
        class_labels,
        device,
        confidence_threshold,
        nms_threshold,
      ) {
        Ok(model) => {
          return Detector {
            strategy: DetectorStrategy::Specialized(model),
          };
        }
        Err(e) => warn!("专用检测模型加载失败，尝试通用模型: {}", e),
      }
    }

    let generic = model_dir.join(GENERIC_DETECTOR_FILE);
    if generic.exists() {
      let class_labels = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
      match YoloModel::load(
        &generic,
        class_labels,
        device,
        confidence_threshold,
        nms_threshold,
      ) {
        Ok(model) => {
          return Detector {
            strategy: DetectorStrategy::GenericFiltered(model),
          };
        }
        Err(e) => warn!("通用检测模型加载失败: {}", e),
      }
    }

    warn!("未找到可用的检测模型工件，使用整图回退模式");
    Detector {
      strategy: DetectorStrategy::WholeImage,
    }
  }

  pub fn from_strategy(strategy: DetectorStrategy) -> Self {
    Detector { strategy }
  }

  /// 当前策略名，用于日志。
  pub fn mode(&self) -> &'static str {
    match self.strategy {
      DetectorStrategy::Specialized(_) => "specialized",
      DetectorStrategy::GenericFiltered(_) => "generic",
      DetectorStrategy::WholeImage => "whole-image",
      DetectorStrategy::Scripted(_) => "scripted",
    }
  }

  /// 解码图像字节并检测候选区域。
  /// 仅在输入本身无效时失败；对结构有效的图像保证返回非空序列。
  pub fn detect(&self, image_bytes: &[u8]) -> Result<Vec<DetectionCandidate>, DetectError> {
    let image = frame::decode_rgb(image_bytes)?;
    Ok(self.detect_image(&image))
  }

  /// 对已解码图像检测候选区域。推理内部错误被吞掉并降级为整图候选，
  /// 不会影响共享模型实例或后续请求。
  pub fn detect_image(&self, image: &RgbImage) -> Vec<DetectionCandidate> {
    match &self.strategy {
      DetectorStrategy::Specialized(model) => match model.detect(image) {
        Ok(raw) if !raw.is_empty() => raw
          .into_iter()
          .map(|det| candidate_from_raw(det, image))
          .collect(),
        Ok(_) => {
          debug!("专用模型未检出食物，回退到整图候选");
          vec![whole_image_candidate(image, WHOLE_IMAGE_CONFIDENCE)]
        }
        Err(e) => {
          error!("专用检测模型推理失败，降级为整图候选: {}", e);
          vec![whole_image_candidate(image, WHOLE_IMAGE_CONFIDENCE)]
        }
      },
      DetectorStrategy::GenericFiltered(model) => match model.detect(image) {
        Ok(raw) => filter_generic(raw, image),
        Err(e) => {
          error!("通用检测模型推理失败，降级为整图候选: {}", e);
          vec![whole_image_candidate(image, WHOLE_IMAGE_CONFIDENCE)]
        }
      },
      DetectorStrategy::WholeImage => {
        vec![whole_image_candidate(image, WHOLE_IMAGE_CONFIDENCE)]
      }
      DetectorStrategy::Scripted(raw) => {
        if raw.is_empty() {
          vec![whole_image_candidate(image, WHOLE_IMAGE_CONFIDENCE)]
        } else {
          raw
            .iter()
            .cloned()
            .map(|det| candidate_from_raw(det, image))
            .collect()
        }
      }
    }
  }
}

fn candidate_from_raw(det: RawDetection, image: &RgbImage) -> DetectionCandidate {
  let crop = frame::crop(image, &det.bbox);
  DetectionCandidate {
    label_hint: det.class_name,
    confidence: det.confidence,
    bbox: det.bbox,
    crop,
  }
}

fn whole_image_candidate(image: &RgbImage, confidence: f32) -> DetectionCandidate {
  let (width, height) = image.dimensions();
  DetectionCandidate {
    label_hint: GENERIC_LABEL_HINT.to_string(),
    confidence,
    bbox: BoundingBox::full(width, height),
    crop: image.clone(),
  }
}

/// 通用模型模式的过滤规则：
/// 保留食物白名单类别；若一个都没有但出现就餐场景物体，
/// 合成一个低置信度的整图候选，而不是返回空。
fn filter_generic(raw: Vec<RawDetection>, image: &RgbImage) -> Vec<DetectionCandidate> {
  let has_dining_context = raw
    .iter()
    .any(|det| DINING_CONTEXT_CLASSES.contains(&det.class_name.as_str()));

  let food: Vec<DetectionCandidate> = raw
    .into_iter()
    .filter(|det| FOOD_ALLOW_LIST.contains(&det.class_name.as_str()))
    .map(|det| candidate_from_raw(det, image))
    .collect();

  if !food.is_empty() {
    return food;
  }

  if has_dining_context {
    debug!("未检出食物但存在就餐场景物体，合成整图候选");
    return vec![whole_image_candidate(image, DINING_CONTEXT_CONFIDENCE)];
  }

  debug!("通用模型未检出任何相关物体，回退到整图候选");
  vec![whole_image_candidate(image, GENERIC_EMPTY_CONFIDENCE)]
}
