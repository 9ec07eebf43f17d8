// 该文件是 Shanshi （膳食） 项目的一部分。
// src/classify/onnx.rs - ONNX 图像分类模型封装
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
use ndarray::Array4;
use ort::Session;
use thiserror::Error;
use tracing::{debug, info};

use crate::device::Device;
use crate::frame;

/// 分类模型输入边长
const CLASSIFIER_INPUT_SIZE: u32 = 224;
/// 中心裁剪前的缩放边长
const CLASSIFIER_RESIZE: u32 = 256;

#[derive(Error, Debug)]
pub enum ClassifierModelError {
  #[error("onnxruntime error: {0}")]
  OrtError(#[from] ort::Error),
  #[error("model produced an empty output")]
  EmptyOutput,
}

/// 基于 ONNX Runtime 的闭集图像分类模型。
/// 加载后只读，可被多个并发请求共享。
pub struct OnnxClassifier {
  session: Session,
}

impl OnnxClassifier {
  pub fn load(model_path: &Path, device: Device) -> Result<Self, ClassifierModelError> {
    info!("加载分类模型: {}", model_path.display());
    if let Ok(meta) = std::fs::metadata(model_path) {
      debug!("模型文件大小: {:.2} MB", meta.len() as f64 / (1024.0 * 1024.0));
    }
    let session = crate::device::session_builder(device)?.commit_from_file(model_path)?;
    info!("分类模型加载完成");
    Ok(OnnxClassifier { session })
  }

  /// 对裁剪图运行前向，返回 softmax 后的类别概率向量。
  pub fn probabilities(&self, crop: &RgbImage) -> Result<Vec<f32>, ClassifierModelError> {
    let input = preprocess(crop);

    debug!("执行分类模型推理");
    let outputs = self.session.run(ort::inputs![input.view()]?)?;
    let output = outputs[0].try_extract_tensor::<f32>()?;

    let logits: Vec<f32> = output.iter().copied().collect();
    if logits.is_empty() {
      return Err(ClassifierModelError::EmptyOutput);
    }
    Ok(softmax(&logits))
  }
}

/// 分类预处理：短边缩放到 256（保持纵横比）、中心裁剪 224、
/// ImageNet 归一化、NCHW。
pub fn preprocess(crop: &RgbImage) -> Array4<f32> {
  let (width, height) = crop.dimensions();
  let (resize_width, resize_height) = fit_shorter_side(width, height);
  let resized = image::imageops::resize(
    crop,
    resize_width,
    resize_height,
    image::imageops::FilterType::Triangle,
  );
  let offset_x = (resize_width - CLASSIFIER_INPUT_SIZE) / 2;
  let offset_y = (resize_height - CLASSIFIER_INPUT_SIZE) / 2;
  let center = image::imageops::crop_imm(
    &resized,
    offset_x,
    offset_y,
    CLASSIFIER_INPUT_SIZE,
    CLASSIFIER_INPUT_SIZE,
  )
  .to_image();
  frame::to_nchw_imagenet(&center)
}

/// 把短边缩放到 256、长边按同一比例缩放后的目标尺寸。
/// 两边都不小于 256，保证中心裁剪 224 始终有效。
pub fn fit_shorter_side(width: u32, height: u32) -> (u32, u32) {
  let shorter = width.min(height).max(1);
  let scale = CLASSIFIER_RESIZE as f32 / shorter as f32;
  let resize_width = ((width as f32 * scale).round() as u32).max(CLASSIFIER_RESIZE);
  let resize_height = ((height as f32 * scale).round() as u32).max(CLASSIFIER_RESIZE);
  (resize_width, resize_height)
}

/// 数值稳定的 softmax。
pub fn softmax(values: &[f32]) -> Vec<f32> {
  if values.is_empty() {
    return Vec::new();
  }
  let max_val = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = values.iter().map(|v| (v - max_val).exp()).collect();
  let sum: f32 = exps.iter().sum();
  if sum <= 0.0 {
    return vec![0.0; values.len()];
  }
  exps.iter().map(|e| e / sum).collect()
}
