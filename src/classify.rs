// 该文件是 Shanshi （膳食） 项目的一部分。
// src/classify.rs - 食物分类器
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
use std::sync::atomic::{AtomicUsize, Ordering};

use image::RgbImage;
use tracing::{error, warn};

use crate::labels;
use crate::nutrition::normalize_key;

pub mod onnx;

use onnx::OnnxClassifier;

/// 专用食物分类模型工件名
pub const FOOD_CLASSIFIER_FILE: &str = "food_classifier.onnx";
/// 通用 ImageNet 分类模型工件名
pub const GENERIC_CLASSIFIER_FILE: &str = "mobilenetv2.onnx";

/// 候选标签上限（含首位主标签）
const MAX_ALTERNATIVES: usize = 5;
/// 无模型回退结果的固定置信度
const FALLBACK_CONFIDENCE: f32 = 0.45;
/// 无模型回退结果的规范键
const FALLBACK_KEY: &str = "food";

/// ImageNet-1k 中表示食物/饮品的类别，经人工筛选
/// （剔除区间内的干草、杯子等非食物项）。
const IMAGENET_FOOD_LABELS: &[(usize, &str)] = &[
  (924, "guacamole"),
  (925, "consomme"),
  (926, "hot pot"),
  (927, "trifle"),
  (928, "ice cream"),
  (929, "ice lolly"),
  (930, "french loaf"),
  (931, "bagel"),
  (932, "pretzel"),
  (933, "cheeseburger"),
  (934, "hot dog"),
  (935, "mashed potato"),
  (936, "head cabbage"),
  (937, "broccoli"),
  (938, "cauliflower"),
  (939, "zucchini"),
  (940, "spaghetti squash"),
  (941, "acorn squash"),
  (942, "butternut squash"),
  (943, "cucumber"),
  (944, "artichoke"),
  (945, "bell pepper"),
  (946, "cardoon"),
  (947, "mushroom"),
  (948, "apple"),
  (949, "strawberry"),
  (950, "orange"),
  (951, "lemon"),
  (952, "fig"),
  (953, "pineapple"),
  (954, "banana"),
  (955, "jackfruit"),
  (956, "custard apple"),
  (957, "pomegranate"),
  (959, "carbonara"),
  (960, "chocolate sauce"),
  (961, "dough"),
  (962, "meat loaf"),
  (963, "pizza"),
  (964, "potpie"),
  (965, "burrito"),
  (966, "red wine"),
  (967, "espresso"),
  (969, "eggnog"),
];

/// 对一个裁剪图的分类结果。
#[derive(Debug, Clone)]
pub struct ClassificationResult {
  /// 人类可读展示名，随请求语言本地化
  pub display_name: String,
  /// 知识库查询所用的规范键，跨语言稳定
  pub canonical_key: String,
  pub confidence: f32,
  /// 降序候选序列，长度 ≤ 5，首项与主结果一致
  pub alternatives: Vec<(String, f32)>,
}

/// 分类策略，在模型构造时根据工件存在性确定一次。
pub enum ClassifierStrategy {
  /// 闭集食物分类模型与其类别表
  Specialized {
    model: OnnxClassifier,
    class_labels: Vec<String>,
  },
  /// 开放词表 ImageNet 分类模型，输出被限制在食物类别子集内
  GenericImageNet(OnnxClassifier),
  /// 无可用模型：固定返回低信息量结果
  Fallback,
  /// 预设的排序结果序列，按调用顺序循环消费。
  /// 供测试在不加载真实模型的情况下驱动完整管线。
  Scripted {
    sequence: Vec<Vec<(String, f32)>>,
    cursor: AtomicUsize,
  },
}

impl ClassifierStrategy {
  pub fn scripted(sequence: Vec<Vec<(String, f32)>>) -> Self {
    ClassifierStrategy::Scripted {
      sequence,
      cursor: AtomicUsize::new(0),
    }
  }
}

pub struct Classifier {
  strategy: ClassifierStrategy,
}

impl Classifier {
  /// 按工件存在性选择分类策略。模型缺失或损坏不视为错误，
  /// 逐级退化到固定回退结果。
  pub fn load(model_dir: &Path, device: crate::device::Device) -> Self {
    let specialized = model_dir.join(FOOD_CLASSIFIER_FILE);
    if specialized.exists() {
      match labels::load_sidecar(&specialized) {
        Some(class_labels) => match OnnxClassifier::load(&specialized, device) {
          Ok(model) => {
            return Classifier {
              strategy: ClassifierStrategy::Specialized { model, class_labels },
            };
          }
          Err(e) => warn!("专用分类模型加载失败，尝试通用模型: {}", e),
        },
        None => warn!("专用分类模型缺少类别表，尝试通用模型"),
      }
    }

    let generic = model_dir.join(GENERIC_CLASSIFIER_FILE);
    if generic.exists() {
      match OnnxClassifier::load(&generic, device) {
        Ok(model) => {
          return Classifier {
            strategy: ClassifierStrategy::GenericImageNet(model),
          };
        }
        Err(e) => warn!("通用分类模型加载失败: {}", e),
      }
    }

    warn!("未找到可用的分类模型工件，使用固定回退结果");
    Classifier {
      strategy: ClassifierStrategy::Fallback,
    }
  }

  pub fn from_strategy(strategy: ClassifierStrategy) -> Self {
    Classifier { strategy }
  }

  /// 当前策略名，用于日志。
  pub fn mode(&self) -> &'static str {
    match self.strategy {
      ClassifierStrategy::Specialized { .. } => "specialized",
      ClassifierStrategy::GenericImageNet(_) => "generic",
      ClassifierStrategy::Fallback => "fallback",
      ClassifierStrategy::Scripted { .. } => "scripted",
    }
  }

  /// 为一个裁剪图分配食物标签。该边界永不失败：
  /// 推理内部错误被记录并转换为回退结果，不会波及共享模型实例。
  pub fn classify(&self, crop: &RgbImage, language: &str) -> ClassificationResult {
    match &self.strategy {
      ClassifierStrategy::Specialized { model, class_labels } => {
        match model.probabilities(crop) {
          Ok(probs) => match specialized_result(&probs, class_labels, language) {
            Some(result) => result,
            None => {
              error!(
                "专用分类模型输出（{} 维）与类别表（{} 类）不匹配，返回回退结果",
                probs.len(),
                class_labels.len()
              );
              fallback_result(language)
            }
          },
          Err(e) => {
            error!("专用分类模型推理失败，返回回退结果: {}", e);
            fallback_result(language)
          }
        }
      }
      ClassifierStrategy::GenericImageNet(model) => match model.probabilities(crop) {
        Ok(probs) => match best_imagenet_food(&probs) {
          Some((canonical_key, confidence)) => {
            let display_name = labels::display_name(canonical_key, language);
            ClassificationResult {
              display_name: display_name.clone(),
              canonical_key: canonical_key.to_string(),
              confidence,
              alternatives: vec![(display_name, confidence)],
            }
          }
          None => {
            error!("通用分类模型输出维度异常，返回回退结果");
            fallback_result(language)
          }
        },
        Err(e) => {
          error!("通用分类模型推理失败，返回回退结果: {}", e);
          fallback_result(language)
        }
      },
      ClassifierStrategy::Fallback => fallback_result(language),
      ClassifierStrategy::Scripted { sequence, cursor } => {
        if sequence.is_empty() {
          return fallback_result(language);
        }
        let index = cursor.fetch_add(1, Ordering::Relaxed) % sequence.len();
        build_result(sequence[index].clone(), language).unwrap_or_else(|| fallback_result(language))
      }
    }
  }
}

/// 无信息量的回退结果，保证管线可以继续而不是报错。
pub fn fallback_result(language: &str) -> ClassificationResult {
  let display_name = labels::display_name(FALLBACK_KEY, language);
  ClassificationResult {
    display_name: display_name.clone(),
    canonical_key: FALLBACK_KEY.to_string(),
    confidence: FALLBACK_CONFIDENCE,
    alternatives: vec![(display_name, FALLBACK_CONFIDENCE)],
  }
}

/// 专用模式结果构造。概率向量长度必须与类别表严格一致，
/// 否则无法确定各概率对应的类别，整个输出视为无效。
fn specialized_result(
  probs: &[f32],
  class_labels: &[String],
  language: &str,
) -> Option<ClassificationResult> {
  if probs.len() != class_labels.len() {
    return None;
  }
  build_result(rank_classes(probs, class_labels), language)
}

/// 将概率向量与类别表配对并降序排列，截断到候选上限。
fn rank_classes(probs: &[f32], class_labels: &[String]) -> Vec<(String, f32)> {
  let mut ranked: Vec<(String, f32)> = probs
    .iter()
    .zip(class_labels.iter())
    .map(|(p, label)| (label.clone(), p.clamp(0.0, 1.0)))
    .collect();
  ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
  ranked.truncate(MAX_ALTERNATIVES);
  ranked
}

/// 由排序后的 (类别, 概率) 构造分类结果；空输入返回 None。
fn build_result(ranked: Vec<(String, f32)>, language: &str) -> Option<ClassificationResult> {
  let (top_label, confidence) = ranked.first()?.clone();
  let canonical_key = normalize_key(&top_label);
  let display_name = labels::display_name(&canonical_key, language);

  let alternatives: Vec<(String, f32)> = ranked
    .into_iter()
    .map(|(label, prob)| {
      let key = normalize_key(&label);
      (labels::display_name(&key, language), prob)
    })
    .collect();

  Some(ClassificationResult {
    display_name,
    canonical_key,
    confidence,
    alternatives,
  })
}

/// 在 ImageNet 输出中挑选食物子集内概率最高的类别。
fn best_imagenet_food(probs: &[f32]) -> Option<(&'static str, f32)> {
  let mut best: Option<(&'static str, f32)> = None;
  for &(index, label) in IMAGENET_FOOD_LABELS {
    let Some(&prob) = probs.get(index) else {
      return None;
    };
    if best.map(|(_, b)| prob > b).unwrap_or(true) {
      best = Some((label, prob.clamp(0.0, 1.0)));
    }
  }
  best
}
