// 该文件是 Shanshi （膳食） 项目的一部分。
// src/pipeline.rs - 分析编排器：检测 → 分类 → 知识库 → 置信度融合
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

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::detect::DetectError;
use crate::manager::ModelManager;
use crate::nutrition::NutritionDb;

/// 聚合置信度上限：管线永不宣称完全确定。
pub const AGGREGATE_CONFIDENCE_CAP: f32 = 0.95;

#[derive(Error, Debug)]
pub enum AnalysisError {
  /// 输入本身无效（无法解码或尺寸过小），对应调用方错误。
  #[error("{0}")]
  InvalidImage(#[from] DetectError),
  /// 管线正常完成但没有任何候选在知识库中命中。
  #[error("no recognizable food found in the image")]
  NoFoodFound,
}

/// 最终结果中的一个食物条目。
#[derive(Debug, Clone, PartialEq)]
pub struct FoodItem {
  pub name: String,
  pub calories: u32,
  pub protein_g: f32,
  pub carbs_g: f32,
  pub fat_g: f32,
  pub portion_grams: u32,
  pub portion_description: String,
}

/// 一次分析调用的聚合结果。
#[derive(Debug, Clone)]
pub struct AnalysisResult {
  pub items: Vec<FoodItem>,
  pub total_calories: u32,
  pub total_protein_g: f32,
  pub total_carbs_g: f32,
  pub total_fat_g: f32,
  pub aggregate_confidence: f32,
  pub combined_portion_description: String,
}

/// 请求级管线编排器。模型经由管理器共享，只读；
/// 每次 analyze 调用期间的全部可变状态都是请求私有的。
pub struct Analyzer {
  manager: Arc<ModelManager>,
  kb: NutritionDb,
}

impl Analyzer {
  pub fn new(manager: Arc<ModelManager>) -> Self {
    Analyzer {
      manager,
      kb: NutritionDb::embedded(),
    }
  }

  pub fn with_knowledge_base(manager: Arc<ModelManager>, kb: NutritionDb) -> Self {
    Analyzer { manager, kb }
  }

  /// 分析一幅照片并返回聚合营养估计。
  /// 失败只有两类：输入图像无效，或没有任何候选在知识库中命中。
  pub fn analyze(&self, image_bytes: &[u8], language: &str) -> Result<AnalysisResult, AnalysisError> {
    let detector = self.manager.detector();
    let classifier = self.manager.classifier();

    let candidates = detector.detect(image_bytes)?;
    if candidates.is_empty() {
      return Err(AnalysisError::NoFoodFound);
    }
    debug!("检测阶段产出 {} 个候选区域", candidates.len());

    let mut items = Vec::new();
    let mut confidences = Vec::new();
    for candidate in &candidates {
      let cls = classifier.classify(&candidate.crop, language);

      // 知识库查询顺序：规范键（含归一化变体）、再退回展示名。
      // 无记录的候选直接跳过，不臆造营养数字。
      let record = self
        .kb
        .lookup(&cls.canonical_key)
        .or_else(|| self.kb.lookup(&cls.display_name));
      let Some(record) = record else {
        debug!("候选 {:?} 在知识库中无记录，跳过", cls.canonical_key);
        continue;
      };

      let combined = fuse_confidence(candidate.confidence, cls.confidence, record.match_confidence);
      debug!(
        "候选 {:?}: 检测 {:.2} × 分类 {:.2} × 知识库 {:.2} = {:.3}",
        cls.canonical_key, candidate.confidence, cls.confidence, record.match_confidence, combined
      );

      items.push(FoodItem {
        name: cls.display_name,
        calories: record.calories,
        protein_g: record.protein_g,
        carbs_g: record.carbs_g,
        fat_g: record.fat_g,
        portion_grams: record.portion_grams,
        portion_description: record.portion_description.clone(),
      });
      confidences.push(combined);
    }

    if items.is_empty() {
      return Err(AnalysisError::NoFoodFound);
    }

    let result = aggregate(items, &confidences);
    info!(
      "分析完成: {} 个条目, 共 {} 千卡, 置信度 {:.2}",
      result.items.len(),
      result.total_calories,
      result.aggregate_confidence
    );
    Ok(result)
  }
}

/// 乘法融合规则：任一环节信号弱都会压低整体置信度。
pub fn fuse_confidence(detection: f32, classification: f32, knowledge_base: f32) -> f32 {
  (detection * classification * knowledge_base).clamp(0.0, 1.0)
}

/// 各条目融合置信度的算术平均，封顶于上限。
pub fn aggregate_confidence(confidences: &[f32]) -> f32 {
  if confidences.is_empty() {
    return 0.0;
  }
  let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;
  mean.min(AGGREGATE_CONFIDENCE_CAP)
}

/// 份量描述：单条目沿用其自身描述，多条目合成总克数。
pub fn combined_portion_description(items: &[FoodItem]) -> String {
  match items {
    [only] => only.portion_description.clone(),
    _ => {
      let total_grams: u32 = items.iter().map(|item| item.portion_grams).sum();
      format!("{} foods (~{}g)", items.len(), total_grams)
    }
  }
}

fn aggregate(items: Vec<FoodItem>, confidences: &[f32]) -> AnalysisResult {
  let total_calories = items.iter().map(|item| item.calories).sum();
  let total_protein_g = items.iter().map(|item| item.protein_g).sum();
  let total_carbs_g = items.iter().map(|item| item.carbs_g).sum();
  let total_fat_g = items.iter().map(|item| item.fat_g).sum();
  let combined_portion_description = combined_portion_description(&items);

  AnalysisResult {
    aggregate_confidence: aggregate_confidence(confidences),
    combined_portion_description,
    total_calories,
    total_protein_g,
    total_carbs_g,
    total_fat_g,
    items,
  }
}

/// 外层服务消费的 JSON 响应形态。
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalysisResponse {
  Success {
    success: bool,
    food_name: String,
    calories: u32,
    protein: f32,
    carbs: f32,
    fats: f32,
    portion_size: String,
    confidence: f32,
    foods_detail: Vec<FoodDetail>,
  },
  Failure { success: bool, error: String },
}

#[derive(Debug, Serialize)]
pub struct FoodDetail {
  pub name: String,
  pub calories: u32,
  pub protein: f32,
  pub carbs: f32,
  pub fats: f32,
  pub portion_size: String,
}

impl AnalysisResponse {
  pub fn from_result(result: &AnalysisResult) -> Self {
    let food_name = result
      .items
      .iter()
      .map(|item| item.name.as_str())
      .collect::<Vec<_>>()
      .join(", ");
    let foods_detail = result
      .items
      .iter()
      .map(|item| FoodDetail {
        name: item.name.clone(),
        calories: item.calories,
        protein: item.protein_g,
        carbs: item.carbs_g,
        fats: item.fat_g,
        portion_size: item.portion_description.clone(),
      })
      .collect();

    AnalysisResponse::Success {
      success: true,
      food_name,
      calories: result.total_calories,
      protein: result.total_protein_g,
      carbs: result.total_carbs_g,
      fats: result.total_fat_g,
      portion_size: result.combined_portion_description.clone(),
      confidence: result.aggregate_confidence,
      foods_detail,
    }
  }

  pub fn from_error(error: &AnalysisError) -> Self {
    AnalysisResponse::Failure {
      success: false,
      error: error.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(name: &str, calories: u32, grams: u32, portion: &str) -> FoodItem {
    FoodItem {
      name: name.to_string(),
      calories,
      protein_g: 10.0,
      carbs_g: 20.0,
      fat_g: 5.0,
      portion_grams: grams,
      portion_description: portion.to_string(),
    }
  }

  #[test]
  fn fusion_punishes_weak_signal() {
    let strong = fuse_confidence(0.9, 0.9, 0.9);
    let weak_stage = fuse_confidence(0.9, 0.1, 0.9);
    assert!(weak_stage < strong);
    assert!((fuse_confidence(0.5, 0.8, 0.9) - 0.36).abs() < 1e-6);
  }

  #[test]
  fn aggregate_confidence_is_mean_capped() {
    assert!((aggregate_confidence(&[0.4, 0.6]) - 0.5).abs() < 1e-6);
    assert!((aggregate_confidence(&[0.99, 0.99]) - AGGREGATE_CONFIDENCE_CAP).abs() < f32::EPSILON);
    assert_eq!(aggregate_confidence(&[]), 0.0);
  }

  #[test]
  fn single_item_keeps_its_own_portion_description() {
    let items = vec![item("Pizza", 285, 107, "1 slice (107g)")];
    assert_eq!(combined_portion_description(&items), "1 slice (107g)");
  }

  #[test]
  fn multiple_items_synthesize_portion_description() {
    let items = vec![
      item("Pizza", 285, 107, "1 slice (107g)"),
      item("Banana", 105, 118, "1 medium (118g)"),
    ];
    assert_eq!(combined_portion_description(&items), "2 foods (~225g)");
  }

  #[test]
  fn aggregate_totals_are_exact_sums() {
    let items = vec![
      item("Pizza", 285, 107, "1 slice (107g)"),
      item("Banana", 105, 118, "1 medium (118g)"),
      item("Apple", 95, 182, "1 medium (182g)"),
    ];
    let result = aggregate(items, &[0.5, 0.6, 0.7]);
    assert_eq!(result.total_calories, 285 + 105 + 95);
    assert!((result.total_protein_g - 30.0).abs() < 1e-6);
    assert!((result.total_carbs_g - 60.0).abs() < 1e-6);
    assert!((result.total_fat_g - 15.0).abs() < 1e-6);
    assert!((result.aggregate_confidence - 0.6).abs() < 1e-6);
  }

  #[test]
  fn success_response_shape() {
    let result = aggregate(
      vec![
        item("Pizza", 285, 107, "1 slice (107g)"),
        item("Banana", 105, 118, "1 medium (118g)"),
      ],
      &[0.5, 0.7],
    );
    let json = serde_json::to_value(AnalysisResponse::from_result(&result)).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["food_name"], "Pizza, Banana");
    assert_eq!(json["calories"], 390);
    assert_eq!(json["portion_size"], "2 foods (~225g)");
    assert_eq!(json["foods_detail"].as_array().unwrap().len(), 2);
    assert_eq!(json["foods_detail"][0]["name"], "Pizza");
  }

  #[test]
  fn failure_response_shape() {
    let json = serde_json::to_value(AnalysisResponse::from_error(&AnalysisError::NoFoodFound)).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "no recognizable food found in the image");
    assert!(json.get("foods_detail").is_none());
  }
}
