// 该文件是 Shanshi （膳食） 项目的一部分。
// tests/analyze.rs - 分析管线端到端测试（无模型工件环境）
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

use std::path::PathBuf;
use std::sync::Arc;

use image::{Rgb, RgbImage};

use shanshi::classify::{Classifier, ClassifierStrategy};
use shanshi::detect::yolo::RawDetection;
use shanshi::detect::{Detector, DetectorStrategy};
use shanshi::frame::BoundingBox;
use shanshi::manager::{ModelManager, PipelineConfig};
use shanshi::nutrition::NutritionDb;
use shanshi::pipeline::{AnalysisError, AnalysisResponse, Analyzer};

fn encode_png(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_pixel(width, height, Rgb([180, 150, 90]));
  let mut bytes = Vec::new();
  image::DynamicImage::ImageRgb8(image)
    .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
    .unwrap();
  bytes
}

fn analyzer_without_artifacts() -> Analyzer {
  let manager = Arc::new(ModelManager::new(PipelineConfig {
    model_dir: PathBuf::from("/nonexistent/shanshi-models"),
    ..PipelineConfig::default()
  }));
  Analyzer::new(manager)
}

#[test]
fn tiny_image_fails_with_size_reason() {
  let analyzer = analyzer_without_artifacts();
  let error = analyzer.analyze(&encode_png(10, 10), "en").unwrap_err();
  assert!(matches!(error, AnalysisError::InvalidImage(_)));
  let reason = error.to_string();
  assert!(reason.contains("10x10"), "reason should mention size: {reason}");
  assert!(reason.contains("50x50"), "reason should mention minimum: {reason}");
}

#[test]
fn undecodable_bytes_fail_as_invalid_image() {
  let analyzer = analyzer_without_artifacts();
  let error = analyzer.analyze(b"definitely not an image", "en").unwrap_err();
  assert!(matches!(error, AnalysisError::InvalidImage(_)));
}

#[test]
fn no_artifacts_yield_single_low_confidence_food_item() {
  let analyzer = analyzer_without_artifacts();
  let result = analyzer.analyze(&encode_png(200, 150), "en").unwrap();

  assert_eq!(result.items.len(), 1);
  assert_eq!(result.items[0].name, "Food");
  assert_eq!(result.total_calories, result.items[0].calories);
  assert!(result.aggregate_confidence > 0.0);
  assert!(result.aggregate_confidence < 0.5, "fallback path must stay low-confidence");
  assert_eq!(result.combined_portion_description, result.items[0].portion_description);
}

#[test]
fn totals_match_item_sums() {
  let analyzer = analyzer_without_artifacts();
  let result = analyzer.analyze(&encode_png(120, 120), "en").unwrap();

  let calories: u32 = result.items.iter().map(|item| item.calories).sum();
  let protein: f32 = result.items.iter().map(|item| item.protein_g).sum();
  assert_eq!(result.total_calories, calories);
  assert!((result.total_protein_g - protein).abs() < 1e-6);
  assert!(result.aggregate_confidence <= 0.95);
}

#[test]
fn analyze_is_deterministic_for_fixed_input() {
  let analyzer = analyzer_without_artifacts();
  let bytes = encode_png(160, 120);

  let first = analyzer.analyze(&bytes, "en").unwrap();
  let second = analyzer.analyze(&bytes, "en").unwrap();
  assert_eq!(first.items, second.items);
  assert_eq!(first.total_calories, second.total_calories);
  assert!((first.aggregate_confidence - second.aggregate_confidence).abs() < f32::EPSILON);
}

#[test]
fn display_names_follow_request_language() {
  let analyzer = analyzer_without_artifacts();
  let result = analyzer.analyze(&encode_png(100, 100), "zh").unwrap();
  assert_eq!(result.items[0].name, "食物");
}

#[test]
fn knowledge_base_miss_yields_no_food_found() {
  // 只收录披萨的知识库：回退分类结果（food）无处命中
  let kb = NutritionDb::from_json(
    r#"[{
      "food_name": "pizza",
      "calories": 285,
      "protein_g": 12.0,
      "carbs_g": 36.0,
      "fat_g": 10.0,
      "portion_grams": 107,
      "portion_description": "1 slice (107g)",
      "match_confidence": 0.9
    }]"#,
  )
  .unwrap();
  let manager = Arc::new(ModelManager::new(PipelineConfig {
    model_dir: PathBuf::from("/nonexistent/shanshi-models"),
    ..PipelineConfig::default()
  }));
  let analyzer = Analyzer::with_knowledge_base(manager, kb);

  let error = analyzer.analyze(&encode_png(100, 100), "en").unwrap_err();
  assert!(matches!(error, AnalysisError::NoFoodFound));
}

#[test]
fn two_recognizable_dishes_produce_two_items_with_exact_sums() {
  let detector = Detector::from_strategy(DetectorStrategy::Scripted(vec![
    RawDetection {
      class_id: 53,
      class_name: "pizza".to_string(),
      confidence: 0.8,
      bbox: BoundingBox { x1: 10, y1: 10, x2: 140, y2: 140 },
    },
    RawDetection {
      class_id: 46,
      class_name: "banana".to_string(),
      confidence: 0.6,
      bbox: BoundingBox { x1: 160, y1: 40, x2: 280, y2: 120 },
    },
  ]));
  let classifier = Classifier::from_strategy(ClassifierStrategy::scripted(vec![
    vec![("pizza".to_string(), 0.9), ("hot dog".to_string(), 0.05)],
    vec![("banana".to_string(), 0.8)],
  ]));
  let manager = Arc::new(ModelManager::with_models(detector, classifier));
  let analyzer = Analyzer::new(manager);

  let result = analyzer.analyze(&encode_png(300, 200), "en").unwrap();
  assert_eq!(result.items.len(), 2);
  assert_eq!(result.items[0].name, "Pizza");
  assert_eq!(result.items[1].name, "Banana");

  let kb = NutritionDb::embedded();
  let pizza = kb.lookup("pizza").unwrap();
  let banana = kb.lookup("banana").unwrap();
  assert_eq!(result.total_calories, pizza.calories + banana.calories);
  assert!((result.total_protein_g - (pizza.protein_g + banana.protein_g)).abs() < 1e-5);
  assert!((result.total_carbs_g - (pizza.carbs_g + banana.carbs_g)).abs() < 1e-5);
  assert!((result.total_fat_g - (pizza.fat_g + banana.fat_g)).abs() < 1e-5);

  let expected_mean =
    (0.8 * 0.9 * pizza.match_confidence + 0.6 * 0.8 * banana.match_confidence) / 2.0;
  assert!((result.aggregate_confidence - expected_mean.min(0.95)).abs() < 1e-5);
  assert_eq!(
    result.combined_portion_description,
    format!("2 foods (~{}g)", pizza.portion_grams + banana.portion_grams)
  );
}

#[test]
fn concurrent_analyze_builds_each_model_once() {
  let manager = Arc::new(ModelManager::new(PipelineConfig {
    model_dir: PathBuf::from("/nonexistent/shanshi-models"),
    ..PipelineConfig::default()
  }));
  let analyzer = Arc::new(Analyzer::new(Arc::clone(&manager)));
  let bytes = Arc::new(encode_png(100, 100));

  let mut handles = Vec::new();
  for _ in 0..12 {
    let analyzer = Arc::clone(&analyzer);
    let bytes = Arc::clone(&bytes);
    handles.push(std::thread::spawn(move || {
      analyzer.analyze(&bytes, "en").map(|result| result.items.len())
    }));
  }
  for handle in handles {
    assert_eq!(handle.join().unwrap().unwrap(), 1);
  }

  assert_eq!(manager.detector_builds(), 1);
  assert_eq!(manager.classifier_builds(), 1);
}

#[test]
fn response_serialization_round_trip() {
  let analyzer = analyzer_without_artifacts();

  let ok = analyzer.analyze(&encode_png(100, 100), "en").unwrap();
  let json = serde_json::to_value(AnalysisResponse::from_result(&ok)).unwrap();
  assert_eq!(json["success"], true);
  assert_eq!(json["food_name"], "Food");
  assert!(json["confidence"].as_f64().unwrap() <= 0.95);

  let error = analyzer.analyze(&encode_png(10, 10), "en").unwrap_err();
  let json = serde_json::to_value(AnalysisResponse::from_error(&error)).unwrap();
  assert_eq!(json["success"], false);
  assert!(json["error"].as_str().unwrap().contains("50x50"));
}
