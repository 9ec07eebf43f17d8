// 该文件是 Shanshi （膳食） 项目的一部分。
// src/nutrition.rs - 营养知识库
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

use std::collections::HashMap;

use serde::Deserialize;

const NUTRITION_DB_JSON: &str = include_str!("../data/nutrition_db.json");

/// 一条营养记录：规范食物名到热量/宏量营养素/份量的映射。
/// 静态参考数据，进程启动时加载一次，请求期间只读。
#[derive(Debug, Clone, Deserialize)]
pub struct NutritionRecord {
  pub food_name: String,
  pub calories: u32,
  pub protein_g: f32,
  pub carbs_g: f32,
  pub fat_g: f32,
  pub portion_grams: u32,
  pub portion_description: String,
  pub match_confidence: f32,
}

/// 按规范食物名索引的营养知识库。
pub struct NutritionDb {
  records: HashMap<String, NutritionRecord>,
}

impl NutritionDb {
  /// 加载编译期内嵌的知识库。内嵌数据损坏属于构建错误，直接终止。
  pub fn embedded() -> Self {
    Self::from_json(NUTRITION_DB_JSON).expect("内嵌营养数据损坏")
  }

  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    let list: Vec<NutritionRecord> = serde_json::from_str(json)?;
    let records = list
      .into_iter()
      .map(|record| (record.food_name.clone(), record))
      .collect();
    Ok(NutritionDb { records })
  }

  /// 查询一条记录：先精确匹配规范键，再匹配归一化变体。
  pub fn lookup(&self, key: &str) -> Option<&NutritionRecord> {
    if let Some(record) = self.records.get(key) {
      return Some(record);
    }
    self.records.get(&normalize_key(key))
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

/// 键归一化：小写、下划线/连字符替换为空格、压缩连续空白。
pub fn normalize_key(key: &str) -> String {
  key
    .to_lowercase()
    .replace(['_', '-'], " ")
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}
