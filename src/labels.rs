// 该文件是 Shanshi （膳食） 项目的一部分。
// src/labels.rs - 类别标签与展示名映射
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
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

/// 规范键到各语言展示名的映射，编译期内嵌，进程内只解析一次。
static DISPLAY_NAMES: OnceLock<HashMap<String, DisplayEntry>> = OnceLock::new();

const DISPLAY_NAMES_JSON: &str = include_str!("../data/display_names.json");

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayEntry {
  pub en: String,
  #[serde(default)]
  pub zh: Option<String>,
}

fn display_names() -> &'static HashMap<String, DisplayEntry> {
  DISPLAY_NAMES.get_or_init(|| match serde_json::from_str(DISPLAY_NAMES_JSON) {
    Ok(map) => map,
    Err(e) => {
      warn!("展示名映射解析失败，回退到标题化规范键: {}", e);
      HashMap::new()
    }
  })
}

/// 查询某个规范键在指定语言下的展示名。
/// 未收录的语言回退到英文，未收录的键回退到标题化的规范键。
pub fn display_name(canonical_key: &str, language: &str) -> String {
  match display_names().get(canonical_key) {
    Some(entry) => match language {
      "zh" => entry.zh.clone().unwrap_or_else(|| entry.en.clone()),
      _ => entry.en.clone(),
    },
    None => title_case(canonical_key),
  }
}

/// 标题化规范键："fried_rice" → "Fried Rice"。
pub fn title_case(key: &str) -> String {
  key
    .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
    .filter(|word| !word.is_empty())
    .map(|word| {
      let mut chars = word.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
      }
    })
    .collect::<Vec<_>>()
    .join(" ")
}

/// 解析模型工件旁的标签文件路径：`<model>.labels.txt`。
fn sidecar_path(model_path: &Path) -> PathBuf {
  model_path.with_extension("labels.txt")
}

/// 读取模型旁路标签文件，每行一个类别名，忽略空行与 `#` 注释。
/// 文件缺失或为空时返回 None，由调用方决定回退标签。
pub fn load_sidecar(model_path: &Path) -> Option<Vec<String>> {
  let path = sidecar_path(model_path);
  let contents = match std::fs::read_to_string(&path) {
    Ok(contents) => contents,
    Err(_) => {
      warn!("未找到标签文件: {}", path.display());
      return None;
    }
  };
  let labels: Vec<String> = contents
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && !line.starts_with('#'))
    .map(str::to_string)
    .collect();
  if labels.is_empty() {
    warn!("标签文件为空: {}", path.display());
    return None;
  }
  Some(labels)
}
