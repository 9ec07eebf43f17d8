// 该文件是 Shanshi （膳食） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;

/// Shanshi 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待分析的餐食照片路径
  /// 支持格式: *.jpg, *.jpeg, *.png, *.bmp, *.gif, *.webp
  #[arg(value_name = "IMAGE")]
  pub image: PathBuf,

  /// ONNX 模型工件目录
  /// 目录中缺少专用模型时自动退化到通用模型或无模型模式
  #[arg(long, default_value = "models", value_name = "DIR")]
  pub models: PathBuf,

  /// 展示名语言代码 (en / zh)
  #[arg(long, default_value = "en", value_name = "LANG")]
  pub language: String,

  /// 检测置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 以缩进格式输出 JSON
  #[arg(long)]
  pub pretty: bool,
}
