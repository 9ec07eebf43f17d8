// 该文件是 Shanshi （膳食） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shanshi::manager::{ModelManager, PipelineConfig};
use shanshi::pipeline::{Analyzer, AnalysisResponse};

fn main() -> Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let args = args::Args::parse();

  let manager = Arc::new(ModelManager::new(PipelineConfig {
    model_dir: args.models.clone(),
    confidence_threshold: args.confidence,
    nms_threshold: args.nms_threshold,
  }));

  // 启动时主动加载模型，避免首次分析承担加载延迟
  let load_start = Instant::now();
  manager.preload_all();
  info!(
    "模型预加载完成，耗时 {:.1} ms（检测: {}，分类: {}）",
    load_start.elapsed().as_secs_f64() * 1000.0,
    manager.detector().mode(),
    manager.classifier().mode()
  );

  let image_bytes = std::fs::read(&args.image)
    .with_context(|| format!("无法读取图像文件: {}", args.image.display()))?;

  let analyzer = Analyzer::new(manager);
  let analyze_start = Instant::now();
  let outcome = analyzer.analyze(&image_bytes, &args.language);
  info!(
    "分析耗时 {:.1} ms",
    analyze_start.elapsed().as_secs_f64() * 1000.0
  );

  let (response, exit_code) = match &outcome {
    Ok(result) => (AnalysisResponse::from_result(result), ExitCode::SUCCESS),
    Err(error) => (AnalysisResponse::from_error(error), ExitCode::FAILURE),
  };

  let json = if args.pretty {
    serde_json::to_string_pretty(&response)?
  } else {
    serde_json::to_string(&response)?
  };
  println!("{json}");

  Ok(exit_code)
}
