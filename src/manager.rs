// 该文件是 Shanshi （膳食） 项目的一部分。
// src/manager.rs - 模型生命周期管理
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
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::classify::Classifier;
use crate::detect::{self, Detector};
use crate::device::{self, Device};

/// 管线配置：模型工件目录与检测阈值。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub model_dir: PathBuf,
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    PipelineConfig {
      model_dir: PathBuf::from("models"),
      confidence_threshold: detect::DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: detect::DEFAULT_NMS_THRESHOLD,
    }
  }
}

/// 进程级模型持有者：每个模型至多构造一次，构造后只读共享。
/// 以显式服务对象的形式注入编排器，而非语言级全局状态，
/// 便于测试替换假模型。
pub struct ModelManager {
  config: PipelineConfig,
  device: OnceLock<Device>,
  detector: OnceLock<Arc<Detector>>,
  classifier: OnceLock<Arc<Classifier>>,
  detector_builds: AtomicUsize,
  classifier_builds: AtomicUsize,
}

impl ModelManager {
  pub fn new(config: PipelineConfig) -> Self {
    ModelManager {
      config,
      device: OnceLock::new(),
      detector: OnceLock::new(),
      classifier: OnceLock::new(),
      detector_builds: AtomicUsize::new(0),
      classifier_builds: AtomicUsize::new(0),
    }
  }

  /// 以预构建的模型实例组装管理器，跳过工件探测与懒加载。
  /// 供测试注入替身模型。
  pub fn with_models(detector: Detector, classifier: Classifier) -> Self {
    let manager = ModelManager::new(PipelineConfig::default());
    let _ = manager.detector.set(Arc::new(detector));
    let _ = manager.classifier.set(Arc::new(classifier));
    manager
  }

  /// 首次调用时探测一次计算设备，此后复用。
  pub fn device(&self) -> Device {
    *self.device.get_or_init(|| {
      let device = device::probe();
      info!("选定推理设备: {}", device);
      device
    })
  }

  /// 返回进程内唯一的检测器实例。并发首次触达时只构造一次。
  pub fn detector(&self) -> Arc<Detector> {
    self
      .detector
      .get_or_init(|| {
        self.detector_builds.fetch_add(1, Ordering::SeqCst);
        let detector = Detector::load(
          &self.config.model_dir,
          self.device(),
          self.config.confidence_threshold,
          self.config.nms_threshold,
        );
        info!("检测器就绪（{} 模式）", detector.mode());
        Arc::new(detector)
      })
      .clone()
  }

  /// 返回进程内唯一的分类器实例。并发首次触达时只构造一次。
  pub fn classifier(&self) -> Arc<Classifier> {
    self
      .classifier
      .get_or_init(|| {
        self.classifier_builds.fetch_add(1, Ordering::SeqCst);
        let classifier = Classifier::load(&self.config.model_dir, self.device());
        info!("分类器就绪（{} 模式）", classifier.mode());
        Arc::new(classifier)
      })
      .clone()
  }

  /// 进程启动时主动构造全部模型，避免首个用户请求承担加载延迟。
  pub fn preload_all(&self) {
    let _ = self.detector();
    let _ = self.classifier();
  }

  /// 检测器实际构造次数（测试观测用）。
  pub fn detector_builds(&self) -> usize {
    self.detector_builds.load(Ordering::SeqCst)
  }

  /// 分类器实际构造次数（测试观测用）。
  pub fn classifier_builds(&self) -> usize {
    self.classifier_builds.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn manager_without_artifacts() -> ModelManager {
    ModelManager::new(PipelineConfig {
      model_dir: PathBuf::from("/nonexistent/shanshi-models"),
      ..PipelineConfig::default()
    })
  }

  #[test]
  fn accessors_return_the_same_instance() {
    let manager = manager_without_artifacts();
    let first = manager.detector();
    let second = manager.detector();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.detector_builds(), 1);
  }

  #[test]
  fn preload_builds_each_model_once() {
    let manager = manager_without_artifacts();
    manager.preload_all();
    manager.preload_all();
    assert_eq!(manager.detector_builds(), 1);
    assert_eq!(manager.classifier_builds(), 1);
  }

  #[test]
  fn missing_artifacts_fall_back_instead_of_failing() {
    let manager = manager_without_artifacts();
    assert_eq!(manager.detector().mode(), "whole-image");
    assert_eq!(manager.classifier().mode(), "fallback");
  }

  #[test]
  fn injected_models_bypass_lazy_construction() {
    use crate::classify::ClassifierStrategy;
    use crate::detect::DetectorStrategy;

    let manager = ModelManager::with_models(
      Detector::from_strategy(DetectorStrategy::Scripted(Vec::new())),
      Classifier::from_strategy(ClassifierStrategy::Fallback),
    );
    assert_eq!(manager.detector().mode(), "scripted");
    assert_eq!(manager.classifier().mode(), "fallback");
    assert_eq!(manager.detector_builds(), 0);
    assert_eq!(manager.classifier_builds(), 0);
  }

  #[test]
  fn concurrent_first_touch_builds_exactly_once() {
    let manager = Arc::new(manager_without_artifacts());
    let mut handles = Vec::new();
    for _ in 0..16 {
      let manager = Arc::clone(&manager);
      handles.push(std::thread::spawn(move || {
        let detector = manager.detector();
        let classifier = manager.classifier();
        (detector.mode(), classifier.mode())
      }));
    }
    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(manager.detector_builds(), 1);
    assert_eq!(manager.classifier_builds(), 1);
  }
}
