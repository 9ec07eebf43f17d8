// 该文件是 Shanshi （膳食） 项目的一部分。
// src/device.rs - 推理设备探测与会话构建
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

use ort::{GraphOptimizationLevel, Session, SessionBuilder};
use tracing::debug;

/// 推理所用的计算设备，按优先级在进程内探测一次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cuda,
  CoreMl,
  Cpu,
}

impl std::fmt::Display for Device {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Device::Cuda => write!(f, "CUDA"),
      Device::CoreMl => write!(f, "CoreML"),
      Device::Cpu => write!(f, "CPU"),
    }
  }
}

/// 按 独立 GPU → 集成加速器 → CPU 的顺序探测可用设备。
/// 探测失败不视为错误，静默回退到 CPU。
pub fn probe() -> Device {
  #[cfg(feature = "cuda")]
  {
    use ort::{CUDAExecutionProvider, ExecutionProvider};
    match CUDAExecutionProvider::default().is_available() {
      Ok(true) => {
        debug!("CUDA 可用");
        return Device::Cuda;
      }
      Ok(false) => debug!("CUDA 不可用"),
      Err(e) => tracing::warn!("CUDA 探测失败: {}", e),
    }
  }
  #[cfg(feature = "coreml")]
  {
    use ort::{CoreMLExecutionProvider, ExecutionProvider};
    match CoreMLExecutionProvider::default().is_available() {
      Ok(true) => {
        debug!("CoreML 可用");
        return Device::CoreMl;
      }
      Ok(false) => debug!("CoreML 不可用"),
      Err(e) => tracing::warn!("CoreML 探测失败: {}", e),
    }
  }
  debug!("使用 CPU 推理");
  Device::Cpu
}

/// 构建绑定到指定设备的 ONNX Runtime 会话构建器。
/// 注册执行提供者失败时记录警告并回退到默认 CPU 执行。
pub fn session_builder(device: Device) -> ort::Result<SessionBuilder> {
  let builder = Session::builder()?
    .with_optimization_level(GraphOptimizationLevel::Level3)?
    .with_intra_threads(2)?;

  match device {
    #[cfg(feature = "cuda")]
    Device::Cuda => {
      use ort::CUDAExecutionProvider;
      match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
        Ok(builder) => Ok(builder),
        Err(e) => {
          tracing::warn!("注册 CUDA 执行提供者失败，回退到 CPU: {}", e);
          session_builder(Device::Cpu)
        }
      }
    }
    #[cfg(feature = "coreml")]
    Device::CoreMl => {
      use ort::CoreMLExecutionProvider;
      match builder.with_execution_providers([CoreMLExecutionProvider::default().build()]) {
        Ok(builder) => Ok(builder),
        Err(e) => {
          tracing::warn!("注册 CoreML 执行提供者失败，回退到 CPU: {}", e);
          session_builder(Device::Cpu)
        }
      }
    }
    _ => Ok(builder),
  }
}
