// 该文件是 Shanshi （膳食） 项目的一部分。
// src/frame.rs - 图像解码、校验与张量布局
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

use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

/// 可接受的最小图像边长（像素）
pub const MIN_IMAGE_DIM: u32 = 50;

/// ImageNet 通道均值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 通道标准差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("image decoding error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("image too small: {width}x{height}, minimum is {min}x{min}", min = MIN_IMAGE_DIM)]
  TooSmall { width: u32, height: u32 },
}

/// 解码原始字节为 RGB 图像，并校验最小尺寸。
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, FrameError> {
  let image = image::load_from_memory(bytes)?.to_rgb8();
  let (width, height) = image.dimensions();
  if width < MIN_IMAGE_DIM || height < MIN_IMAGE_DIM {
    return Err(FrameError::TooSmall { width, height });
  }
  Ok(image)
}

/// 像素坐标下的边界框，满足 x1 < x2 且 y1 < y2，且不超出图像范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl BoundingBox {
  /// 由模型输出的浮点 xyxy 坐标构造边界框，裁剪到图像范围内。
  /// 退化（零面积）的框返回 None。
  pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Option<Self> {
    let x1 = x1.max(0.0).min(width as f32) as u32;
    let y1 = y1.max(0.0).min(height as f32) as u32;
    let x2 = x2.max(0.0).min(width as f32) as u32;
    let y2 = y2.max(0.0).min(height as f32) as u32;
    if x1 >= x2 || y1 >= y2 {
      return None;
    }
    Some(BoundingBox { x1, y1, x2, y2 })
  }

  /// 覆盖整幅图像的边界框。
  pub fn full(width: u32, height: u32) -> Self {
    BoundingBox {
      x1: 0,
      y1: 0,
      x2: width,
      y2: height,
    }
  }

  pub fn width(&self) -> u32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> u32 {
    self.y2 - self.y1
  }
}

/// 按边界框裁剪出独立的子图像（不与原图共享内存）。
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> RgbImage {
  image::imageops::crop_imm(image, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image()
}

/// RGB 图像转 NCHW 浮点张量，像素缩放到 [0, 1]。
pub fn to_nchw_scaled(image: &RgbImage) -> Array4<f32> {
  let (width, height) = image.dimensions();
  Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
    image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
  })
}

/// RGB 图像转 NCHW 浮点张量，并按 ImageNet 均值/标准差归一化。
pub fn to_nchw_imagenet(image: &RgbImage) -> Array4<f32> {
  let (width, height) = image.dimensions();
  Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
    let value = image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
    (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn solid_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([128, 64, 32]))
  }

  fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image.clone())
      .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decode_rejects_tiny_image() {
    let bytes = encode_png(&solid_image(10, 10));
    match decode_rgb(&bytes) {
      Err(FrameError::TooSmall { width, height }) => {
        assert_eq!((width, height), (10, 10));
      }
      other => panic!("expected TooSmall, got {other:?}"),
    }
  }

  #[test]
  fn decode_rejects_garbage_bytes() {
    assert!(matches!(
      decode_rgb(b"not an image"),
      Err(FrameError::DecodeError(_))
    ));
  }

  #[test]
  fn decode_accepts_minimum_size() {
    let bytes = encode_png(&solid_image(50, 50));
    let image = decode_rgb(&bytes).unwrap();
    assert_eq!(image.dimensions(), (50, 50));
  }

  #[test]
  fn bbox_clamps_to_image_bounds() {
    let bbox = BoundingBox::from_xyxy(-10.0, -5.0, 700.0, 500.0, 640, 480).unwrap();
    assert_eq!(bbox, BoundingBox::full(640, 480));
  }

  #[test]
  fn bbox_rejects_degenerate_box() {
    assert!(BoundingBox::from_xyxy(100.0, 100.0, 100.0, 200.0, 640, 480).is_none());
    assert!(BoundingBox::from_xyxy(700.0, 100.0, 800.0, 200.0, 640, 480).is_none());
  }

  #[test]
  fn crop_is_an_independent_copy() {
    let image = solid_image(100, 100);
    let bbox = BoundingBox::from_xyxy(10.0, 20.0, 60.0, 80.0, 100, 100).unwrap();
    let mut cropped = crop(&image, &bbox);
    assert_eq!(cropped.dimensions(), (50, 60));
    cropped.put_pixel(0, 0, Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(10, 20), &Rgb([128, 64, 32]));
  }

  #[test]
  fn nchw_layout_matches_pixels() {
    let mut image = solid_image(50, 50);
    image.put_pixel(3, 2, Rgb([255, 0, 0]));
    let tensor = to_nchw_scaled(&image);
    assert_eq!(tensor.shape(), &[1, 3, 50, 50]);
    assert!((tensor[[0, 0, 2, 3]] - 1.0).abs() < f32::EPSILON);
    assert!(tensor[[0, 1, 2, 3]].abs() < f32::EPSILON);
  }
}
