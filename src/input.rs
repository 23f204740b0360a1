// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/input.rs - 图像输入与预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use image::{DynamicImage, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{DETECTOR_INPUT_H, DETECTOR_INPUT_W, RgbNchwTensor};

mod read_image_file;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("I/O 错误 ({path}): {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
}

/// 待检测图像的来源
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
  Path(&'a Path),
  Bytes(&'a [u8]),
}

impl<'a> From<&'a Path> for ImageSource<'a> {
  fn from(path: &'a Path) -> Self {
    ImageSource::Path(path)
  }
}

impl<'a> From<&'a [u8]> for ImageSource<'a> {
  fn from(bytes: &'a [u8]) -> Self {
    ImageSource::Bytes(bytes)
  }
}

/// 将任意尺寸图像缩放为 `W x H`，并转换为归一化的 NCHW 张量
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor<const W: u32, const H: u32> {
  filter: FilterType,
}

pub type DetectorPreprocessor = ImagePreprocessor<DETECTOR_INPUT_W, DETECTOR_INPUT_H>;

impl<const W: u32, const H: u32> Default for ImagePreprocessor<W, H> {
  fn default() -> Self {
    Self {
      filter: FilterType::Lanczos3,
    }
  }
}

impl<const W: u32, const H: u32> ImagePreprocessor<W, H> {
  pub fn filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn preprocess(&self, source: ImageSource<'_>) -> Result<RgbNchwTensor<W, H>, PreprocessError> {
    let image = read_image_file::decode(source)?;
    Ok(self.preprocess_image(&image))
  }

  pub fn preprocess_path<P: AsRef<Path>>(
    &self,
    path: P,
  ) -> Result<RgbNchwTensor<W, H>, PreprocessError> {
    self.preprocess(ImageSource::Path(path.as_ref()))
  }

  pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<RgbNchwTensor<W, H>, PreprocessError> {
    self.preprocess(ImageSource::Bytes(bytes))
  }

  /// 丢弃 alpha 通道，直接拉伸到目标尺寸（不保持宽高比）
  pub fn preprocess_image(&self, image: &DynamicImage) -> RgbNchwTensor<W, H> {
    debug!(
      "预处理图像: {}x{} -> {}x{}",
      image.width(),
      image.height(),
      W,
      H
    );
    let rgb = image.to_rgb8();
    let resized = if rgb.dimensions() == (W, H) {
      rgb
    } else {
      image::imageops::resize(&rgb, W, H, self.filter)
    };
    RgbNchwTensor::from(resized)
  }
}

impl<const W: u32, const H: u32> From<RgbImage> for RgbNchwTensor<W, H> {
  /// 图像尺寸必须为 `W x H`，由 [`ImagePreprocessor`] 保证
  fn from(image: RgbImage) -> Self {
    debug_assert_eq!(image.dimensions(), (W, H));

    let plane = Self::PLANE;
    let mut tensor = Self::default();
    let slice = tensor.as_mut();

    for (i, pixel) in image.pixels().enumerate().take(plane) {
      slice[i] = f32::from(pixel[0]) / 255.0;
      slice[i + plane] = f32::from(pixel[1]) / 255.0;
      slice[i + 2 * plane] = f32::from(pixel[2]) / 255.0;
    }
    tensor
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{AsNchwTensor, DetectorInput};
  use image::{ImageFormat, Rgb, Rgba, RgbaImage};
  use std::io::Cursor;

  fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
  }

  #[test]
  fn output_has_detector_shape_and_range() {
    let image = RgbImage::from_fn(317, 91, |x, y| Rgb([(x % 256) as u8, (y * 2) as u8, 200]));
    let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);

    let tensor: DetectorInput = DetectorPreprocessor::default()
      .preprocess_bytes(&bytes)
      .unwrap();

    assert_eq!(tensor.shape(), [1, 3, 224, 224]);
    assert_eq!(tensor.as_nchw().len(), 3 * 224 * 224);
    assert!(tensor.as_nchw().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn first_plane_comes_from_red_channel() {
    let image = RgbImage::from_pixel(50, 80, Rgb([255, 0, 51]));
    let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);

    let tensor = DetectorPreprocessor::default()
      .filter(FilterType::Nearest)
      .preprocess_bytes(&bytes)
      .unwrap();

    assert!(tensor.plane(0).iter().all(|&v| v == 1.0));
    assert!(tensor.plane(1).iter().all(|&v| v == 0.0));
    assert!(tensor.plane(2).iter().all(|&v| (v - 0.2).abs() < 1e-6));
  }

  #[test]
  fn alpha_channel_is_dropped() {
    let image = RgbaImage::from_pixel(224, 224, Rgba([10, 20, 30, 0]));
    let tensor = DetectorPreprocessor::default().preprocess_image(&DynamicImage::ImageRgba8(image));

    assert_eq!(tensor.plane(0)[0], 10.0 / 255.0);
    assert_eq!(tensor.plane(1)[0], 20.0 / 255.0);
    assert_eq!(tensor.plane(2)[0], 30.0 / 255.0);
  }

  #[test]
  fn pixel_order_is_row_major() {
    let image = RgbImage::from_fn(224, 224, |x, y| {
      if (x, y) == (3, 1) {
        Rgb([255, 255, 255])
      } else {
        Rgb([0, 0, 0])
      }
    });
    let tensor = DetectorPreprocessor::default().preprocess_image(&DynamicImage::ImageRgb8(image));

    let index = 224 + 3;
    for c in 0..3 {
      assert_eq!(tensor.plane(c)[index], 1.0);
      assert_eq!(tensor.plane(c).iter().filter(|&&v| v > 0.0).count(), 1);
    }
  }

  #[test]
  fn corrupt_bytes_are_rejected() {
    let result = DetectorPreprocessor::default().preprocess_bytes(b"definitely not an image");
    assert!(matches!(result, Err(PreprocessError::DecodeError(_))));
  }

  #[test]
  fn missing_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = DetectorPreprocessor::default().preprocess_path(dir.path().join("missing.jpg"));
    assert!(matches!(result, Err(PreprocessError::IoError { .. })));
  }

  #[test]
  fn format_is_sniffed_without_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload-7f3a");
    let image = RgbImage::from_pixel(30, 30, Rgb([0, 255, 0]));
    std::fs::write(&path, encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)).unwrap();

    let tensor = DetectorPreprocessor::default().preprocess_path(&path).unwrap();
    assert!(tensor.plane(1).iter().all(|&v| v > 0.9));
  }
}
