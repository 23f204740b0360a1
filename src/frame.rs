// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/frame.rs - NCHW 张量定义
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

use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// 模型输入的宽度与高度
pub const DETECTOR_INPUT_W: u32 = 224;
pub const DETECTOR_INPUT_H: u32 = 224;

/// 检测模型的输入张量
pub type DetectorInput = RgbNchwTensor<DETECTOR_INPUT_W, DETECTOR_INPUT_H>;

pub trait AsNchwTensor {
  /// `[N, C, H, W]`
  fn shape(&self) -> [usize; 4];
  fn as_nchw(&self) -> &[f32];
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 通道平面排列的归一化 RGB 张量，形状为 `[1, 3, H, W]`
///
/// 先存放全部 R 值，随后是全部 G 值与全部 B 值。
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNchwTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> RgbNchwTensor<W, H> {
  pub const PLANE: usize = W as usize * H as usize;
  pub const LEN: usize = RGB_CHANNELS * Self::PLANE;

  /// 第 `c` 个通道的平面数据
  pub fn plane(&self, c: usize) -> &[f32] {
    &self.data[c * Self::PLANE..(c + 1) * Self::PLANE]
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for RgbNchwTensor<W, H> {
  type Error = TensorError;

  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    if data.len() != Self::LEN {
      return Err(TensorError::LengthMismatch {
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNchwTensor<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0.0; Self::LEN].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for RgbNchwTensor<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNchwTensor for RgbNchwTensor<W, H> {
  fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, H as usize, W as usize]
  }

  fn as_nchw(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detector_input_shape() {
    let tensor = DetectorInput::default();
    assert_eq!(tensor.shape(), [1, 3, 224, 224]);
    assert_eq!(tensor.as_nchw().len(), 3 * 224 * 224);
  }

  #[test]
  fn rejects_wrong_length() {
    let err = RgbNchwTensor::<4, 2>::try_from(vec![0.0; 23]).unwrap_err();
    assert_eq!(
      err,
      TensorError::LengthMismatch {
        expected: 24,
        actual: 23
      }
    );
  }

  #[test]
  fn planes_split_by_channel() {
    let data = (0..24).map(|v| v as f32).collect::<Vec<_>>();
    let tensor = RgbNchwTensor::<4, 2>::try_from(data).unwrap();
    assert_eq!(tensor.plane(0), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!(tensor.plane(2)[0], 16.0);
  }
}
