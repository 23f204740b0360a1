// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取与解码
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

use std::io::Cursor;

use image::{DynamicImage, ImageReader};
use tracing::{debug, error};

use super::{ImageSource, PreprocessError};

/// 按内容识别图像格式，上传的临时文件通常没有扩展名
pub(super) fn decode(source: ImageSource<'_>) -> Result<DynamicImage, PreprocessError> {
  match source {
    ImageSource::Path(path) => {
      debug!("读取图像文件: {}", path.display());
      let io_error = |source| PreprocessError::IoError {
        path: path.display().to_string(),
        source,
      };
      let image = ImageReader::open(path)
        .map_err(io_error)?
        .with_guessed_format()
        .map_err(io_error)?
        .decode()
        .inspect_err(|e| error!("无法解码图像文件 {}: {}", path.display(), e))?;
      Ok(image)
    }
    ImageSource::Bytes(bytes) => {
      debug!("解码图像数据: {} 字节", bytes.len());
      let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|source| PreprocessError::IoError {
          path: "<memory>".to_string(),
          source,
        })?
        .decode()
        .inspect_err(|e| error!("无法解码图像数据: {}", e))?;
      Ok(image)
    }
  }
}
