// 该文件是 Shucai （蔬菜识别） 项目的一部分。
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
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Shucai 蔬菜检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型地址，例如 onnx:///srv/models/best.onnx?intra_threads=4
  #[arg(long, value_name = "MODEL", default_value = "onnx:models/detection/best.onnx")]
  pub model: Url,

  /// 标签文件（JSON 字符串数组），缺省使用内置的蔬菜标签
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)，结果置信度必须严格大于该值
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 并行检测的工作线程数
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub jobs: usize,

  /// 启动时预先加载模型
  #[arg(long)]
  pub warm_up: bool,

  /// 待检测的图像文件
  #[arg(value_name = "IMAGE", required = true)]
  pub images: Vec<PathBuf>,
}
