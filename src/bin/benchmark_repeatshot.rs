// 该文件是 Shucai （蔬菜识别） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理性能测试
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use url::Url;

use shucai::{
  Detector, FromUrl,
  label::LabelTable,
  model::OnnxModelBuilder,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Shucai 性能测试参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 重复次数
  #[arg(long, value_name = "TIMES", default_value = "100")]
  pub times: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());

  let session = Arc::new(OnnxModelBuilder::from_url(&args.model)?.build());
  let detector = Detector::new(session, Arc::new(LabelTable::vegetables()));

  let result = RepeatShotTask::new(args.times).run_task(&detector, args.input.as_path());
  detector.release();

  let report = result?;
  info!(
    "共 {} 次推理, 每次 {} 个结果, 平均耗时: {:.2?}",
    report.iterations, report.detections, report.average
  );
  Ok(())
}
