// 该文件是 Shucai （蔬菜识别） 项目的一部分。
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
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod args;

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use shucai::{
  Detector, FromUrl,
  label::LabelTable,
  model::{DetectionDecoder, OnnxModelBuilder},
  task::{OneShotTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("图像数量: {}", args.images.len());
  info!("置信度阈值: {}", args.confidence);

  let labels = match &args.labels {
    Some(path) => LabelTable::from_json_file(path)?,
    None => LabelTable::vegetables(),
  };
  let labels = Arc::new(labels);
  let session = Arc::new(OnnxModelBuilder::from_url(&args.model)?.build());
  let detector = Detector::new(session, Arc::clone(&labels))
    .decoder(DetectionDecoder::new(labels).threshold(args.confidence));

  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
      warn!("收到中断信号，停止领取新的图像...");
      stop.store(true, Ordering::SeqCst);
    })?;
  }

  if args.warm_up {
    detector.warm_up()?;
  }

  let reports = OneShotTask::default()
    .with_jobs(args.jobs)
    .with_stop(Arc::clone(&stop))
    .run_task(&detector, args.images)?;
  detector.release();

  for report in &reports {
    println!("{}", serde_json::to_string(report)?);
  }

  let failed = reports.iter().filter(|r| !r.is_ok()).count();
  info!("处理完成: {} 张成功, {} 张失败", reports.len() - failed, failed);
  if failed > 0 {
    anyhow::bail!("{} 张图像检测失败", failed);
  }
  Ok(())
}
