// 该文件是 RT-DETR Live 项目的一部分。
// src/task.rs - 流式检测任务循环
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 RT-DETR Live Developers

//! 任务循环：采集 → 推理 → 解码 → 渲染 → 检查停止信号
//!
//! 状态迁移为 `Idle → Connected → Running → (Stopped | Faulted)`。
//! 任何退出路径上视频源与渲染器都会先被关闭，然后才返回结果或错误。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, sync_channel},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  frame::Frame,
  input::VideoSource,
  model::{Decode, DecodeError, Detection, Model},
  output::Render,
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 第二次中断信号之后强制退出前的等待时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);
const DEFAULT_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Idle,
  Connected,
  Running,
  Stopped,
  Faulted,
}

fn transition(from: LoopState, to: LoopState) {
  debug!("任务状态: {:?} -> {:?}", from, to);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 视频源报告流结束
  EndOfStream,
  /// 中断信号或渲染器请求停止
  UserStop,
  /// 达到指定帧数
  FrameLimit,
}

/// 协作式停止信号，每轮循环末尾检查一次
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 注册 Ctrl-C 处理：第一次置位停止信号，
  /// 若循环迟迟不退出，再次中断后等待一段时间强制结束进程。
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let flag = self.0.clone();
    ctrlc::set_handler(move || {
      if flag.swap(true, Ordering::SeqCst) {
        warn!("再次收到中断信号，{:?} 后强制退出", FORCE_EXIT_AFTER);
        thread::spawn(|| {
          thread::sleep(FORCE_EXIT_AFTER);
          warn!("强制退出程序");
          std::process::exit(1);
        });
      } else {
        info!("收到中断信号，准备退出...");
      }
    })
  }
}

/// 每帧推理+后处理耗时统计
#[derive(Debug, Clone, Default)]
pub struct LatencyStats {
  count: u64,
  total: Duration,
  min: Option<Duration>,
  max: Duration,
}

impl LatencyStats {
  pub fn record(&mut self, elapsed: Duration) {
    self.count += 1;
    self.total += elapsed;
    self.min = Some(self.min.map_or(elapsed, |m| m.min(elapsed)));
    self.max = self.max.max(elapsed);
  }

  pub fn count(&self) -> u64 {
    self.count
  }

  pub fn mean(&self) -> Option<Duration> {
    (self.count > 0).then(|| Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64))
  }

  pub fn min(&self) -> Option<Duration> {
    self.min
  }

  pub fn max(&self) -> Option<Duration> {
    (self.count > 0).then_some(self.max)
  }
}

#[derive(Debug, Clone)]
pub enum LoopOutcome {
  Stopped {
    reason: StopReason,
    frames: u64,
    stats: LatencyStats,
  },
  Faulted {
    reason: String,
    frames: u64,
    stats: LatencyStats,
  },
}

impl LoopOutcome {
  pub fn state(&self) -> LoopState {
    match self {
      LoopOutcome::Stopped { .. } => LoopState::Stopped,
      LoopOutcome::Faulted { .. } => LoopState::Faulted,
    }
  }

  pub fn frames(&self) -> u64 {
    match self {
      LoopOutcome::Stopped { frames, .. } | LoopOutcome::Faulted { frames, .. } => *frames,
    }
  }

  pub fn stats(&self) -> &LatencyStats {
    match self {
      LoopOutcome::Stopped { stats, .. } | LoopOutcome::Faulted { stats, .. } => stats,
    }
  }
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("连接视频源失败: {0}")]
  Connection(#[source] BoxError),
  #[error("配置错误: {0}")]
  Configuration(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(#[source] BoxError),
  #[error("渲染失败: {0}")]
  Render(#[source] BoxError),
}

/// 一个任务负责驱动已连接的视频源，直到停止或出错
pub trait Task {
  /// 只跑循环本身，不负责释放资源
  fn run_loop<S, M, R>(
    &self,
    source: &mut S,
    model: &M,
    renderer: &mut R,
  ) -> Result<LoopOutcome, TaskError>
  where
    S: VideoSource + Send,
    M: Model,
    R: Render;

  /// 运行已打开的视频源；无论结果如何，返回前关闭视频源与渲染器
  fn run<S, M, R>(
    &self,
    source: &mut S,
    model: &M,
    renderer: &mut R,
  ) -> Result<LoopOutcome, TaskError>
  where
    S: VideoSource + Send,
    M: Model,
    R: Render,
  {
    transition(LoopState::Connected, LoopState::Running);
    let result = self.run_loop(source, model, renderer);
    source.close();
    renderer.close();

    match &result {
      Ok(outcome) => {
        transition(LoopState::Running, outcome.state());
        report(outcome);
      }
      Err(e) => {
        transition(LoopState::Running, LoopState::Faulted);
        error!("任务异常结束: {}", e);
      }
    }
    result
  }

  /// 打开 `url` 指向的视频源并运行；打开失败时不重试
  fn run_task<S, M, R>(&self, url: &Url, model: &M, renderer: &mut R) -> Result<LoopOutcome, TaskError>
  where
    S: VideoSource + Send,
    M: Model,
    R: Render,
  {
    info!("连接视频源: {}", url);
    match S::open(url) {
      Ok(mut source) => {
        transition(LoopState::Idle, LoopState::Connected);
        self.run(&mut source, model, renderer)
      }
      Err(e) => {
        error!("无法打开视频源 {}: {}", url, e);
        renderer.close();
        Err(TaskError::Connection(Box::new(e)))
      }
    }
  }
}

fn report(outcome: &LoopOutcome) {
  let stats = outcome.stats();
  match outcome {
    LoopOutcome::Stopped { reason, frames, .. } => {
      info!("任务停止 ({:?})，共处理 {} 帧", reason, frames)
    }
    LoopOutcome::Faulted { reason, frames, .. } => {
      warn!("视频流故障: {}，共处理 {} 帧", reason, frames)
    }
  }
  if let (Some(mean), Some(min), Some(max)) = (stats.mean(), stats.min(), stats.max()) {
    info!(
      "推理+后处理耗时 平均 {:.2?} / 最小 {:.2?} / 最大 {:.2?}",
      mean, min, max
    );
  }
}

/// 单帧处理：推理 + 解码，返回检测结果和耗时
fn infer_and_decode<M: Model, D: Decode>(
  model: &M,
  decoder: &D,
  frame: &Frame,
) -> Result<(Vec<Detection>, Duration), TaskError> {
  let t0 = Instant::now();
  let output = model
    .infer(frame)
    .map_err(|e| TaskError::Inference(Box::new(e)))?;
  let detections = decoder.decode(
    &output.outputs,
    model.input_size(),
    &output.lb,
    (output.orig_w, output.orig_h),
  )?;
  Ok((detections, t0.elapsed()))
}

/// 顺序执行的任务循环
#[derive(Debug)]
pub struct ContinuousTask<D> {
  decoder: D,
  stop: StopSignal,
  frame_limit: Option<u64>,
}

impl<D: Decode> ContinuousTask<D> {
  pub fn new(decoder: D) -> Self {
    Self {
      decoder,
      stop: StopSignal::default(),
      frame_limit: None,
    }
  }

  pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = stop;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn stop_signal(&self) -> &StopSignal {
    &self.stop
  }

  /// 两种任务共用的循环体，`next_frame` 提供帧来源
  fn drive<M, R>(
    &self,
    mut next_frame: impl FnMut() -> Result<Option<Frame>, String>,
    model: &M,
    renderer: &mut R,
  ) -> Result<LoopOutcome, TaskError>
  where
    M: Model,
    R: Render,
  {
    let mut frames = 0u64;
    let mut stats = LatencyStats::default();

    loop {
      let frame = match next_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          info!("视频流结束");
          return Ok(LoopOutcome::Stopped {
            reason: StopReason::EndOfStream,
            frames,
            stats,
          });
        }
        Err(reason) => {
          error!("读取帧失败: {}", reason);
          return Ok(LoopOutcome::Faulted {
            reason,
            frames,
            stats,
          });
        }
      };

      let (detections, elapsed) = infer_and_decode(model, &self.decoder, &frame)?;
      renderer
        .render_result(&frame, &detections, elapsed)
        .map_err(|e| TaskError::Render(Box::new(e)))?;

      frames += 1;
      stats.record(elapsed);
      info!(
        "第 {} 帧: {} 个目标, 耗时 {:.2?}",
        frame.index(),
        detections.len(),
        elapsed
      );

      if self.frame_limit.is_some_and(|n| frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frames);
        return Ok(LoopOutcome::Stopped {
          reason: StopReason::FrameLimit,
          frames,
          stats,
        });
      }
      if self.stop.is_stopped() || renderer.stop_requested() {
        warn!("收到停止请求，退出任务循环");
        return Ok(LoopOutcome::Stopped {
          reason: StopReason::UserStop,
          frames,
          stats,
        });
      }
    }
  }
}

impl<D: Decode> Task for ContinuousTask<D> {
  fn run_loop<S, M, R>(
    &self,
    source: &mut S,
    model: &M,
    renderer: &mut R,
  ) -> Result<LoopOutcome, TaskError>
  where
    S: VideoSource + Send,
    M: Model,
    R: Render,
  {
    self.drive(|| source.read().map_err(|e| e.to_string()), model, renderer)
  }
}

/// 采集线程与处理线程分离的任务循环
///
/// 采集线程通过有界通道把帧按顺序交给处理线程；处理端退出后通道关闭，
/// 采集线程在当前一次 `read` 返回后结束。
#[derive(Debug)]
pub struct PipelinedTask<D> {
  inner: ContinuousTask<D>,
  queue_depth: usize,
}

impl<D: Decode> PipelinedTask<D> {
  pub fn new(inner: ContinuousTask<D>) -> Self {
    Self {
      inner,
      queue_depth: DEFAULT_QUEUE_DEPTH,
    }
  }

  pub fn with_queue_depth(mut self, depth: usize) -> Self {
    self.queue_depth = depth.max(1);
    self
  }
}

/// 清空通道中尚未处理的帧，返回丢弃的帧数
fn discard_queued(rx: &Receiver<Result<Option<Frame>, String>>) -> usize {
  rx.try_iter()
    .filter(|item| matches!(item, Ok(Some(_))))
    .count()
}

impl<D: Decode> Task for PipelinedTask<D> {
  fn run_loop<S, M, R>(
    &self,
    source: &mut S,
    model: &M,
    renderer: &mut R,
  ) -> Result<LoopOutcome, TaskError>
  where
    S: VideoSource + Send,
    M: Model,
    R: Render,
  {
    let (tx, rx) = sync_channel::<Result<Option<Frame>, String>>(self.queue_depth);

    thread::scope(|scope| {
      let producer = scope.spawn(move || {
        let mut rejected = 0usize;
        loop {
          let item = source.read().map_err(|e| e.to_string());
          let last = !matches!(item, Ok(Some(_)));
          if let Err(unsent) = tx.send(item) {
            rejected += usize::from(matches!(unsent.0, Ok(Some(_))));
            break;
          }
          if last {
            break;
          }
        }
        debug!("采集线程退出");
        rejected
      });

      let result = self.inner.drive(
        || {
          rx.recv()
            .unwrap_or_else(|_| Err("采集线程意外退出".to_string()))
        },
        model,
        renderer,
      );
      let mut discarded = discard_queued(&rx);
      drop(rx);

      match producer.join() {
        Ok(rejected) => discarded += rejected,
        Err(_) => error!("采集线程 panic"),
      }
      if discarded > 0 {
        warn!("丢弃 {} 个已采集未处理的帧", discarded);
      }
      result
    })
  }
}
