// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/console.rs - 交互式控制台
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::RgbFrame,
  input::{OpenSource, is_supported_video},
  model::{CocoLabel, DetectResult, Model},
  output::{FrameUpdate, OutputWrapper, Render},
  report::{QueueReporter, StationName},
  session::{SessionController, SessionError, Transition},
};

const HELP: &str = "\
命令:
  station <名称>   设置加气站名称
  open <路径>      选择视频文件 (.mp4 / .avi / .mov)
  toggle           开始或停止处理
  start            开始处理
  stop             停止处理
  status           显示当前状态
  help             显示本帮助
  quit             退出";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Station(String),
  Open(PathBuf),
  Toggle,
  Start,
  Stop,
  Status,
  Help,
  Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
  #[error("空命令")]
  Empty,
  #[error("未知命令: {0}，输入 help 查看可用命令")]
  Unknown(String),
  #[error("命令 {0} 缺少参数")]
  MissingArgument(&'static str),
}

impl FromStr for Command {
  type Err = CommandError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
      Some((word, rest)) => (word, rest.trim()),
      None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
      "" => return Err(CommandError::Empty),
      "station" if rest.is_empty() => return Err(CommandError::MissingArgument("station")),
      "station" => Command::Station(rest.to_string()),
      "open" if rest.is_empty() => return Err(CommandError::MissingArgument("open")),
      "open" => Command::Open(PathBuf::from(rest)),
      "toggle" => Command::Toggle,
      "start" => Command::Start,
      "stop" => Command::Stop,
      "status" => Command::Status,
      "help" | "?" => Command::Help,
      "quit" | "exit" => Command::Quit,
      _ => return Err(CommandError::Unknown(word.to_string())),
    };
    Ok(command)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Quit,
}

/// 控制台前台：持有会话控制器、操作员输入和预览输出
pub struct Console<S, M, R: ?Sized, W> {
  controller: SessionController<S, M, R>,
  output: Option<OutputWrapper>,
  writer: W,
  station: Option<StationName>,
  video: Option<PathBuf>,
  queue_length: Option<usize>,
}

impl<S, M, R, W> Console<S, M, R, W>
where
  S: OpenSource + 'static,
  M: Model<Input = RgbFrame, Output = DetectResult<CocoLabel>> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: QueueReporter + ?Sized + 'static,
  W: Write,
{
  pub fn new(controller: SessionController<S, M, R>, output: Option<OutputWrapper>, writer: W) -> Self {
    Self {
      controller,
      output,
      writer,
      station: None,
      video: None,
      queue_length: None,
    }
  }

  pub fn with_station(mut self, station: Option<StationName>) -> Self {
    self.station = station;
    self
  }

  pub fn with_video(mut self, video: Option<PathBuf>) -> Self {
    self.video = video;
    self
  }

  pub fn controller(&self) -> &SessionController<S, M, R> {
    &self.controller
  }

  pub fn queue_length(&self) -> Option<usize> {
    self.queue_length
  }

  fn say(&mut self, message: impl std::fmt::Display) -> std::io::Result<()> {
    writeln!(self.writer, "{}", message)
  }

  fn say_status(&mut self) -> std::io::Result<()> {
    let status = self.controller.status().to_string();
    self.say(status)
  }

  /// 解析并执行一行输入
  pub fn handle_line(&mut self, line: &str) -> std::io::Result<Flow> {
    match line.parse::<Command>() {
      Ok(command) => self.handle(command),
      Err(CommandError::Empty) => Ok(Flow::Continue),
      Err(e) => {
        self.say(e)?;
        Ok(Flow::Continue)
      }
    }
  }

  pub fn handle(&mut self, command: Command) -> std::io::Result<Flow> {
    debug!("执行命令: {:?}", command);
    if matches!(command, Command::Toggle | Command::Start | Command::Stop) {
      self.reap()?;
    }
    match command {
      Command::Station(name) => match StationName::parse(&name) {
        Some(station) => {
          self.say(format_args!("加气站: {}", station))?;
          self.station = Some(station);
        }
        None => self.say("加气站名称不能为空")?,
      },
      Command::Open(path) => {
        if !is_supported_video(&path) {
          self.say(format_args!("不支持的视频格式: {}", path.display()))?;
        } else {
          let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
          self.controller.set_status(format!("Video uploaded: {}", name));
          self.video = Some(path);
          self.say_status()?;
        }
      }
      Command::Toggle => self.toggle()?,
      Command::Start if self.controller.is_processing() => self.say("正在处理中")?,
      Command::Start => self.toggle()?,
      Command::Stop if !self.controller.is_processing() => self.say("当前没有处理任务")?,
      Command::Stop => self.toggle()?,
      Command::Status => {
        self.say_status()?;
        if let Some(queue_length) = self.queue_length {
          self.say(format_args!("Current Queue Length: {}", queue_length))?;
        }
      }
      Command::Help => self.say(HELP)?,
      Command::Quit => {
        if self.controller.stop().is_some() {
          self.say_status()?;
        }
        return Ok(Flow::Quit);
      }
    }
    Ok(Flow::Continue)
  }

  fn toggle(&mut self) -> std::io::Result<()> {
    match self
      .controller
      .toggle(self.station.as_ref(), self.video.as_deref())
    {
      Ok(Transition::Started) => {
        self.queue_length = None;
        self.say_status()
      }
      Ok(Transition::Stopped(outcome)) => {
        debug!("会话结束: {:?}", outcome);
        self.say_status()
      }
      Err(SessionError::Validation(e)) => self.say(e),
      Err(e) => {
        warn!("无法开始处理: {}", e);
        self.say(e)
      }
    }
  }

  fn show(&mut self, update: FrameUpdate) -> std::io::Result<()> {
    if let Some(output) = &self.output
      && let Err(e) = output.render_result(&update.preview, &update.queue_length)
    {
      warn!("预览输出失败: {}", e);
    }
    if self.queue_length != Some(update.queue_length) {
      self.queue_length = Some(update.queue_length);
      self.say(format_args!("Current Queue Length: {}", update.queue_length))?;
    }
    Ok(())
  }

  /// 等待最多 `timeout` 取一帧预览并显示，然后检查会话是否结束
  pub fn pump(&mut self, timeout: Duration) -> std::io::Result<()> {
    if self.controller.is_processing()
      && let Some(update) = self.controller.mailbox().wait_timeout(timeout)
    {
      self.show(update)?;
    }

    self.reap()
  }

  /// 回收已自然结束的会话，显示最后一帧和结束状态
  fn reap(&mut self) -> std::io::Result<()> {
    if let Some(end) = self.controller.poll() {
      if let Some(update) = end.last_update {
        self.show(update)?;
      }
      self.say_status()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::DetectionConfig;
  use crate::input::InputError;
  use crate::model::DetectItem;
  use crate::report::QueueObservation;
  use crate::session::SessionState;
  use std::convert::Infallible;
  use std::path::Path;
  use std::sync::Arc;
  use std::time::Instant;

  struct OneTruck;

  impl Model for OneTruck {
    type Input = RgbFrame;
    type Output = DetectResult<CocoLabel>;
    type Error = Infallible;

    fn infer(&self, _input: &RgbFrame) -> Result<Self::Output, Self::Error> {
      Ok(
        vec![DetectItem {
          kind: CocoLabel(7),
          score: 0.7,
          bbox: [0.0, 0.0, 3.0, 3.0],
        }]
        .into(),
      )
    }
  }

  type Frames = std::vec::IntoIter<Result<RgbFrame, InputError>>;

  fn four_frames(_path: &Path) -> Result<Frames, InputError> {
    let frames: Vec<_> = (1..=4)
      .map(|i| Ok(RgbFrame::with_shape(8, 8).with_index(i)))
      .collect();
    Ok(frames.into_iter())
  }

  fn console() -> Console<
    fn(&Path) -> Result<Frames, InputError>,
    OneTruck,
    impl QueueReporter,
    Vec<u8>,
  > {
    let controller = SessionController::new(
      four_frames as fn(&Path) -> Result<Frames, InputError>,
      Arc::new(OneTruck),
      Arc::new(|_: &QueueObservation| {}),
      DetectionConfig::default(),
    );
    Console::new(controller, None, Vec::new())
  }

  fn output_of<S, M, R: ?Sized>(console: &Console<S, M, R, Vec<u8>>) -> String {
    String::from_utf8_lossy(&console.writer).into_owned()
  }

  #[test]
  fn parses_commands() {
    assert_eq!(
      "station  Eastside CNG ".parse(),
      Ok(Command::Station("Eastside CNG".to_string()))
    );
    assert_eq!(
      "open /data/queue.MOV".parse(),
      Ok(Command::Open(PathBuf::from("/data/queue.MOV")))
    );
    assert_eq!("TOGGLE".parse(), Ok(Command::Toggle));
    assert_eq!("quit".parse(), Ok(Command::Quit));
    assert_eq!("   ".parse::<Command>(), Err(CommandError::Empty));
    assert_eq!(
      "station".parse::<Command>(),
      Err(CommandError::MissingArgument("station"))
    );
    assert_eq!(
      "upload x".parse::<Command>(),
      Err(CommandError::Unknown("upload".to_string()))
    );
  }

  #[test]
  fn open_rejects_unsupported_extension() {
    let mut console = console();
    console.handle_line("open clip.mkv").unwrap();
    assert!(console.video.is_none());

    console.handle_line("open /videos/clip.avi").unwrap();
    assert_eq!(console.controller().status(), "Video uploaded: clip.avi");
  }

  #[test]
  fn toggle_without_inputs_reports_validation_error() {
    let mut console = console();
    console.handle_line("toggle").unwrap();
    console.handle_line("open clip.mp4").unwrap();
    console.handle_line("start").unwrap();
    assert_eq!(console.controller().state(), SessionState::Idle);
    let text = output_of(&console);
    assert!(text.contains("请先输入加气站名称"));
  }

  #[test]
  fn runs_session_to_completion() {
    let mut console = console();
    console.handle_line("station North").unwrap();
    console.handle_line("open clip.mp4").unwrap();
    console.handle_line("start").unwrap();
    assert_eq!(console.controller().status(), "Processing video...");

    let deadline = Instant::now() + Duration::from_secs(10);
    while console.controller().is_processing() {
      assert!(Instant::now() < deadline, "会话没有结束");
      console.pump(Duration::from_millis(10)).unwrap();
    }

    assert_eq!(console.controller().status(), "Processing completed");
    assert_eq!(console.queue_length(), Some(1));
    let text = output_of(&console);
    assert!(text.contains("Current Queue Length: 1"));
    assert!(text.ends_with("Processing completed\n"));
  }

  #[test]
  fn start_after_unreaped_completion_starts_again() {
    let mut console = console();
    console.handle_line("station North").unwrap();
    console.handle_line("open clip.mp4").unwrap();
    console.handle_line("start").unwrap();

    // 不调用 pump，让会话在后台结束
    let deadline = Instant::now() + Duration::from_secs(10);
    while console.controller().mailbox().stats().posted < 2 {
      assert!(Instant::now() < deadline, "会话没有结束");
      std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(200));

    console.handle_line("start").unwrap();
    let text = output_of(&console);
    assert!(!text.contains("正在处理中"));
    assert!(text.contains("Processing completed"));
    assert_eq!(console.controller().state(), SessionState::Processing);
    console.handle_line("quit").unwrap();
  }

  #[test]
  fn quit_flow() {
    let mut console = console();
    assert_eq!(console.handle_line("quit").unwrap(), Flow::Quit);
    assert_eq!(console.handle_line("help").unwrap(), Flow::Continue);
  }
}
