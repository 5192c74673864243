// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/mailbox.rs - 单槽“最新帧优先”邮箱
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

//! 工作线程向前台投递预览帧的通道。
//!
//! 邮箱只有一个槽位：新投递覆盖尚未取走的旧值，前台渲染慢时
//! 中间帧被丢弃而不是无限堆积。

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

#[derive(Debug)]
struct Slot<T> {
  value: Option<T>,
  closed: bool,
  posted: u64,
  dropped: u64,
}

#[derive(Debug)]
pub struct Mailbox<T> {
  slot: Mutex<Slot<T>>,
  ready: Condvar,
}

/// 邮箱投递统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
  pub posted: u64,
  pub dropped: u64,
}

impl<T> Default for Mailbox<T> {
  fn default() -> Self {
    Self {
      slot: Mutex::new(Slot {
        value: None,
        closed: false,
        posted: 0,
        dropped: 0,
      }),
      ready: Condvar::new(),
    }
  }
}

impl<T> Mailbox<T> {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn lock(&self) -> MutexGuard<'_, Slot<T>> {
    // 槽位只保存数据，持锁方 panic 不会破坏其一致性
    self
      .slot
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// 投递新值，覆盖未取走的旧值。邮箱关闭后返回 `false` 并丢弃该值。
  pub fn post(&self, value: T) -> bool {
    let mut slot = self.lock();
    if slot.closed {
      return false;
    }
    if slot.value.replace(value).is_some() {
      slot.dropped += 1;
      trace!("覆盖未渲染的预览帧");
    }
    slot.posted += 1;
    drop(slot);
    self.ready.notify_one();
    true
  }

  pub fn take(&self) -> Option<T> {
    self.lock().value.take()
  }

  /// 等待新值，超时或邮箱关闭时返回 `None`
  pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
    let slot = self.lock();
    let (mut slot, _) = self
      .ready
      .wait_timeout_while(slot, timeout, |s| s.value.is_none() && !s.closed)
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.value.take()
  }

  /// 丢弃尚未取走的值
  pub fn clear(&self) -> Option<T> {
    self.lock().value.take()
  }

  /// 关闭邮箱：清空槽位，之后的投递全部丢弃
  pub fn close(&self) {
    let mut slot = self.lock();
    slot.closed = true;
    slot.value = None;
    drop(slot);
    self.ready.notify_all();
  }

  /// 重新打开并清零统计，用于新会话
  pub fn reopen(&self) {
    let mut slot = self.lock();
    slot.closed = false;
    slot.value = None;
    slot.posted = 0;
    slot.dropped = 0;
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  pub fn stats(&self) -> MailboxStats {
    let slot = self.lock();
    MailboxStats {
      posted: slot.posted,
      dropped: slot.dropped,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn latest_value_wins() {
    let mailbox = Mailbox::new();
    assert!(mailbox.post(1));
    assert!(mailbox.post(2));
    assert!(mailbox.post(3));
    assert_eq!(mailbox.take(), Some(3));
    assert_eq!(mailbox.take(), None);
    assert_eq!(
      mailbox.stats(),
      MailboxStats {
        posted: 3,
        dropped: 2
      }
    );
  }

  #[test]
  fn closed_mailbox_discards_posts() {
    let mailbox = Mailbox::new();
    mailbox.post("a");
    mailbox.close();
    assert!(mailbox.is_closed());
    assert!(!mailbox.post("b"));
    assert_eq!(mailbox.take(), None);

    mailbox.reopen();
    assert!(mailbox.post("c"));
    assert_eq!(mailbox.take(), Some("c"));
    assert_eq!(mailbox.stats().posted, 1);
  }

  #[test]
  fn wait_wakes_on_post() {
    let mailbox = Mailbox::new();
    let poster = Arc::clone(&mailbox);
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      poster.post(42u32);
    });
    assert_eq!(mailbox.wait_timeout(Duration::from_secs(5)), Some(42));
    handle.join().unwrap();
  }

  #[test]
  fn wait_times_out_when_empty() {
    let mailbox: Arc<Mailbox<u8>> = Mailbox::new();
    assert_eq!(mailbox.wait_timeout(Duration::from_millis(10)), None);
  }
}
