//! 模拟线程
//!
//! 每个 [`KThread`] 背后是一个宿主线程，但同一时刻只有持有“接力棒”的
//! 那一个在执行，切换即把接力棒交给下一个线程。

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::string::String;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::vec::Vec;

/// 线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// 已创建，尚未进入就绪队列
    New,
    Ready,
    Running,
    Blocked,
    Finished,
}

pub struct KThread {
    id: usize,
    name: String,
    status: spin::Mutex<ThreadStatus>,
    /// 最近一次被转为就绪时的 tick
    ready_at: AtomicU64,
    /// 等待本线程结束的线程
    pub(super) joiners: spin::Mutex<Vec<Arc<KThread>>>,
    baton: Mutex<bool>,
    turn: Condvar,
}

impl KThread {
    pub(super) fn new(id: usize, name: &str, status: ThreadStatus) -> Self {
        Self {
            id,
            name: name.into(),
            status: spin::Mutex::new(status),
            ready_at: AtomicU64::new(0),
            joiners: spin::Mutex::new(Vec::new()),
            baton: Mutex::new(false),
            turn: Condvar::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ThreadStatus {
        *self.status.lock()
    }

    pub(super) fn set_status(&self, status: ThreadStatus) {
        *self.status.lock() = status;
    }

    pub fn ready_at(&self) -> u64 {
        self.ready_at.load(Ordering::Acquire)
    }

    pub(super) fn mark_ready(&self, tick: u64) {
        self.set_status(ThreadStatus::Ready);
        self.ready_at.store(tick, Ordering::Release);
    }

    /// 把处理器交给本线程
    pub(super) fn pass_baton(&self) {
        let mut baton = self.baton.lock().unwrap_or_else(PoisonError::into_inner);
        *baton = true;
        self.turn.notify_one();
    }

    /// 在本线程的宿主线程上等待，直到被调度
    pub(super) fn await_baton(&self) {
        let mut baton = self.baton.lock().unwrap_or_else(PoisonError::into_inner);
        while !*baton {
            baton = self
                .turn
                .wait(baton)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *baton = false;
    }
}

impl PartialEq for KThread {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for KThread {}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}
