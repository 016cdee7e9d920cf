//! # 互斥锁
//!
//! ## Overview
//! - [`Mutex`]：条件变量所依附的锁需要满足的接口
//! - [`MutexBlocking`]：基于等待队列的阻塞型互斥锁
//!
//! ## Invariants
//! - 任意时刻每把锁最多只被一个线程持有
//! - 等待队列中的线程一定处于阻塞状态
//! - `release` 时若有等待者，所有权直接移交给队首线程，锁不会出现空闲窗口

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::error::{fatal, SyncFault};
use crate::hal::{InterruptController, ThreadOps};
use crate::sync::UPIntrFreeCell;

/// 互斥锁统一抽象接口
pub trait Mutex: Sync + Send {
    /// 获取互斥锁，必要时阻塞
    fn acquire(&self);
    /// 释放互斥锁，调用者必须是持有者
    fn release(&self);
    fn is_held_by_current_thread(&self) -> bool;
}

/// 阻塞式互斥锁
pub struct MutexBlocking<H: InterruptController + ThreadOps> {
    hal: Arc<H>,
    inner: UPIntrFreeCell<MutexBlockingInner<H::Thread>>,
}

/// 阻塞互斥锁的内部状态
///
/// ## Fields
/// - `holder`：当前持有者
/// - `wait_queue`：等待该锁的线程队列（FIFO）
struct MutexBlockingInner<T> {
    holder: Option<T>,
    wait_queue: VecDeque<T>,
}

impl<H: InterruptController + ThreadOps> MutexBlocking<H> {
    pub fn new(hal: Arc<H>) -> Self {
        Self {
            hal,
            inner: unsafe {
                UPIntrFreeCell::new(MutexBlockingInner {
                    holder: None,
                    wait_queue: VecDeque::new(),
                })
            },
        }
    }
}

impl<H: InterruptController + ThreadOps> Mutex for MutexBlocking<H> {
    /// 获取阻塞互斥锁
    ///
    /// ## Behavior
    /// - 若锁空闲：直接获取
    /// - 若已被占用：加入等待队列并阻塞，被唤醒时锁已归自己所有
    /// - 重复获取自己持有的锁会永久阻塞，按死锁处理
    fn acquire(&self) {
        let current = self.hal.current_thread();
        let _mask = self.hal.mask();
        let mut inner = self.inner.exclusive_access(&*self.hal);
        if inner.holder.is_none() {
            inner.holder = Some(current);
            return;
        }
        if inner.holder.as_ref() == Some(&current) {
            fatal(SyncFault::Deadlock);
        }
        log::trace!("{:?} waits for lock", current);
        inner.wait_queue.push_back(current);
        drop(inner);
        self.hal.block();
    }

    fn release(&self) {
        let current = self.hal.current_thread();
        let _mask = self.hal.mask();
        let mut inner = self.inner.exclusive_access(&*self.hal);
        if inner.holder.as_ref() != Some(&current) {
            fatal(SyncFault::LockNotHeld);
        }
        match inner.wait_queue.pop_front() {
            Some(next) => {
                log::trace!("lock handed off to {:?}", next);
                inner.holder = Some(next.clone());
                drop(inner);
                self.hal.ready(next);
            }
            None => inner.holder = None,
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        let current = self.hal.current_thread();
        self.inner
            .exclusive_session(&*self.hal, |inner| inner.holder.as_ref() == Some(&current))
    }
}
