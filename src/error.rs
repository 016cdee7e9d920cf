//! # 致命错误
//!
//! ## Overview
//! 同步原语不存在可恢复的错误路径：要么完成约定，要么系统已处于
//! 不一致状态。本模块把所有“不可能发生”的情况集中为 [`SyncFault`]，
//! 由 [`fatal`] 记录日志后终止当前执行流。
//!
//! ## Behavior
//! - `LockNotHeld` 属于调用约定被破坏（前置条件）
//! - 其余各项属于实现内部不变量被破坏

use core::fmt;

/// 致命错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFault {
    /// 当前线程未持有条件变量关联的锁（或释放了别人的锁）
    LockNotHeld,
    /// 同一线程同时出现在多个等待结构中
    DuplicateSleeper,
    /// 在开中断状态下调用了要求关中断的线程原语
    InterruptsEnabled,
    /// 时钟设备上已经注册过中断处理函数
    HandlerAlreadyInstalled,
    /// 对一个并未阻塞的线程执行了就绪转换
    NotBlocked,
    /// 没有任何可运行线程，且空转已超过上限
    Deadlock,
}

impl fmt::Display for SyncFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SyncFault::LockNotHeld => "lock not held by current thread",
            SyncFault::DuplicateSleeper => "thread already waiting in another queue",
            SyncFault::InterruptsEnabled => "thread primitive called with interrupts enabled",
            SyncFault::HandlerAlreadyInstalled => "timer interrupt handler already installed",
            SyncFault::NotBlocked => "ready() on a thread that is not blocked",
            SyncFault::Deadlock => "no runnable thread left",
        };
        f.write_str(msg)
    }
}

/// 记录并触发致命错误
#[cold]
#[track_caller]
pub fn fatal(fault: SyncFault) -> ! {
    log::error!("fatal: {}", fault);
    panic!("{}", fault)
}
