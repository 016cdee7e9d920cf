//! # 同步原语模块（sync）
//!
//! ## Overview
//! - `up`：单处理器环境下的内部可变性与中断屏蔽封装
//! - `mutex`：互斥锁抽象及阻塞实现
//! - `condvar`：条件变量
//!
//! ## Safety
//! - 所有 `unsafe impl Sync` 的正确性建立在“单处理器 + 中断屏蔽”假设之上
//!
//! ## Invariants
//! - 在阻塞当前线程前，它必然已经进入某个等待队列
//! - 被加入等待队列的线程一定处于不可运行状态

mod condvar;
mod mutex;
mod up;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexBlocking};
pub use up::{UPIntrFreeCell, UPIntrRefMut};
