//! # upsync
//!
//! ## Overview
//! 单处理器内核中的两个同步原语：
//! - [`timer::Alarm`]：基于周期时钟中断的定时睡眠服务
//! - [`sync::Condvar`]：依附于互斥锁、以关中断保护等待队列的条件变量
//!
//! 二者都只依赖 [`hal`] 中描述的底层设施（关/开中断、阻塞/就绪/让出线程、
//! 时钟计数与中断处理函数注册），不关心调度器的具体实现。
//!
//! ## Assumptions
//! - 系统只有一个逻辑处理器，不存在真正的并行
//! - 抢占只可能发生在显式让出或时钟中断处
//! - 关中断是唯一的互斥手段
//!
//! ## Features
//! - `sim`（默认开启）：链接 `std`，提供 [`sim::Machine`] 模拟机器、
//!   控制台日志以及自检程序，用于在宿主机上端到端运行上述原语

#![no_std]

extern crate alloc;

#[cfg(feature = "sim")]
extern crate std;

pub mod config;
pub mod error;
pub mod hal;
pub mod sync;
pub mod timer;

#[cfg(feature = "sim")]
pub mod sim;

pub use error::SyncFault;
pub use hal::{InterruptController, InterruptState, IntrGuard, ThreadOps, TimerDevice};
pub use sync::{Condvar, Mutex, MutexBlocking};
pub use timer::Alarm;
