//! # 底层设施抽象
//!
//! ## Overview
//! 同步原语所依赖的全部外部设施都在这里以 trait 的形式给出：
//! - [`InterruptController`]：关中断 / 恢复中断，单处理器上唯一的互斥手段
//! - [`ThreadOps`]：当前线程、阻塞、就绪、让出
//! - [`TimerDevice`]：单调递增的 tick 计数与时钟中断处理函数注册
//!
//! 真实内核由体系结构相关代码实现这些 trait；宿主机上由 `sim` 模块实现。
//!
//! ## Invariants
//! - `ThreadOps::block` 与 `ThreadOps::ready` 只能在关中断状态下调用
//! - 关中断区域总是“保存旧状态、恢复旧状态”，因此可以任意嵌套

use alloc::sync::Arc;
use core::fmt::Debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[cfg(test)]
pub(crate) mod mock;

/// 中断使能状态
#[derive(Clone, Copy, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum InterruptState {
    Disabled = 0,
    Enabled = 1,
}

impl From<InterruptState> for bool {
    fn from(value: InterruptState) -> Self {
        match value {
            InterruptState::Enabled => true,
            InterruptState::Disabled => false,
        }
    }
}

impl From<bool> for InterruptState {
    fn from(value: bool) -> Self {
        match value {
            true => InterruptState::Enabled,
            false => InterruptState::Disabled,
        }
    }
}

/// 中断控制器
pub trait InterruptController: Send + Sync {
    /// 当前中断状态
    fn state(&self) -> InterruptState;

    /// 关中断，返回关中断之前的状态
    fn disable(&self) -> InterruptState;

    /// 恢复到指定状态
    ///
    /// 由关中断恢复为开中断时，等待中的中断可能在此处被递交。
    fn restore(&self, prior: InterruptState);

    fn enable(&self) {
        self.restore(InterruptState::Enabled);
    }

    /// 进入一个关中断区域，守卫被 drop 时恢复进入前的状态
    fn mask(&self) -> IntrGuard<'_, Self>
    where
        Self: Sized,
    {
        IntrGuard::new(self)
    }
}

/// 关中断区域的 RAII 守卫
///
/// ## Invariants
/// - 生命周期内中断处于关闭状态（除非持有者主动恢复）
/// - drop 时恢复为创建前的状态，而不是无条件开中断
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IntrGuard<'a, I: InterruptController + ?Sized> {
    ctrl: &'a I,
    prior: InterruptState,
}

impl<'a, I: InterruptController + ?Sized> IntrGuard<'a, I> {
    pub fn new(ctrl: &'a I) -> Self {
        let prior = ctrl.disable();
        Self { ctrl, prior }
    }

    /// 进入该区域之前的中断状态
    pub fn prior(&self) -> InterruptState {
        self.prior
    }
}

impl<I: InterruptController + ?Sized> Drop for IntrGuard<'_, I> {
    fn drop(&mut self) {
        self.ctrl.restore(self.prior);
    }
}

/// 线程原语
pub trait ThreadOps: Send + Sync {
    /// 线程引用，用于放入各类等待队列
    type Thread: Clone + PartialEq + Debug + Send + Sync;

    fn current_thread(&self) -> Self::Thread;

    /// 阻塞当前线程，直到其他执行流对它调用 [`ThreadOps::ready`]
    ///
    /// 调用时必须已关中断；返回时中断仍处于关闭状态。
    fn block(&self);

    /// 把一个阻塞的线程放入就绪队列，不会立即切换
    ///
    /// 调用时必须已关中断。
    fn ready(&self, thread: Self::Thread);

    /// 当前线程让出处理器，自身保持就绪
    fn yield_current(&self);
}

/// 时钟中断处理函数
pub type InterruptHandler = Arc<dyn Fn() + Send + Sync>;

/// 周期性硬件时钟
pub trait TimerDevice: Send + Sync {
    /// 自启动以来的 tick 数，单调递增
    fn now(&self) -> u64;

    /// 注册时钟中断处理函数
    ///
    /// 一个设备只接受一个处理函数，重复注册属于致命错误。
    fn set_interrupt_handler(&self, handler: InterruptHandler);
}
