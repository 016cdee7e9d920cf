//! # 单处理器安全内部可变性封装
//!
//! ## Overview
//! [`UPIntrFreeCell`] 在访问期间屏蔽中断，使得同一时刻只有一个执行流
//! 能够修改其中的数据；[`UPIntrRefMut`] 是对应的 RAII 可变借用守卫。
//!
//! 与全局中断控制器不同，这里的中断控制器由调用者在访问时传入，
//! 因此同一份代码既可运行在真实硬件上，也可运行在模拟机器上。
//!
//! ## Assumptions
//! - 系统运行在单处理器环境中，仅可能被中断打断
//! - 同一个 cell 的所有访问都使用同一个中断控制器
//!
//! ## Invariants
//! - 若某个 `UPIntrFreeCell` 处于可变借用状态，则中断必然被屏蔽
//! - 守卫被 drop 时，先归还借用，再恢复中断
//! - 借用冲突将直接 panic（`RefCell` 语义）

use core::cell::{RefCell, RefMut};
use core::ops::{Deref, DerefMut};

use crate::hal::{InterruptController, IntrGuard};

/// 在访问期间自动关闭中断的 UP 内部可变性封装
pub struct UPIntrFreeCell<T> {
    inner: RefCell<T>,
}

/// 声明其在 UP + 中断屏蔽前提下是安全的
unsafe impl<T> Sync for UPIntrFreeCell<T> {}

/// `UPIntrFreeCell` 的可变借用守卫
///
/// 字段的声明顺序就是 drop 顺序。
pub struct UPIntrRefMut<'a, T, I: InterruptController + ?Sized> {
    value: RefMut<'a, T>,
    _mask: IntrGuard<'a, I>,
}

impl<T> UPIntrFreeCell<T> {
    /// 创建一个新的 `UPIntrFreeCell`
    ///
    /// ## Safety
    /// - 使用者需保证仅在单处理器环境下使用，且访问时总是经由
    ///   [`UPIntrFreeCell::exclusive_access`] 屏蔽中断
    pub unsafe fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// 获取内部数据的独占访问权
    ///
    /// ## Behavior
    /// - 屏蔽中断（保存旧状态）
    /// - 获取 RefCell 的可变借用，冲突时 panic
    pub fn exclusive_access<'a, I>(&'a self, ctrl: &'a I) -> UPIntrRefMut<'a, T, I>
    where
        I: InterruptController + ?Sized,
    {
        let mask = IntrGuard::new(ctrl);
        UPIntrRefMut {
            value: self.inner.borrow_mut(),
            _mask: mask,
        }
    }

    /// 在独占访问会话中执行闭包
    pub fn exclusive_session<I, F, V>(&self, ctrl: &I, f: F) -> V
    where
        I: InterruptController + ?Sized,
        F: FnOnce(&mut T) -> V,
    {
        let mut inner = self.exclusive_access(ctrl);
        f(inner.deref_mut())
    }
}

impl<T, I: InterruptController + ?Sized> Deref for UPIntrRefMut<'_, T, I> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.value.deref()
    }
}

impl<T, I: InterruptController + ?Sized> DerefMut for UPIntrRefMut<'_, T, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockIntr;
    use crate::hal::InterruptState;

    #[test]
    fn access_masks_interrupts_until_dropped() {
        let intr = MockIntr::new();
        let cell = unsafe { UPIntrFreeCell::new(0u32) };
        {
            let mut value = cell.exclusive_access(&intr);
            *value += 1;
            assert_eq!(intr.state(), InterruptState::Disabled);
        }
        assert_eq!(intr.state(), InterruptState::Enabled);
        assert_eq!(cell.exclusive_session(&intr, |v| *v), 1);
    }

    #[test]
    fn session_inside_masked_region_keeps_it_masked() {
        let intr = MockIntr::new();
        let cell = unsafe { UPIntrFreeCell::new([1u8, 2, 3]) };
        let outer = intr.mask();
        let sum: u8 = cell.exclusive_session(&intr, |v| v.iter().sum());
        assert_eq!(sum, 6);
        assert_eq!(intr.state(), InterruptState::Disabled);
        drop(outer);
        assert_eq!(intr.enable_transitions(), 1);
    }

    #[test]
    #[should_panic]
    fn overlapping_borrows_panic() {
        let intr = MockIntr::new();
        let cell = unsafe { UPIntrFreeCell::new(0u32) };
        let _first = cell.exclusive_access(&intr);
        let _second = cell.exclusive_access(&intr);
    }
}
