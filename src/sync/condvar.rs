//! # 条件变量（Condvar）
//!
//! ## Overview
//! 经典的 sleep / wake / wake_all 语义，依附于一把在构造时绑定的互斥锁。
//! 条件变量本身不保存条件状态，仅维护一个 FIFO 等待队列；
//! 队列不另设锁，而是靠关中断保证原子性。
//!
//! ## Assumptions
//! - 系统运行在单处理器环境下，并发只来源于时钟中断与显式调度点
//! - 调用任何操作时，当前线程都持有关联的互斥锁
//!
//! ## Invariants
//! - `wait_queue` 中的线程一定阻塞在本条件变量的 `sleep` 中
//! - 释放锁、入队与阻塞处于同一个关中断区域内，`wake` 不会丢失
//! - 被唤醒的线程按入队顺序转为就绪
//!
//! ## Behavior
//! - `sleep`：释放锁，入队并阻塞，被唤醒后重新获取锁再返回
//! - `wake`：唤醒等待最久的一个线程，队列为空时什么也不做
//! - `wake_all`：按 FIFO 顺序唤醒全部等待线程

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::error::{fatal, SyncFault};
use crate::hal::{InterruptController, ThreadOps};
use crate::sync::{Mutex, UPIntrFreeCell};

/// 条件变量
pub struct Condvar<H: InterruptController + ThreadOps> {
    hal: Arc<H>,
    /// 关联的互斥锁，构造后不再改变
    lock: Arc<dyn Mutex>,
    wait_queue: UPIntrFreeCell<VecDeque<H::Thread>>,
}

impl<H: InterruptController + ThreadOps> Condvar<H> {
    pub fn new(hal: Arc<H>, lock: Arc<dyn Mutex>) -> Self {
        Self {
            hal,
            lock,
            wait_queue: unsafe { UPIntrFreeCell::new(VecDeque::new()) },
        }
    }

    /// 关联的互斥锁
    pub fn lock(&self) -> &Arc<dyn Mutex> {
        &self.lock
    }

    /// 当前阻塞在本条件变量上的线程数
    pub fn waiter_count(&self) -> usize {
        self.wait_queue.exclusive_session(&*self.hal, |queue| queue.len())
    }

    /// 原子地释放锁并睡眠，被唤醒后重新获取锁
    ///
    /// ## Behavior
    /// 1. 关中断
    /// 2. 释放互斥锁，把当前线程加入等待队列
    /// 3. 阻塞，直到 `wake` / `wake_all` 把它转为就绪并被调度
    /// 4. 恢复进入前的中断状态
    /// 5. 重新获取互斥锁
    ///
    /// 调用者需在外层循环检查条件。
    pub fn sleep(&self) {
        self.assert_lock_held();
        let current = self.hal.current_thread();

        // 释放锁之后、入队之前不能被时钟中断抢占
        let mask = self.hal.mask();
        self.lock.release();
        self.wait_queue.exclusive_session(&*self.hal, |queue| {
            if queue.contains(&current) {
                fatal(SyncFault::DuplicateSleeper);
            }
            log::trace!("{:?} sleeps on condvar", current);
            queue.push_back(current);
        });
        self.hal.block();
        drop(mask);

        self.lock.acquire();
    }

    /// 唤醒等待最久的一个线程
    pub fn wake(&self) {
        self.assert_lock_held();
        let _mask = self.hal.mask();
        self.wake_one();
    }

    /// 唤醒全部等待线程
    pub fn wake_all(&self) {
        self.assert_lock_held();
        let _mask = self.hal.mask();
        let mut woken = 0usize;
        while self.wake_one() {
            woken += 1;
        }
        log::debug!("wake_all released {} waiters", woken);
    }

    /// 调用时必须已关中断
    fn wake_one(&self) -> bool {
        match self
            .wait_queue
            .exclusive_session(&*self.hal, |queue| queue.pop_front())
        {
            Some(thread) => {
                log::trace!("wake {:?}", thread);
                self.hal.ready(thread);
                true
            }
            None => false,
        }
    }

    fn assert_lock_held(&self) {
        if !self.lock.is_held_by_current_thread() {
            fatal(SyncFault::LockNotHeld);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;
    use crate::hal::InterruptState;
    use crate::sync::MutexBlocking;
    use alloc::vec;

    fn condvar(hal: &Arc<MockHal>) -> Condvar<MockHal> {
        let lock: Arc<dyn Mutex> = Arc::new(MutexBlocking::new(Arc::clone(hal)));
        Condvar::new(Arc::clone(hal), lock)
    }

    #[test]
    fn sleep_releases_blocks_then_reacquires() {
        let hal = Arc::new(MockHal::new());
        let cv = condvar(&hal);

        hal.switch_to(1);
        cv.lock().acquire();
        cv.sleep();
        assert_eq!(hal.blocked(), vec![1]);
        assert_eq!(cv.waiter_count(), 1);
        assert!(cv.lock().is_held_by_current_thread());
        assert_eq!(hal.state(), InterruptState::Enabled);
    }

    #[test]
    fn wake_pops_in_fifo_order_and_ignores_empty_queue() {
        let hal = Arc::new(MockHal::new());
        let cv = condvar(&hal);

        for id in [4, 2, 9] {
            hal.switch_to(id);
            cv.lock().acquire();
            cv.sleep();
            cv.lock().release();
        }
        assert_eq!(cv.waiter_count(), 3);

        hal.switch_to(0);
        cv.lock().acquire();
        cv.wake();
        assert_eq!(hal.readied(), vec![4]);
        cv.wake_all();
        assert_eq!(hal.readied(), vec![4, 2, 9]);
        assert_eq!(cv.waiter_count(), 0);

        cv.wake();
        assert_eq!(hal.readied().len(), 3);
        assert!(cv.lock().is_held_by_current_thread());
        cv.lock().release();
    }

    #[test]
    #[should_panic(expected = "lock not held by current thread")]
    fn wake_without_lock_is_fatal() {
        let hal = Arc::new(MockHal::new());
        condvar(&hal).wake();
    }

    #[test]
    #[should_panic(expected = "lock not held by current thread")]
    fn sleep_with_lock_held_by_another_thread_is_fatal() {
        let hal = Arc::new(MockHal::new());
        let cv = condvar(&hal);
        hal.switch_to(1);
        cv.lock().acquire();
        hal.switch_to(2);
        cv.sleep();
    }
}
