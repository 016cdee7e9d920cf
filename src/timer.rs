//! # 定时睡眠服务（Alarm）
//!
//! ## Overview
//! [`Alarm`] 在构造时把自己注册为时钟设备的中断处理函数，
//! 维护一个按截止时间排序的睡眠队列：
//! - `wait_until(x)`：当前线程至少睡眠 `x` 个 tick
//! - 每次时钟中断：唤醒所有已到期的线程，然后让出当前线程
//!
//! ## Invariants
//! - 睡眠线程在第一个满足 `now >= deadline` 的时钟中断中转为就绪
//! - 一个线程同一时刻最多对应一个 [`SleepEntry`]
//! - 不存在忙等，唯一的“轮询”是周期性的时钟中断
//!
//! 一个时钟设备只能注册一个处理函数，因此每台机器至多一个活动的 `Alarm`。

use alloc::collections::BinaryHeap;
use alloc::sync::Arc;
use core::cmp::{Ordering, Reverse};

use crate::error::{fatal, SyncFault};
use crate::hal::{InterruptController, ThreadOps, TimerDevice};
use crate::sync::UPIntrFreeCell;

/// 睡眠队列中的一项
///
/// 排序只看 `(deadline, seq)`，截止时间相同的按登记顺序唤醒。
#[derive(Debug)]
pub struct SleepEntry<T> {
    pub deadline: u64,
    seq: u64,
    pub thread: T,
}

impl<T> SleepEntry<T> {
    fn key(&self) -> (u64, u64) {
        (self.deadline, self.seq)
    }
}

impl<T> PartialEq for SleepEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for SleepEntry<T> {}

impl<T> PartialOrd for SleepEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for SleepEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// 按截止时间排序的睡眠队列（小顶堆）
pub struct SleepQueue<T> {
    heap: BinaryHeap<Reverse<SleepEntry<T>>>,
    next_seq: u64,
}

impl<T> Default for SleepQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SleepQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, thread: T, deadline: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(SleepEntry {
            deadline,
            seq,
            thread,
        }));
    }

    /// 取出一个截止时间不晚于 `now` 的线程，最早到期的优先
    pub fn pop_matured(&mut self, now: u64) -> Option<T> {
        match self.heap.peek() {
            Some(Reverse(entry)) if entry.deadline <= now => {
                self.heap.pop().map(|Reverse(entry)| entry.thread)
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T: PartialEq> SleepQueue<T> {
    pub fn contains(&self, thread: &T) -> bool {
        self.heap.iter().any(|Reverse(entry)| entry.thread == *thread)
    }
}

/// 定时睡眠服务
pub struct Alarm<H: InterruptController + ThreadOps + TimerDevice> {
    hal: Arc<H>,
    sleepers: UPIntrFreeCell<SleepQueue<H::Thread>>,
}

impl<H> Alarm<H>
where
    H: InterruptController + ThreadOps + TimerDevice + 'static,
{
    /// 创建 Alarm 并注册为 `hal` 的时钟中断处理函数
    ///
    /// 处理函数只持有 `Weak`，Alarm 被释放后时钟中断不再做任何事。
    pub fn new(hal: Arc<H>) -> Arc<Self> {
        let alarm = Arc::new(Self {
            hal: Arc::clone(&hal),
            sleepers: unsafe { UPIntrFreeCell::new(SleepQueue::new()) },
        });
        let weak = Arc::downgrade(&alarm);
        hal.set_interrupt_handler(Arc::new(move || {
            if let Some(alarm) = weak.upgrade() {
                alarm.timer_interrupt();
            }
        }));
        log::info!("alarm installed as timer interrupt handler");
        alarm
    }
}

impl<H: InterruptController + ThreadOps + TimerDevice> Alarm<H> {
    /// 让当前线程至少睡眠 `ticks` 个 tick
    ///
    /// ## Behavior
    /// - `ticks <= 0`：立即返回，不登记、不阻塞
    /// - 否则在关中断区域内登记 `now + ticks` 并阻塞，
    ///   被唤醒调度后才恢复进入前的中断状态
    pub fn wait_until(&self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let deadline = self.hal.now().saturating_add(ticks as u64);
        let current = self.hal.current_thread();

        let mask = self.hal.mask();
        self.sleepers.exclusive_session(&*self.hal, |sleepers| {
            if sleepers.contains(&current) {
                fatal(SyncFault::DuplicateSleeper);
            }
            log::debug!("{:?} sleeps until tick {}", current, deadline);
            sleepers.push(current, deadline);
        });
        self.hal.block();
        drop(mask);
    }

    /// 时钟中断处理：先唤醒所有到期线程，再让出当前线程
    pub fn timer_interrupt(&self) {
        let now = self.hal.now();
        {
            let _mask = self.hal.mask();
            while let Some(thread) = self
                .sleepers
                .exclusive_session(&*self.hal, |sleepers| sleepers.pop_matured(now))
            {
                log::debug!("tick {}: wake {:?}", now, thread);
                self.hal.ready(thread);
            }
        }
        self.hal.yield_current();
    }

    /// 当前仍在睡眠的线程数
    pub fn sleeper_count(&self) -> usize {
        self.sleepers.exclusive_session(&*self.hal, |sleepers| sleepers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;
    use crate::hal::InterruptState;
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn queue_pops_in_deadline_order() {
        let mut queue = SleepQueue::new();
        queue.push("late", 300);
        queue.push("early", 100);
        queue.push("middle", 200);
        assert_eq!(queue.pop_matured(99), None);

        let mut woken = Vec::new();
        while let Some(name) = queue.pop_matured(250) {
            woken.push(name);
        }
        assert_eq!(woken, vec!["early", "middle"]);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(&"late"));
    }

    #[test]
    fn equal_deadlines_mature_together_in_arrival_order() {
        let mut queue = SleepQueue::new();
        for id in 0..4u32 {
            queue.push(id, 1000);
        }
        assert_eq!(queue.pop_matured(999), None);
        let woken: Vec<u32> = core::iter::from_fn(|| queue.pop_matured(1000)).collect();
        assert_eq!(woken, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn non_positive_wait_neither_registers_nor_blocks() {
        let hal = Arc::new(MockHal::new());
        let alarm = Alarm::new(Arc::clone(&hal));
        alarm.wait_until(0);
        alarm.wait_until(-25);
        assert_eq!(alarm.sleeper_count(), 0);
        assert!(hal.blocked().is_empty());
    }

    #[test]
    fn sweep_wakes_matured_sleepers_then_yields() {
        let hal = Arc::new(MockHal::new());
        let alarm = Alarm::new(Arc::clone(&hal));

        hal.switch_to(1);
        alarm.wait_until(1000);
        hal.switch_to(2);
        hal.set_now(200);
        alarm.wait_until(1500);
        hal.switch_to(3);
        hal.set_now(300);
        alarm.wait_until(700);
        assert_eq!(hal.blocked(), vec![1, 2, 3]);
        assert_eq!(alarm.sleeper_count(), 3);
        assert_eq!(hal.state(), InterruptState::Enabled);

        hal.set_now(500);
        hal.fire();
        assert!(hal.readied().is_empty());
        assert_eq!(hal.yields(), 1);

        // 1 与 3 的截止时间相同，应在同一次中断中被唤醒
        hal.set_now(1000);
        hal.fire();
        assert_eq!(hal.readied(), vec![1, 3]);
        assert_eq!(hal.yields(), 2);

        hal.set_now(1700);
        hal.fire();
        assert_eq!(hal.readied(), vec![1, 3, 2]);
        assert_eq!(alarm.sleeper_count(), 0);
    }

    #[test]
    fn deadline_saturates_instead_of_wrapping() {
        let hal = Arc::new(MockHal::new());
        let alarm = Alarm::new(Arc::clone(&hal));
        hal.set_now(u64::MAX - 5);
        alarm.wait_until(i64::MAX);
        hal.set_now(u64::MAX - 1);
        hal.fire();
        assert!(hal.readied().is_empty());
        hal.set_now(u64::MAX);
        hal.fire();
        assert_eq!(hal.readied(), vec![0]);
    }

    #[test]
    #[should_panic(expected = "timer interrupt handler already installed")]
    fn second_alarm_on_one_timer_is_fatal() {
        let hal = Arc::new(MockHal::new());
        let _first = Alarm::new(Arc::clone(&hal));
        let _second = Alarm::new(hal);
    }

    #[test]
    fn dropped_alarm_leaves_handler_inert() {
        let hal = Arc::new(MockHal::new());
        drop(Alarm::new(Arc::clone(&hal)));
        hal.fire();
        assert_eq!(hal.yields(), 0);
    }
}
