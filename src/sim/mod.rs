//! # 单处理器模拟机器
//!
//! ## Overview
//! [`Machine`] 在宿主机上实现 [`hal`](crate::hal) 中的全部设施：
//! - 中断控制：一个全局的开/关中断标志
//! - 时钟：单调递增的 tick 计数，每 `timer_interval` 个 tick 产生一次时钟中断
//! - 线程：[`KThread`] 由宿主线程承载，同一时刻只有一个在运行，
//!   就绪队列为 FIFO
//!
//! ## Time
//! - 中断由关变开时，时钟前进 `kernel_tick`
//! - [`Machine::advance`] 模拟线程自身的计算
//! - 没有可运行线程时，时钟直接跳到下一次时钟中断
//!
//! 时钟中断在观察到 `now >= next_fire` 且中断开启时递交，
//! 处理函数在关中断状态下运行。
//!
//! ## Assumptions
//! - 调用 [`Machine::boot`] 的宿主线程成为 `main` 线程，
//!   此后只能由模拟线程访问这台机器

mod thread;

pub mod logging;
pub mod selftest;

pub use thread::{KThread, ThreadStatus};

use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::collections::VecDeque;
use std::format;
use std::panic::{self, AssertUnwindSafe};
use std::string::{String, ToString};
use std::sync::Arc;

use crate::config::MachineConfig;
use crate::error::{fatal, SyncFault};
use crate::hal::{InterruptController, InterruptHandler, InterruptState, ThreadOps, TimerDevice};

struct TimerSlot {
    handler: Option<InterruptHandler>,
    next_fire: u64,
}

struct Scheduler {
    current: Arc<KThread>,
    ready_queue: VecDeque<Arc<KThread>>,
    /// 空转时递交的时钟中断不应让出一个已经阻塞的线程
    idling: bool,
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineStats {
    pub timer_interrupts: u64,
    pub context_switches: u64,
    pub idle_periods: u64,
}

#[derive(Default)]
struct Counters {
    timer_interrupts: AtomicU64,
    context_switches: AtomicU64,
    idle_periods: AtomicU64,
}

pub struct Machine {
    config: MachineConfig,
    interrupt: AtomicU8,
    clock: AtomicU64,
    timer: spin::Mutex<TimerSlot>,
    scheduler: spin::Mutex<Scheduler>,
    main: Arc<KThread>,
    next_tid: AtomicUsize,
    fault: spin::Mutex<Option<String>>,
    counters: Counters,
}

impl Machine {
    /// 启动一台机器，调用者所在的宿主线程成为 `main`
    pub fn boot(config: MachineConfig) -> Arc<Self> {
        let main = Arc::new(KThread::new(0, "main", ThreadStatus::Running));
        log::info!(
            "machine boot: timer every {} ticks, kernel tick {}",
            config.timer_interval,
            config.kernel_tick
        );
        Arc::new(Self {
            config,
            interrupt: AtomicU8::new(InterruptState::Enabled.into()),
            clock: AtomicU64::new(0),
            timer: spin::Mutex::new(TimerSlot {
                handler: None,
                next_fire: config.timer_interval,
            }),
            scheduler: spin::Mutex::new(Scheduler {
                current: Arc::clone(&main),
                ready_queue: VecDeque::new(),
                idling: false,
            }),
            main,
            next_tid: AtomicUsize::new(1),
            fault: spin::Mutex::new(None),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn stats(&self) -> MachineStats {
        MachineStats {
            timer_interrupts: self.counters.timer_interrupts.load(Ordering::Relaxed),
            context_switches: self.counters.context_switches.load(Ordering::Relaxed),
            idle_periods: self.counters.idle_periods.load(Ordering::Relaxed),
        }
    }

    pub fn ready_count(&self) -> usize {
        self.scheduler.lock().ready_queue.len()
    }

    /// 当前线程执行 `ticks` 个 tick 的计算
    pub fn advance(&self, ticks: u64) {
        self.tick(ticks);
        self.check_timer();
    }

    /// 创建线程并放入就绪队列
    ///
    /// 新线程第一次被调度时开中断，然后执行 `body`；`body` 返回即线程结束。
    /// `body` 中的 panic 会使整台机器停机，并在 `main` 线程上重新抛出。
    pub fn fork<F>(self: &Arc<Self>, name: &str, body: F) -> Arc<KThread>
    where
        F: FnOnce() + Send + 'static,
    {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(KThread::new(tid, name, ThreadStatus::New));

        let machine = Arc::clone(self);
        let child = Arc::clone(&thread);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                child.await_baton();
                machine.check_fault();
                machine.enable();
                match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(()) => machine.finish(&child),
                    Err(_) => machine.halt(format!("{:?} panicked", child)),
                }
            });
        if let Err(err) = spawned {
            panic!("cannot spawn host thread for {}: {}", name, err);
        }

        log::debug!("fork {:?}", thread);
        let _mask = self.mask();
        self.ready(Arc::clone(&thread));
        thread
    }

    /// 阻塞当前线程，直到 `thread` 结束
    pub fn join(&self, thread: &Arc<KThread>) {
        let current = self.current();
        assert!(current != *thread, "{:?} cannot join itself", current);
        let _mask = self.mask();
        if thread.status() != ThreadStatus::Finished {
            thread.joiners.lock().push(current);
            self.block();
        }
    }

    fn current(&self) -> Arc<KThread> {
        Arc::clone(&self.scheduler.lock().current)
    }

    fn finish(&self, thread: &Arc<KThread>) {
        // 线程不会再恢复执行，这个关中断区域由下一个线程负责退出
        let _ = self.disable();
        thread.set_status(ThreadStatus::Finished);
        let joiners = core::mem::take(&mut *thread.joiners.lock());
        for joiner in joiners {
            self.ready(joiner);
        }
        log::debug!("{:?} finished", thread);
        self.run_next(thread);
    }

    /// 从就绪队列取出下一个线程并切换过去，队列为空时空转
    fn run_next(&self, current: &Arc<KThread>) {
        let mut idle_periods = 0u64;
        let next = loop {
            let popped = self.scheduler.lock().ready_queue.pop_front();
            if let Some(next) = popped {
                break next;
            }
            if idle_periods >= self.config.idle_limit {
                self.halt(SyncFault::Deadlock.to_string());
            }
            idle_periods += 1;
            self.idle();
        };
        self.switch_to(current, next);
    }

    fn switch_to(&self, current: &Arc<KThread>, next: Arc<KThread>) {
        next.set_status(ThreadStatus::Running);
        if Arc::ptr_eq(current, &next) {
            return;
        }
        log::debug!("switch {:?} -> {:?}", current, next);
        self.scheduler.lock().current = Arc::clone(&next);
        self.counters.context_switches.fetch_add(1, Ordering::Relaxed);

        // 交出接力棒之后，本宿主线程只能等待，不能再触碰机器状态
        let finished = current.status() == ThreadStatus::Finished;
        next.pass_baton();
        if !finished {
            current.await_baton();
            self.check_fault();
        }
    }

    /// 时钟跳到下一次时钟中断并递交
    fn idle(&self) {
        let handler = {
            let mut slot = self.timer.lock();
            let fire_at = slot.next_fire.max(self.now());
            self.clock.fetch_max(fire_at, Ordering::SeqCst);
            slot.next_fire = self.next_fire_after(fire_at);
            slot.handler.clone()
        };
        self.counters.idle_periods.fetch_add(1, Ordering::Relaxed);
        self.scheduler.lock().idling = true;
        self.deliver_timer(handler);
        self.scheduler.lock().idling = false;
    }

    fn check_timer(&self) {
        if self.state() == InterruptState::Disabled || std::thread::panicking() {
            return;
        }
        let now = self.now();
        let handler = {
            let mut slot = self.timer.lock();
            if now < slot.next_fire {
                return;
            }
            slot.next_fire = self.next_fire_after(now);
            slot.handler.clone()
        };
        self.deliver_timer(handler);
    }

    /// 以关中断状态执行处理函数，结束后恢复原状态（不计 tick）
    fn deliver_timer(&self, handler: Option<InterruptHandler>) {
        self.counters.timer_interrupts.fetch_add(1, Ordering::Relaxed);
        log::trace!("timer interrupt at tick {}", self.now());
        if let Some(handler) = handler {
            let prior = self.swap_interrupt(InterruptState::Disabled);
            handler();
            self.swap_interrupt(prior);
        }
    }

    /// 时钟在 `u64::MAX` 处饱和，不会回绕
    fn tick(&self, ticks: u64) {
        let _ = self
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(ticks))
            });
    }

    fn next_fire_after(&self, tick: u64) -> u64 {
        let interval = self.config.timer_interval;
        (tick / interval)
            .saturating_add(1)
            .saturating_mul(interval)
    }

    fn swap_interrupt(&self, state: InterruptState) -> InterruptState {
        let old = self.interrupt.swap(state.into(), Ordering::SeqCst);
        InterruptState::try_from(old).unwrap_or(InterruptState::Disabled)
    }

    fn assert_masked(&self) {
        if self.state() == InterruptState::Enabled {
            fatal(SyncFault::InterruptsEnabled);
        }
    }

    fn check_fault(&self) {
        if let Some(reason) = self.fault.lock().clone() {
            panic!("machine halted: {}", reason);
        }
    }

    /// 停机：记录原因，唤醒 `main` 让它在自己的宿主线程上报告
    fn halt(&self, reason: String) -> ! {
        log::error!("machine halted: {}", reason);
        *self.fault.lock() = Some(reason.clone());
        if self.current() != self.main {
            self.main.pass_baton();
        }
        panic!("machine halted: {}", reason)
    }
}

impl InterruptController for Machine {
    fn state(&self) -> InterruptState {
        InterruptState::try_from(self.interrupt.load(Ordering::SeqCst))
            .unwrap_or(InterruptState::Disabled)
    }

    fn disable(&self) -> InterruptState {
        self.swap_interrupt(InterruptState::Disabled)
    }

    fn restore(&self, prior: InterruptState) {
        let old = self.swap_interrupt(prior);
        if old == InterruptState::Disabled && prior == InterruptState::Enabled {
            self.tick(self.config.kernel_tick);
            self.check_timer();
        }
    }
}

impl ThreadOps for Machine {
    type Thread = Arc<KThread>;

    fn current_thread(&self) -> Arc<KThread> {
        self.current()
    }

    fn block(&self) {
        self.assert_masked();
        let current = self.current();
        current.set_status(ThreadStatus::Blocked);
        log::debug!("{:?} blocks at tick {}", current, self.now());
        self.run_next(&current);
    }

    fn ready(&self, thread: Arc<KThread>) {
        self.assert_masked();
        match thread.status() {
            ThreadStatus::New | ThreadStatus::Blocked => {}
            _ => fatal(SyncFault::NotBlocked),
        }
        thread.mark_ready(self.now());
        self.scheduler.lock().ready_queue.push_back(thread);
    }

    fn yield_current(&self) {
        if self.scheduler.lock().idling {
            return;
        }
        let prior = self.disable();
        let current = self.current();
        current.set_status(ThreadStatus::Ready);
        self.scheduler
            .lock()
            .ready_queue
            .push_back(Arc::clone(&current));
        self.run_next(&current);
        self.restore(prior);
    }
}

impl TimerDevice for Machine {
    fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn set_interrupt_handler(&self, handler: InterruptHandler) {
        let mut slot = self.timer.lock();
        if slot.handler.is_some() {
            fatal(SyncFault::HandlerAlreadyInstalled);
        }
        slot.handler = Some(handler);
    }
}
