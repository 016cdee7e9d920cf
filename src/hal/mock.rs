use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use super::{InterruptController, InterruptHandler, InterruptState, ThreadOps, TimerDevice};
use crate::error::{fatal, SyncFault};

/// 只记录状态的中断控制器
pub(crate) struct MockIntr {
    state: AtomicU8,
    enables: AtomicUsize,
}

impl MockIntr {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(InterruptState::Enabled.into()),
            enables: AtomicUsize::new(0),
        }
    }

    /// 由关到开的次数
    pub(crate) fn enable_transitions(&self) -> usize {
        self.enables.load(Ordering::Relaxed)
    }

    fn swap(&self, state: InterruptState) -> InterruptState {
        let old = self.state.swap(state.into(), Ordering::AcqRel);
        InterruptState::try_from(old).unwrap_or(InterruptState::Disabled)
    }
}

impl InterruptController for MockIntr {
    fn state(&self) -> InterruptState {
        InterruptState::try_from(self.state.load(Ordering::Acquire))
            .unwrap_or(InterruptState::Disabled)
    }

    fn disable(&self) -> InterruptState {
        self.swap(InterruptState::Disabled)
    }

    fn restore(&self, prior: InterruptState) {
        let old = self.swap(prior);
        if old == InterruptState::Disabled && prior == InterruptState::Enabled {
            self.enables.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// 不做真实切换的单线程平台
///
/// `block` 只记录调用者后立即返回，测试通过手动设置当前线程与时钟
/// 来观察原语对线程原语的调用序列。
pub(crate) struct MockHal {
    pub(crate) intr: MockIntr,
    clock: AtomicU64,
    current: AtomicUsize,
    blocked: spin::Mutex<Vec<usize>>,
    readied: spin::Mutex<Vec<usize>>,
    yields: AtomicUsize,
    handler: spin::Mutex<Option<InterruptHandler>>,
}

impl MockHal {
    pub(crate) fn new() -> Self {
        Self {
            intr: MockIntr::new(),
            clock: AtomicU64::new(0),
            current: AtomicUsize::new(0),
            blocked: spin::Mutex::new(Vec::new()),
            readied: spin::Mutex::new(Vec::new()),
            yields: AtomicUsize::new(0),
            handler: spin::Mutex::new(None),
        }
    }

    pub(crate) fn set_now(&self, tick: u64) {
        self.clock.store(tick, Ordering::Relaxed);
    }

    pub(crate) fn switch_to(&self, thread: usize) {
        self.current.store(thread, Ordering::Relaxed);
    }

    /// 模拟一次时钟中断
    pub(crate) fn fire(&self) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub(crate) fn blocked(&self) -> Vec<usize> {
        self.blocked.lock().clone()
    }

    pub(crate) fn readied(&self) -> Vec<usize> {
        self.readied.lock().clone()
    }

    pub(crate) fn yields(&self) -> usize {
        self.yields.load(Ordering::Relaxed)
    }
}

impl InterruptController for MockHal {
    fn state(&self) -> InterruptState {
        self.intr.state()
    }

    fn disable(&self) -> InterruptState {
        self.intr.disable()
    }

    fn restore(&self, prior: InterruptState) {
        self.intr.restore(prior)
    }
}

impl ThreadOps for MockHal {
    type Thread = usize;

    fn current_thread(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    fn block(&self) {
        if self.intr.state() == InterruptState::Enabled {
            fatal(SyncFault::InterruptsEnabled);
        }
        self.blocked.lock().push(self.current_thread());
    }

    fn ready(&self, thread: usize) {
        if self.intr.state() == InterruptState::Enabled {
            fatal(SyncFault::InterruptsEnabled);
        }
        self.readied.lock().push(thread);
    }

    fn yield_current(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }
}

impl TimerDevice for MockHal {
    fn now(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    fn set_interrupt_handler(&self, handler: InterruptHandler) {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            fatal(SyncFault::HandlerAlreadyInstalled);
        }
        *slot = Some(handler);
    }
}
