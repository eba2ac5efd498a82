//! Global interrupt masking
//!
//! # Copyright
//! Copyright (C) 2020 QUARTIQ GmbH - All Rights Reserved
//! Unauthorized usage, editing, or copying is strictly prohibited.
//! Proprietary and confidential.
//!
//! # Description
//! When a bus is configured with `no_interrupt`, interrupts are disabled by the start condition and
//! restored by the matching stop condition. The masked region therefore spans several independent
//! calls and cannot be expressed as a closure, so the bus holds on to the restore state in between.
//!
//! Callers must issue `stop()` after every `start()`, including failed ones, and must not use the
//! bus from an interrupt handler while a transaction is open.

/// Control over the global interrupt mask.
pub trait InterruptControl {
    /// Whatever is needed to restore the mask to its state before `disable()`.
    type State;

    /// Disable interrupts.
    ///
    /// # Returns
    /// The previous interrupt state.
    fn disable(&mut self) -> Self::State;

    /// Restore the interrupt state captured by `disable()`.
    fn restore(&mut self, state: Self::State);
}

/// Interrupt control through the `critical-section` implementation of the platform.
#[derive(Debug, Default, Copy, Clone)]
pub struct CriticalSection;

impl InterruptControl for CriticalSection {
    type State = critical_section::RestoreState;

    fn disable(&mut self) -> Self::State {
        // Safety: the bus restores every acquired state exactly once in `stop()`, and never
        // acquires a second state while one is held.
        unsafe { critical_section::acquire() }
    }

    fn restore(&mut self, state: Self::State) {
        // Safety: `state` was returned from the matching `acquire()` above.
        unsafe { critical_section::release(state) }
    }
}

/// Holds the restore state between a start and the matching stop condition.
pub(crate) struct InterruptGuard<I: InterruptControl> {
    control: I,
    saved: Option<I::State>,
}

impl<I: InterruptControl> InterruptGuard<I> {
    pub fn new(control: I) -> Self {
        Self {
            control,
            saved: None,
        }
    }

    /// Disable interrupts unless they are already masked by this guard.
    pub fn enter(&mut self) {
        if self.saved.is_none() {
            self.saved.replace(self.control.disable());
        }
    }

    /// Restore the interrupt state captured by `enter()`, if any.
    pub fn exit(&mut self) {
        if let Some(state) = self.saved.take() {
            self.control.restore(state);
        }
    }

    pub fn into_inner(mut self) -> I {
        self.exit();
        self.control
    }
}
