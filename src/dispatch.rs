//! Deferred Begin and End events
//!
//! The arbiter's signal handler runs at the highest interrupt priority and
//! has to return within microseconds. Ranging takes milliseconds, so the
//! handler only triggers an event, and the ranging runs in that event's
//! handler at a lower priority.
//!
//! On the nRF52, the events are software interrupts: Begin pends SWI3/EGU3,
//! End pends SWI4/EGU4. The hook installed with [`Dispatcher::with_hook`] does
//! the pending. Everything else is plain atomics, so a [`Dispatcher`] can
//! live in a `static` shared between the interrupt handlers.

use core::sync::atomic::{AtomicBool, Ordering};

use log::warn;

/// A deferred event
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Start a ranging activation
    Begin,
    /// Stop the current ranging activation
    End,
}

/// Hands Begin and End from the signal handler to the ranging
///
/// At most one activation is live at any time. A Begin that is triggered
/// while an activation is live, or while another Begin is still pending, is
/// dropped.
///
/// # Example
///
/// ``` rust
/// use rtt_ranging::dispatch::Dispatcher;
///
/// static DISPATCHER: Dispatcher = Dispatcher::new();
///
/// // In the signal handler
/// assert!(DISPATCHER.trigger_begin());
///
/// // In the Begin handler
/// let ran = DISPATCHER.activate(|_end_signal| {
///     // Nothing can begin while this runs
///     assert!(!DISPATCHER.trigger_begin());
///     42
/// });
///
/// assert_eq!(ran, Some(42));
/// ```
#[derive(Debug)]
pub struct Dispatcher {
    begin: AtomicBool,
    end: AtomicBool,
    live: AtomicBool,
    hook: Option<fn(Event)>,
}

impl Dispatcher {
    /// Creates a dispatcher that only keeps track of pending events
    ///
    /// Whoever runs the activations has to poll [`Dispatcher::activate`].
    pub const fn new() -> Self {
        Dispatcher {
            begin: AtomicBool::new(false),
            end: AtomicBool::new(false),
            live: AtomicBool::new(false),
            hook: None,
        }
    }

    /// Creates a dispatcher that calls `hook` for every accepted event
    ///
    /// The hook is called from the signal handler, so it must be as quick as
    /// pending an interrupt.
    pub const fn with_hook(hook: fn(Event)) -> Self {
        Dispatcher {
            begin: AtomicBool::new(false),
            end: AtomicBool::new(false),
            live: AtomicBool::new(false),
            hook: Some(hook),
        }
    }

    /// Triggers a Begin
    ///
    /// Returns `false`, if the Begin was dropped.
    pub fn trigger_begin(&self) -> bool {
        if self.live.load(Ordering::Acquire) {
            warn!("dispatch: Begin dropped, activation still live");
            return false;
        }
        if self
            .begin
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("dispatch: Begin dropped, another one is pending");
            return false;
        }

        self.pend(Event::Begin);
        true
    }

    /// Triggers an End
    ///
    /// A live activation sees it through the flag passed to its closure in
    /// [`Dispatcher::activate`].
    pub fn trigger_end(&self) {
        self.end.store(true, Ordering::Release);
        self.pend(Event::End);
    }

    /// Runs an activation, if a Begin is pending
    ///
    /// Call this from the Begin handler. `activation` receives the End flag,
    /// which it should observe through
    /// [`Deadline::with_end_signal`](crate::wait::Deadline::with_end_signal).
    /// Any End left over from before this Begin is cleared first.
    ///
    /// Returns `None`, if no Begin was pending.
    pub fn activate<F, R>(&self, activation: F) -> Option<R>
    where
        F: FnOnce(&AtomicBool) -> R,
    {
        if !self.begin.swap(false, Ordering::AcqRel) {
            return None;
        }

        self.end.store(false, Ordering::Release);
        self.live.store(true, Ordering::Release);

        let result = activation(&self.end);

        self.live.store(false, Ordering::Release);
        Some(result)
    }

    /// Acknowledges an End
    ///
    /// Call this from the End handler. Returns `true`, if an End was pending.
    pub fn take_end(&self) -> bool {
        self.end.swap(false, Ordering::AcqRel)
    }

    /// Returns `true`, while an activation runs
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Returns `true`, if a Begin is waiting for its handler
    pub fn begin_pending(&self) -> bool {
        self.begin.load(Ordering::Acquire)
    }

    fn pend(&self, event: Event) {
        if let Some(hook) = self.hook {
            hook(event);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32;

    #[test]
    fn pending_begin_absorbs_duplicates() {
        let dispatcher = Dispatcher::new();

        assert!(dispatcher.trigger_begin());
        assert!(!dispatcher.trigger_begin());
        assert!(dispatcher.begin_pending());

        assert_eq!(dispatcher.activate(|_| ()), Some(()));
        assert_eq!(dispatcher.activate(|_| ()), None);
    }

    #[test]
    fn end_reaches_live_activation() {
        let dispatcher = Dispatcher::new();
        dispatcher.trigger_begin();

        let saw_end = dispatcher.activate(|end_signal| {
            assert!(dispatcher.is_live());
            dispatcher.trigger_end();
            end_signal.load(Ordering::Acquire)
        });

        assert_eq!(saw_end, Some(true));
        assert!(!dispatcher.is_live());
        assert!(dispatcher.take_end());
        assert!(!dispatcher.take_end());
    }

    #[test]
    fn stale_end_is_cleared_on_begin() {
        let dispatcher = Dispatcher::new();
        dispatcher.trigger_end();
        dispatcher.trigger_begin();

        let saw_end = dispatcher.activate(|end_signal| end_signal.load(Ordering::Acquire));

        assert_eq!(saw_end, Some(false));
    }

    #[test]
    fn hook_sees_accepted_events_only() {
        static BEGINS: AtomicU32 = AtomicU32::new(0);
        static ENDS: AtomicU32 = AtomicU32::new(0);

        fn hook(event: Event) {
            match event {
                Event::Begin => BEGINS.fetch_add(1, Ordering::Relaxed),
                Event::End => ENDS.fetch_add(1, Ordering::Relaxed),
            };
        }

        let dispatcher = Dispatcher::with_hook(hook);
        dispatcher.trigger_begin();
        dispatcher.trigger_begin();
        dispatcher.trigger_end();

        assert_eq!(BEGINS.load(Ordering::Relaxed), 1);
        assert_eq!(ENDS.load(Ordering::Relaxed), 1);
    }
}
