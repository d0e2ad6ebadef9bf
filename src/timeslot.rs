//! Negotiating radio time from the arbiter
//!
//! The radio is shared with a BLE stack, which owns it by default. The
//! [`Scheduler`] asks the stack's arbitration service for exclusive
//! timeslots, keeps each slot going through extensions for as long as its
//! budget allows, and leaves every slot in time, before the arbiter takes
//! the radio back.
//!
//! Inside a slot, two deadlines are armed on a [`SliceTimer`]:
//!
//! - The *extend* deadline, `extend_margin_us` before the slot ends. When it
//!   expires, the scheduler asks for an extension, if the budget has room
//!   for one.
//! - The *safety* deadline, `safety_margin_us` before the slot ends. When it
//!   expires, the slot is given up and the next one requested.
//!
//! A granted extension moves both deadlines back. A denied extension leaves
//! them alone, and the slot ends at its safety deadline.
//!
//! The scheduler doesn't range itself. It triggers Begin and End through the
//! [`Dispatcher`], and the ranging runs at a lower priority.

use core::convert::TryFrom;

use log::{debug, info, trace, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ConfigError, Priority, TimeslotConfig},
    dispatch::Dispatcher,
};

/// The arbitration service that hands out timeslots
///
/// Once a session is open, the service reports back by calling
/// [`Scheduler::on_slice_signal`] and [`Scheduler::on_session_signal`] from
/// its own interrupt handlers. Wiring those calls up is the platform's job.
pub trait ArbitrationService {
    /// An error reported by the service
    type Error;

    /// Opens a session
    fn open_session(&mut self) -> Result<(), Self::Error>;

    /// Requests a timeslot
    ///
    /// Returning `Ok` only means the request was accepted. Whether the slot
    /// is granted is signalled later.
    fn request_slice(&mut self, request: &SliceRequest) -> Result<(), Self::Error>;

    /// Closes the session
    fn close_session(&mut self) -> Result<(), Self::Error>;
}

/// A timer running inside a timeslot
///
/// Holds the two deadlines of a slot, in µs from the slot's start.
pub trait SliceTimer {
    /// Arms a deadline
    fn arm(&mut self, deadline: SliceDeadline, at_us: u32);

    /// Moves every armed deadline back
    fn shift(&mut self, by_us: u32);

    /// Disarms both deadlines
    fn stop(&mut self);

    /// Returns the deadline that expired, clearing its event
    ///
    /// If both expired, the safety deadline is returned first.
    fn take_expired(&mut self) -> Option<SliceDeadline>;
}

/// One of the two deadlines inside a timeslot
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SliceDeadline {
    /// The slot has to be left now
    Safety,
    /// An extension should be requested now
    Extend,
}

/// A request for a timeslot
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SliceRequest {
    /// When the slot may start
    pub kind: RequestKind,
    /// Priority of the slot
    pub priority: Priority,
    /// Length of the slot
    pub length_us: u32,
    /// How long an earliest-possible slot may be waited for
    pub timeout_us: u32,
}

impl SliceRequest {
    /// The request every slot of a session starts with
    pub fn earliest(config: &TimeslotConfig) -> Self {
        SliceRequest {
            kind: RequestKind::Earliest,
            priority: config.priority,
            length_us: config.initial_length_us,
            timeout_us: config.earliest_timeout_us,
        }
    }
}

/// When a requested timeslot may start
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum RequestKind {
    /// As soon as possible
    Earliest,
    /// At a fixed distance from the start of the previous slot
    Normal {
        /// Distance from the start of the previous slot
        distance_us: u32,
    },
}

/// A signal delivered during a timeslot
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SliceSignal {
    /// The slot has started
    Start = 0,
    /// The in-slot timer fired
    Timer = 1,
    /// The radio raised an interrupt
    Radio = 2,
    /// The last extension was denied
    ExtendFailed = 3,
    /// The last extension was granted
    ExtendSucceeded = 4,
}

/// A signal about the session as a whole
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum SessionSignal {
    /// The requested slot collided with another activity
    Blocked = 4,
    /// The requested slot was canceled by a higher priority activity
    Canceled = 5,
    /// A signal handler returned an invalid action
    InvalidReturn = 6,
    /// No more slots are scheduled
    Idle = 7,
    /// The session was closed
    Closed = 8,
}

impl SliceSignal {
    /// Decodes a raw signal, returning `None` for unknown values
    pub fn from_raw(raw: u8) -> Option<Self> {
        SliceSignal::try_from(raw).ok()
    }
}

impl SessionSignal {
    /// Decodes a raw event, returning `None` for events of other subsystems
    pub fn from_raw(raw: u32) -> Option<Self> {
        SessionSignal::try_from(raw).ok()
    }
}

/// What the arbiter should do after a slice signal was handled
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SliceAction {
    /// Carry on
    None,
    /// Extend the current slot
    Extend {
        /// Length to extend by
        length_us: u32,
    },
    /// End the current slot
    End,
    /// End the current slot, and schedule the next one
    RequestAndEnd(SliceRequest),
}

/// Raw action codes as understood by the arbiter
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive)]
#[repr(u8)]
pub enum RawAction {
    /// See [`SliceAction::None`]
    None = 0,
    /// See [`SliceAction::Extend`]
    Extend = 1,
    /// See [`SliceAction::End`]
    End = 2,
    /// See [`SliceAction::RequestAndEnd`]
    RequestAndEnd = 3,
}

impl SliceAction {
    /// Returns the raw action code
    pub fn raw(&self) -> u8 {
        let action = match self {
            SliceAction::None => RawAction::None,
            SliceAction::Extend { .. } => RawAction::Extend,
            SliceAction::End => RawAction::End,
            SliceAction::RequestAndEnd(_) => RawAction::RequestAndEnd,
        };

        action.into()
    }
}

/// Bookkeeping of the current slot
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SliceState {
    /// Length of the slot, including all extensions
    pub granted_length_us: u32,
    /// Time added through extensions
    ///
    /// Never exceeds `budget_us - budget_reserve_us`.
    pub elapsed_total_us: u32,
    /// Ceiling for the extensions of this slot
    pub budget_us: u32,
}

/// Where the scheduler is in the life of a session
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerState {
    /// No session
    Closed,
    /// A session is open, and a slot has been requested
    SessionOpen,
    /// A slot is running
    SliceGranted,
    /// A slot is running, and an extension has been requested
    Extending,
    /// The slot is being left
    SliceEnding,
}

/// Connection events of the BLE stack
///
/// Ranging only makes sense while the peer is connected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// The peer connected
    Connected,
    /// The peer disconnected
    Disconnected,
}

/// An error that prevented a session from starting
///
/// If this is returned, the ranging is unavailable.
#[derive(Debug, Eq, PartialEq)]
pub enum SessionError<E> {
    /// The session couldn't be opened
    Open(E),
    /// The first slot couldn't be requested
    Request(E),
    /// A session is open already
    AlreadyOpen,
}

/// Keeps a stream of timeslots going
///
/// # Example
///
/// ``` rust
/// use rtt_ranging::{
///     config::TimeslotConfig,
///     dispatch::Dispatcher,
///     sim::{SimArbiter, SimSliceTimer},
///     timeslot::{Scheduler, SchedulerState, SliceAction, SliceDeadline, SliceSignal},
/// };
///
/// let dispatcher = Dispatcher::new();
/// let mut scheduler = Scheduler::new(
///     TimeslotConfig::default(),
///     SimArbiter::new(),
///     SimSliceTimer::new(),
///     &dispatcher,
/// )
/// .unwrap();
/// scheduler.set_ranging_enabled(true);
///
/// scheduler.open_session().unwrap();
/// assert_eq!(scheduler.on_slice_signal(SliceSignal::Start), SliceAction::None);
/// assert_eq!(scheduler.state(), SchedulerState::SliceGranted);
/// assert!(dispatcher.begin_pending());
///
/// scheduler.timer_mut().expire(SliceDeadline::Extend);
/// assert_eq!(
///     scheduler.on_slice_signal(SliceSignal::Timer),
///     SliceAction::Extend { length_us: 10_000 },
/// );
/// ```
pub struct Scheduler<'d, A, T> {
    config: TimeslotConfig,
    arbiter: A,
    timer: T,
    dispatcher: &'d Dispatcher,
    state: SchedulerState,
    slice: SliceState,
    ranging_enabled: bool,
}

impl<'d, A, T> Scheduler<'d, A, T>
where
    A: ArbitrationService,
    T: SliceTimer,
{
    /// Creates a new instance of `Scheduler`
    ///
    /// Fails, if `config` doesn't pass [`TimeslotConfig::validate`]. Ranging
    /// starts out disabled. See [`Scheduler::set_ranging_enabled`].
    pub fn new(
        config: TimeslotConfig,
        arbiter: A,
        timer: T,
        dispatcher: &'d Dispatcher,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Scheduler {
            config,
            arbiter,
            timer,
            dispatcher,
            state: SchedulerState::Closed,
            slice: SliceState::default(),
            ranging_enabled: false,
        })
    }

    /// Opens a session, and requests its first slot
    ///
    /// If the slot can't be requested, the session is closed again.
    pub fn open_session(&mut self) -> Result<(), SessionError<A::Error>> {
        if self.state != SchedulerState::Closed {
            return Err(SessionError::AlreadyOpen);
        }

        self.arbiter.open_session().map_err(SessionError::Open)?;

        if let Err(error) = self.arbiter.request_slice(&SliceRequest::earliest(&self.config)) {
            if self.arbiter.close_session().is_err() {
                warn!("timeslot: failed to close session after failed request");
            }
            return Err(SessionError::Request(error));
        }

        self.state = SchedulerState::SessionOpen;
        info!("timeslot: session open");

        Ok(())
    }

    /// Closes the session
    ///
    /// Signals that arrive afterwards are ignored.
    pub fn close_session(&mut self) -> Result<(), A::Error> {
        if self.state == SchedulerState::Closed {
            return Ok(());
        }

        self.timer.stop();
        self.state = SchedulerState::Closed;
        self.slice = SliceState::default();
        info!("timeslot: session closed");

        self.arbiter.close_session()
    }

    /// Handles a signal about the session
    ///
    /// A blocked or canceled request is requested again right away, as often
    /// as it takes. If that request fails, it's logged and nothing else
    /// happens.
    pub fn on_session_signal(&mut self, signal: SessionSignal) {
        trace!("timeslot: session signal {:?}", signal);

        if self.state == SchedulerState::Closed {
            return;
        }

        match signal {
            SessionSignal::Blocked | SessionSignal::Canceled => {
                self.state = SchedulerState::SessionOpen;
                let request = SliceRequest::earliest(&self.config);
                if self.arbiter.request_slice(&request).is_err() {
                    warn!("timeslot: request after {:?} failed", signal);
                }
            }
            SessionSignal::Idle | SessionSignal::Closed | SessionSignal::InvalidReturn => (),
        }
    }

    /// Handles a signal during a slot
    ///
    /// This is called from the arbiter's highest priority interrupt and
    /// returns right away. The returned action has to be handed back to the
    /// arbiter.
    pub fn on_slice_signal(&mut self, signal: SliceSignal) -> SliceAction {
        trace!("timeslot: slice signal {:?}", signal);

        if self.state == SchedulerState::Closed {
            return SliceAction::None;
        }

        match signal {
            SliceSignal::Start => self.start(),
            SliceSignal::Timer => match self.timer.take_expired() {
                Some(SliceDeadline::Safety) => self.leave(),
                Some(SliceDeadline::Extend) => self.extend(),
                None => SliceAction::None,
            },
            SliceSignal::ExtendSucceeded => self.extended(),
            SliceSignal::ExtendFailed => {
                if self.state == SchedulerState::Extending {
                    debug!("timeslot: extension denied");
                    self.state = SchedulerState::SliceGranted;
                }
                SliceAction::None
            }
            SliceSignal::Radio => SliceAction::None,
        }
    }

    /// Decodes and handles a raw slice signal
    ///
    /// Unknown signals are ignored.
    pub fn on_raw_slice_signal(&mut self, raw: u8) -> u8 {
        SliceSignal::from_raw(raw)
            .map(|signal| self.on_slice_signal(signal))
            .unwrap_or(SliceAction::None)
            .raw()
    }

    /// Enables or disables ranging inside the slots
    ///
    /// While disabled, slots are still negotiated, but no Begin is triggered.
    pub fn set_ranging_enabled(&mut self, enabled: bool) {
        debug!("timeslot: ranging enabled: {}", enabled);
        self.ranging_enabled = enabled;
    }

    /// Enables ranging while the peer is connected
    pub fn on_link_event(&mut self, event: LinkEvent) {
        self.set_ranging_enabled(event == LinkEvent::Connected);
    }

    /// Returns whether ranging is enabled
    pub fn ranging_enabled(&self) -> bool {
        self.ranging_enabled
    }

    /// Returns the state of the session
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Returns the bookkeeping of the current slot
    pub fn slice(&self) -> &SliceState {
        &self.slice
    }

    /// Returns a reference to the arbitration service
    pub fn arbiter(&self) -> &A {
        &self.arbiter
    }

    /// Returns a mutable reference to the arbitration service
    pub fn arbiter_mut(&mut self) -> &mut A {
        &mut self.arbiter
    }

    /// Returns a mutable reference to the slice timer
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    fn start(&mut self) -> SliceAction {
        let length = self.config.initial_length_us;

        self.state = SchedulerState::SliceGranted;
        self.slice = SliceState {
            granted_length_us: length,
            elapsed_total_us: 0,
            budget_us: self.config.budget_us,
        };

        self.timer.stop();
        self.timer
            .arm(SliceDeadline::Safety, length.saturating_sub(self.config.safety_margin_us));
        self.timer
            .arm(SliceDeadline::Extend, length.saturating_sub(self.config.extend_margin_us));

        debug!("timeslot: slot started");
        self.begin();

        SliceAction::None
    }

    fn leave(&mut self) -> SliceAction {
        self.timer.stop();
        self.state = SchedulerState::SliceEnding;
        self.dispatcher.trigger_end();

        debug!(
            "timeslot: leaving slot after {} µs",
            self.slice.granted_length_us,
        );

        SliceAction::RequestAndEnd(SliceRequest::earliest(&self.config))
    }

    fn extend(&mut self) -> SliceAction {
        let extension = self.config.extension_length_us;
        let fits = self
            .slice
            .elapsed_total_us
            .checked_add(extension)
            .map_or(false, |total| total <= self.config.budget_ceiling_us());

        if !fits {
            debug!("timeslot: budget spent, slot runs out");
            return SliceAction::None;
        }

        self.state = SchedulerState::Extending;
        SliceAction::Extend {
            length_us: extension,
        }
    }

    fn extended(&mut self) -> SliceAction {
        if self.state != SchedulerState::Extending {
            warn!("timeslot: extension granted, but none was requested");
            return SliceAction::None;
        }
        self.state = SchedulerState::SliceGranted;

        let extension = self.config.extension_length_us;
        let elapsed = match self
            .slice
            .elapsed_total_us
            .checked_add(extension)
            .filter(|&total| total <= self.config.budget_ceiling_us())
        {
            Some(elapsed) => elapsed,
            None => {
                warn!("timeslot: extension granted beyond the budget");
                return SliceAction::None;
            }
        };

        self.timer
            .shift(extension - self.config.extension_correction_us);
        self.slice.elapsed_total_us = elapsed;
        self.slice.granted_length_us = self.slice.granted_length_us.saturating_add(extension);

        trace!("timeslot: extended to {} µs", self.slice.granted_length_us);
        self.begin();

        SliceAction::None
    }

    fn begin(&self) {
        if self.ranging_enabled {
            self.dispatcher.trigger_begin();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimArbiter, SimArbiterError, SimSliceTimer};

    fn scheduler(dispatcher: &Dispatcher) -> Scheduler<SimArbiter, SimSliceTimer> {
        Scheduler::new(
            TimeslotConfig::default(),
            SimArbiter::new(),
            SimSliceTimer::new(),
            dispatcher,
        )
        .unwrap()
    }

    fn started(dispatcher: &Dispatcher) -> Scheduler<SimArbiter, SimSliceTimer> {
        let mut scheduler = scheduler(dispatcher);
        scheduler.set_ranging_enabled(true);
        scheduler.open_session().unwrap();
        scheduler.on_slice_signal(SliceSignal::Start);
        scheduler
    }

    fn expire(
        scheduler: &mut Scheduler<SimArbiter, SimSliceTimer>,
        deadline: SliceDeadline,
    ) -> SliceAction {
        scheduler.timer_mut().expire(deadline);
        scheduler.on_slice_signal(SliceSignal::Timer)
    }

    #[test]
    fn open_requests_earliest_slot() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = scheduler(&dispatcher);

        scheduler.open_session().unwrap();

        let config = TimeslotConfig::default();
        assert_eq!(scheduler.state(), SchedulerState::SessionOpen);
        assert_eq!(scheduler.arbiter().request_count(), 1);
        assert_eq!(
            scheduler.arbiter().last_request(),
            Some(SliceRequest {
                kind: RequestKind::Earliest,
                priority: Priority::High,
                length_us: config.initial_length_us,
                timeout_us: config.earliest_timeout_us,
            })
        );
        assert_eq!(scheduler.open_session(), Err(SessionError::AlreadyOpen));
    }

    #[test]
    fn failed_open_is_fatal() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = scheduler(&dispatcher);
        scheduler.arbiter_mut().refuse_open();

        assert_eq!(
            scheduler.open_session(),
            Err(SessionError::Open(SimArbiterError::OpenRefused))
        );
        assert_eq!(scheduler.state(), SchedulerState::Closed);
    }

    #[test]
    fn failed_first_request_closes_session() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = scheduler(&dispatcher);
        scheduler.arbiter_mut().refuse_requests(1);

        assert_eq!(
            scheduler.open_session(),
            Err(SessionError::Request(SimArbiterError::RequestRefused))
        );
        assert!(!scheduler.arbiter().is_open());
        assert_eq!(scheduler.state(), SchedulerState::Closed);
    }

    #[test]
    fn start_arms_both_deadlines() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);

        assert_eq!(scheduler.state(), SchedulerState::SliceGranted);
        assert_eq!(scheduler.timer_mut().armed(SliceDeadline::Safety), Some(9_750));
        assert_eq!(scheduler.timer_mut().armed(SliceDeadline::Extend), Some(9_500));
        assert_eq!(scheduler.slice().elapsed_total_us, 0);
        assert!(dispatcher.begin_pending());
    }

    #[test]
    fn rerequests_until_granted() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = scheduler(&dispatcher);

        scheduler.open_session().unwrap();
        scheduler.on_session_signal(SessionSignal::Canceled);
        scheduler.on_session_signal(SessionSignal::Blocked);
        let action = scheduler.on_slice_signal(SliceSignal::Start);

        assert_eq!(scheduler.arbiter().request_count(), 3);
        assert_eq!(scheduler.state(), SchedulerState::SliceGranted);
        assert_eq!(action, SliceAction::None);
    }

    #[test]
    fn failed_rerequest_is_absorbed() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = scheduler(&dispatcher);
        scheduler.open_session().unwrap();
        scheduler.arbiter_mut().refuse_requests(1);

        scheduler.on_session_signal(SessionSignal::Blocked);

        assert_eq!(scheduler.arbiter().request_count(), 2);
        assert_eq!(scheduler.state(), SchedulerState::SessionOpen);
    }

    #[test]
    fn idle_signals_change_nothing() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);

        scheduler.on_session_signal(SessionSignal::Idle);
        scheduler.on_session_signal(SessionSignal::InvalidReturn);
        scheduler.on_session_signal(SessionSignal::Closed);

        assert_eq!(scheduler.arbiter().request_count(), 1);
        assert_eq!(scheduler.state(), SchedulerState::SliceGranted);
    }

    #[test]
    fn extension_moves_deadlines() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);
        dispatcher.activate(|_| ());

        assert_eq!(
            expire(&mut scheduler, SliceDeadline::Extend),
            SliceAction::Extend { length_us: 10_000 }
        );
        assert_eq!(scheduler.state(), SchedulerState::Extending);

        assert_eq!(
            scheduler.on_slice_signal(SliceSignal::ExtendSucceeded),
            SliceAction::None
        );

        assert_eq!(scheduler.timer_mut().armed(SliceDeadline::Safety), Some(19_725));
        assert_eq!(scheduler.timer_mut().armed(SliceDeadline::Extend), Some(19_475));
        assert_eq!(scheduler.slice().elapsed_total_us, 10_000);
        assert_eq!(scheduler.slice().granted_length_us, 20_000);
        assert!(dispatcher.begin_pending());
    }

    #[test]
    fn denied_extension_ends_at_safety_deadline() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);

        expire(&mut scheduler, SliceDeadline::Extend);
        assert_eq!(
            scheduler.on_slice_signal(SliceSignal::ExtendFailed),
            SliceAction::None
        );
        assert_eq!(scheduler.timer_mut().armed(SliceDeadline::Safety), Some(9_750));

        let action = expire(&mut scheduler, SliceDeadline::Safety);

        assert_eq!(
            action,
            SliceAction::RequestAndEnd(SliceRequest::earliest(&TimeslotConfig::default()))
        );
        assert_eq!(scheduler.state(), SchedulerState::SliceEnding);
        assert!(dispatcher.take_end());
    }

    #[test]
    fn exhausted_budget_lets_slot_run_out() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);
        let config = TimeslotConfig::default();

        let mut extensions = 0;
        loop {
            match expire(&mut scheduler, SliceDeadline::Extend) {
                SliceAction::Extend { .. } => {
                    scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
                    extensions += 1;
                }
                action => {
                    assert_eq!(action, SliceAction::None);
                    break;
                }
            }

            assert!(scheduler.slice().elapsed_total_us <= config.budget_ceiling_us());
        }

        // 995 ms of budget, 10 ms per extension
        assert_eq!(extensions, 99);
        assert_eq!(scheduler.slice().elapsed_total_us, 990_000);
        assert_eq!(scheduler.state(), SchedulerState::SliceGranted);

        match expire(&mut scheduler, SliceDeadline::Safety) {
            SliceAction::RequestAndEnd(_) => (),
            action => panic!("Unexpected action: {:?}", action),
        }
    }

    #[test]
    fn budget_holds_for_any_extension_length() {
        for &extension_length_us in &[1_000, 7_000, 10_000, 333_333, 995_000, 995_001] {
            let dispatcher = Dispatcher::new();
            let config = TimeslotConfig {
                extension_length_us,
                ..TimeslotConfig::default()
            };
            let mut scheduler =
                Scheduler::new(config, SimArbiter::new(), SimSliceTimer::new(), &dispatcher)
                    .unwrap();
            scheduler.open_session().unwrap();
            scheduler.on_slice_signal(SliceSignal::Start);

            for _ in 0..2_000 {
                if let SliceAction::Extend { .. } = expire(&mut scheduler, SliceDeadline::Extend) {
                    scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
                }

                assert!(scheduler.slice().elapsed_total_us <= config.budget_ceiling_us());
            }
        }
    }

    #[test]
    fn unrequested_grants_are_ignored() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);
        dispatcher.activate(|_| ());

        for _ in 0..150 {
            assert_eq!(
                scheduler.on_slice_signal(SliceSignal::ExtendSucceeded),
                SliceAction::None
            );
        }

        assert_eq!(scheduler.slice().elapsed_total_us, 0);
        assert_eq!(scheduler.slice().granted_length_us, 10_000);
        assert_eq!(scheduler.timer_mut().armed(SliceDeadline::Safety), Some(9_750));
        assert_eq!(scheduler.state(), SchedulerState::SliceGranted);
        assert!(!dispatcher.begin_pending());

        // A duplicated grant only counts once
        expire(&mut scheduler, SliceDeadline::Extend);
        scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
        scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
        assert_eq!(scheduler.slice().elapsed_total_us, 10_000);

        // So does one that arrives while the slot is being left
        expire(&mut scheduler, SliceDeadline::Safety);
        scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
        assert_eq!(scheduler.slice().elapsed_total_us, 10_000);
        assert_eq!(scheduler.state(), SchedulerState::SliceEnding);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dispatcher = Dispatcher::new();
        let config = TimeslotConfig {
            extend_margin_us: 20_000,
            ..TimeslotConfig::default()
        };

        let result = Scheduler::new(config, SimArbiter::new(), SimSliceTimer::new(), &dispatcher);

        assert_eq!(result.err(), Some(ConfigError::MarginExceedsSlot));
    }

    #[test]
    fn start_resets_elapsed_time() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);

        expire(&mut scheduler, SliceDeadline::Extend);
        scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
        expire(&mut scheduler, SliceDeadline::Safety);
        scheduler.on_slice_signal(SliceSignal::Start);

        assert_eq!(scheduler.slice().elapsed_total_us, 0);
        assert_eq!(scheduler.slice().granted_length_us, 10_000);
    }

    #[test]
    fn disabled_ranging_still_negotiates() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = scheduler(&dispatcher);
        scheduler.open_session().unwrap();

        scheduler.on_slice_signal(SliceSignal::Start);
        assert!(!dispatcher.begin_pending());
        assert_eq!(
            expire(&mut scheduler, SliceDeadline::Extend),
            SliceAction::Extend { length_us: 10_000 }
        );

        scheduler.on_link_event(LinkEvent::Connected);
        scheduler.on_slice_signal(SliceSignal::ExtendSucceeded);
        assert!(dispatcher.begin_pending());

        scheduler.on_link_event(LinkEvent::Disconnected);
        assert!(!scheduler.ranging_enabled());
    }

    #[test]
    fn closed_scheduler_ignores_signals() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);

        scheduler.close_session().unwrap();
        scheduler.on_session_signal(SessionSignal::Blocked);

        assert_eq!(scheduler.state(), SchedulerState::Closed);
        assert!(!scheduler.arbiter().is_open());
        assert_eq!(scheduler.arbiter().request_count(), 1);
        assert_eq!(scheduler.on_slice_signal(SliceSignal::Start), SliceAction::None);
        assert_eq!(scheduler.state(), SchedulerState::Closed);
    }

    #[test]
    fn raw_signals_round_trip_the_arbiter_codes() {
        let dispatcher = Dispatcher::new();
        let mut scheduler = started(&dispatcher);

        assert_eq!(SliceSignal::from_raw(4), Some(SliceSignal::ExtendSucceeded));
        assert_eq!(SliceSignal::from_raw(9), None);
        assert_eq!(SessionSignal::from_raw(5), Some(SessionSignal::Canceled));
        assert_eq!(SessionSignal::from_raw(2), None);

        scheduler.timer_mut().expire(SliceDeadline::Extend);
        assert_eq!(scheduler.on_raw_slice_signal(1), 1);
        assert_eq!(scheduler.on_raw_slice_signal(200), 0);

        scheduler.timer_mut().expire(SliceDeadline::Safety);
        assert_eq!(scheduler.on_raw_slice_signal(1), 3);
    }
}
