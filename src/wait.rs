//! Bounded waiting on non-blocking operations
//!
//! Every wait in the measurement loop is bounded, either by a hardware event
//! or by the activation's deadline. The peer may never answer, and the loop
//! still has to hand the radio back in time.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::timer::CountDown;

/// The deadline of an activation
///
/// Wraps a hardware countdown. Countdown timers typically report their expiry
/// once and then restart, so this latches the first expiry and reports it
/// from then on.
///
/// Optionally observes an external end signal as well, so an activation also
/// stops when its window is about to be taken away.
pub struct Deadline<'a, T> {
    timer: T,
    expired: bool,
    end_signal: Option<&'a AtomicBool>,
}

impl<'a, T> Deadline<'a, T>
where
    T: CountDown,
{
    /// Starts the countdown and wraps it
    pub fn start<D>(mut timer: T, duration: D) -> Self
    where
        D: Into<T::Time>,
    {
        timer.start(duration);

        Deadline {
            timer,
            expired: false,
            end_signal: None,
        }
    }

    /// Also treat the given flag as an expired deadline, once it is set
    pub fn with_end_signal(mut self, end_signal: &'a AtomicBool) -> Self {
        self.end_signal = Some(end_signal);
        self
    }

    /// Returns `true`, once the deadline has passed
    pub fn expired(&mut self) -> bool {
        if self.expired {
            return true;
        }

        if self.timer.wait().is_ok() {
            self.expired = true;
        }
        if let Some(end_signal) = self.end_signal {
            if end_signal.load(Ordering::Acquire) {
                self.expired = true;
            }
        }

        self.expired
    }

    /// Releases the countdown timer
    pub fn free(self) -> T {
        self.timer
    }
}

/// Polls an operation until it completes or a bound is reached
///
/// The deadline is checked before every poll, so it wins any race against an
/// operation that would complete in the same iteration. If `limit` is
/// `Some(n)`, the operation is polled at most `n` times.
///
/// # Example
///
/// ``` rust
/// use rtt_ranging::{
///     sim::SimCountDown,
///     wait::{block_until, Deadline, TimeoutError},
/// };
///
/// let mut deadline = Deadline::start(SimCountDown::default(), 100u32);
///
/// let mut polls = 0;
/// let result: Result<(), TimeoutError<()>> = block_until(&mut deadline, Some(8), || {
///     polls += 1;
///     Err(nb::Error::WouldBlock)
/// });
///
/// assert_eq!(result, Err(TimeoutError::Timeout));
/// assert_eq!(polls, 8);
/// ```
pub fn block_until<T, R, E, F>(
    deadline: &mut Deadline<T>,
    limit: Option<u32>,
    mut op: F,
) -> Result<R, TimeoutError<E>>
where
    T: CountDown,
    F: FnMut() -> nb::Result<R, E>,
{
    let mut polls = 0u32;

    loop {
        if deadline.expired() {
            break Err(TimeoutError::Deadline);
        }
        if let Some(limit) = limit {
            if polls >= limit {
                break Err(TimeoutError::Timeout);
            }
        }
        polls += 1;

        match op() {
            Ok(result) => break Ok(result),
            Err(nb::Error::WouldBlock) => (),
            Err(nb::Error::Other(error)) => break Err(TimeoutError::Other(error)),
        }
    }
}

/// An error that can be a timeout or another error
#[derive(Debug, Eq, PartialEq)]
pub enum TimeoutError<T> {
    /// The activation's deadline passed
    Deadline,

    /// The operation didn't complete within its poll limit
    Timeout,

    /// Another error occured
    Other(T),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCountDown;

    #[test]
    fn deadline_latches() {
        let mut deadline = Deadline::start(SimCountDown::default(), 2u32);

        assert!(!deadline.expired());
        assert!(deadline.expired());

        // The simulated timer restarts after expiring, like a periodic
        // hardware timer. The deadline must stay expired regardless.
        assert!(deadline.expired());
        assert!(deadline.expired());
    }

    #[test]
    fn end_signal_expires_deadline() {
        let end = AtomicBool::new(false);
        let mut deadline = Deadline::start(SimCountDown::default(), 1_000u32).with_end_signal(&end);

        assert!(!deadline.expired());
        end.store(true, Ordering::Release);
        assert!(deadline.expired());
    }

    #[test]
    fn completes_before_limit() {
        let mut deadline = Deadline::start(SimCountDown::default(), 1_000u32);

        let mut polls = 0;
        let result: Result<u8, TimeoutError<()>> = block_until(&mut deadline, Some(10), || {
            polls += 1;
            if polls == 3 {
                Ok(7)
            } else {
                Err(nb::Error::WouldBlock)
            }
        });

        assert_eq!(result, Ok(7));
    }

    #[test]
    fn deadline_wins_over_ready_operation() {
        let mut deadline = Deadline::start(SimCountDown::default(), 1u32);

        let result: Result<u8, TimeoutError<()>> = block_until(&mut deadline, None, || Ok(1));

        assert_eq!(result, Err(TimeoutError::Deadline));
    }

    #[test]
    fn other_errors_are_passed_through() {
        let mut deadline = Deadline::start(SimCountDown::default(), 1_000u32);

        let result: Result<(), TimeoutError<u8>> =
            block_until(&mut deadline, None, || Err(nb::Error::Other(3)));

        assert_eq!(result, Err(TimeoutError::Other(3)));
    }
}
