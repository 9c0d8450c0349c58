//! Per-process signal state
//!
//! 32 signal numbers, each with a handler slot and a pending bit.
//! Registration and delivery are bookkeeping: `kill` records the signal
//! against the target and applies the default action for unhandled
//! signals. Asynchronous invocation of user handlers is deliberately not
//! implemented; KILL and TERM cannot be masked and force the target to
//! exit with status `128 + signum`.

pub const SIGNAL_COUNT: usize = 32;

pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;

/// One handler registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalSlot {
    /// User-space handler entry point (0 = none registered).
    pub handler: u32,
    pub flags: u32,
}

/// What an unhandled signal does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    /// Force the target to exit with `128 + signum`.
    Terminate,
    /// Drop the signal.
    Ignore,
}

pub fn default_action(signum: u32) -> DefaultAction {
    match signum {
        SIGKILL | SIGTERM => DefaultAction::Terminate,
        _ => DefaultAction::Ignore,
    }
}

/// Whether a registered handler may override the default.
pub fn can_be_handled(signum: u32) -> bool {
    !matches!(signum, SIGKILL | SIGTERM)
}

/// Signal bookkeeping carried in each PCB.
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    slots: [SignalSlot; SIGNAL_COUNT],
    pending: u32,
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            slots: [SignalSlot { handler: 0, flags: 0 }; SIGNAL_COUNT],
            pending: 0,
        }
    }

    /// Record a handler for `signum`. Returns false for out-of-range
    /// numbers.
    pub fn register(&mut self, signum: u32, handler: u32, flags: u32) -> bool {
        if signum as usize >= SIGNAL_COUNT {
            return false;
        }
        self.slots[signum as usize] = SignalSlot { handler, flags };
        true
    }

    pub fn handler(&self, signum: u32) -> Option<SignalSlot> {
        let slot = *self.slots.get(signum as usize)?;
        if slot.handler == 0 {
            None
        } else {
            Some(slot)
        }
    }

    /// Mark `signum` pending. Last writer wins; the bit carries no count.
    pub fn set_pending(&mut self, signum: u32) {
        if (signum as usize) < SIGNAL_COUNT {
            self.pending |= 1 << signum;
        }
    }

    pub fn is_pending(&self, signum: u32) -> bool {
        (signum as usize) < SIGNAL_COUNT && self.pending & (1 << signum) != 0
    }

    pub fn clear_pending(&mut self, signum: u32) {
        if (signum as usize) < SIGNAL_COUNT {
            self.pending &= !(1 << signum);
        }
    }

    pub fn pending_mask(&self) -> u32 {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_and_term_cannot_be_handled() {
        assert!(!can_be_handled(SIGKILL));
        assert!(!can_be_handled(SIGTERM));
        assert!(can_be_handled(SIGINT));
        assert_eq!(default_action(SIGKILL), DefaultAction::Terminate);
        assert_eq!(default_action(SIGTERM), DefaultAction::Terminate);
        assert_eq!(default_action(SIGUSR1), DefaultAction::Ignore);
    }

    #[test]
    fn pending_bits_are_last_writer_wins() {
        let mut state = SignalState::new();
        state.set_pending(SIGUSR1);
        state.set_pending(SIGUSR1);
        assert!(state.is_pending(SIGUSR1));
        state.clear_pending(SIGUSR1);
        assert!(!state.is_pending(SIGUSR1));
        assert_eq!(state.pending_mask(), 0);
    }

    #[test]
    fn out_of_range_signals_are_rejected() {
        let mut state = SignalState::new();
        assert!(!state.register(32, 0x1000, 0));
        state.set_pending(40);
        assert_eq!(state.pending_mask(), 0);
        assert!(state.handler(99).is_none());
    }

    #[test]
    fn handler_registration_round_trips() {
        let mut state = SignalState::new();
        assert!(state.register(SIGINT, 0x804_8000, 1));
        let slot = state.handler(SIGINT).unwrap();
        assert_eq!(slot.handler, 0x804_8000);
        assert_eq!(slot.flags, 1);
        assert!(state.handler(SIGQUIT).is_none());
    }
}
