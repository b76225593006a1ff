/*++

Licensed under the Apache-2.0 license.

File Name:

    clock.rs

Abstract:

    File contains the system Clock and the Timer peripherals use to defer
    work to a later clock edge.

--*/
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashSet},
    rc::Rc,
};

use crate::Bus;

/// Peripherals that latch register writes on a clock edge keep a clone of
/// `Timer` and ask for a [`Bus::poll`] on the edge where the write lands.
///
/// # Example
///
/// ```
/// use dvsoc_emu_bus::{ActionHandle, Bus, BusError, Clock, Timer};
/// use dvsoc_emu_types::{RvAddr, RvData, RvSize};
///
/// struct Latch {
///     timer: Timer,
///     staged: Option<RvData>,
///     storage: RvData,
///     commit: Option<ActionHandle>,
/// }
/// impl Bus for Latch {
///     fn read(&mut self, _size: RvSize, _addr: RvAddr) -> Result<RvData, BusError> {
///         Ok(self.storage)
///     }
///     fn write(&mut self, _size: RvSize, _addr: RvAddr, val: RvData) -> Result<(), BusError> {
///         self.staged = Some(val);
///         self.commit = Some(self.timer.schedule_poll_in(1));
///         Ok(())
///     }
///     fn poll(&mut self) {
///         if self.timer.fired(&mut self.commit) {
///             self.storage = self.staged.take().unwrap_or(self.storage);
///         }
///     }
/// }
///
/// let clock = Clock::new();
/// let mut latch = Latch { timer: clock.timer(), staged: None, storage: 0, commit: None };
/// latch.write(RvSize::Word, 0, 7).unwrap();
/// assert_eq!(latch.read(RvSize::Word, 0), Ok(0));
/// clock.tick(&mut latch);
/// assert_eq!(latch.read(RvSize::Word, 0), Ok(7));
/// ```
#[derive(Clone)]
pub struct Timer {
    clock: Rc<ClockImpl>,
}

impl Timer {
    /// Constructs a new timer bound to the specified clock.
    pub fn new(clock: &Clock) -> Self {
        Self {
            clock: Rc::clone(&clock.clock),
        }
    }

    /// Number of clock edges since simulation start.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now.get()
    }

    /// If the scheduled time for `action` has come, `action` is set to None
    /// and the function returns true. Otherwise (or if action is None) it
    /// returns false.
    pub fn fired(&self, action: &mut Option<ActionHandle>) -> bool {
        let has_fired = match action {
            Some(handle) => {
                debug_assert_eq!(
                    handle.0.owner,
                    Rc::as_ptr(&self.clock),
                    "Supplied action was not created by this timer."
                );
                handle.0.time <= self.now()
            }
            None => false,
        };
        if has_fired {
            *action = None;
        }
        has_fired
    }

    /// Schedules a call to [`Bus::poll()`] `ticks_from_now` edges in the future.
    pub fn schedule_poll_in(&self, ticks_from_now: u64) -> ActionHandle {
        self.schedule_action_in(ticks_from_now, TimerAction::Poll)
    }

    /// Schedules `action` `ticks_from_now` edges in the future.
    pub fn schedule_action_in(&self, ticks_from_now: u64, action: TimerAction) -> ActionHandle {
        let time = self.now().checked_add(ticks_from_now).unwrap_or_else(|| {
            panic!("Cannot schedule a timer action {ticks_from_now} cycles from now.")
        });
        self.clock.schedule(time, action)
    }

    /// Cancels a previously scheduled action.
    ///
    /// # Panics
    ///
    /// Panics if the supplied `ActionHandle` was not created by this Timer.
    pub fn cancel(&self, handle: ActionHandle) {
        assert_eq!(
            handle.0.owner,
            Rc::as_ptr(&self.clock),
            "Supplied action was not created by this timer."
        );
        self.clock.pending.borrow_mut().remove(&handle.0);
    }
}

/// The single clock domain of the SoC.
pub struct Clock {
    clock: Rc<ClockImpl>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Constructs a new Clock with the cycle counter set to 0.
    pub fn new() -> Clock {
        Self {
            clock: Rc::new(ClockImpl {
                now: Cell::new(0),
                next_id: Cell::new(0),
                pending: RefCell::new(BTreeSet::new()),
            }),
        }
    }

    /// Constructs a `Timer` associated with this clock.
    pub fn timer(&self) -> Timer {
        Timer::new(self)
    }

    /// Number of clock edges since simulation start.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now.get()
    }

    /// Advances the clock by `delta` edges and returns the actions that
    /// became due.
    pub fn increment(&self, delta: u64) -> HashSet<TimerAction> {
        let now = self.now().checked_add(delta).unwrap_or_else(|| {
            panic!("Cannot increment the current time by {delta} clock cycles.")
        });
        self.clock.now.set(now);
        self.clock.take_fired()
    }

    /// Advances the clock by `delta` edges and delivers due actions to `bus`.
    ///
    /// A warm reset wins over any poll due on the same edge: writes that
    /// would have landed on that edge are lost with the reset.
    pub fn increment_and_process_timer_actions(
        &self,
        delta: u64,
        bus: &mut impl Bus,
    ) -> HashSet<TimerAction> {
        let fired_actions = self.increment(delta);
        if fired_actions.contains(&TimerAction::WarmReset) {
            bus.warm_reset();
        } else if fired_actions.contains(&TimerAction::Poll) {
            bus.poll();
        }
        fired_actions
    }

    /// One rising edge.
    pub fn tick(&self, bus: &mut impl Bus) -> HashSet<TimerAction> {
        self.increment_and_process_timer_actions(1, bus)
    }

    /// `cycles` rising edges, delivering actions on every edge.
    pub fn run(&self, cycles: u64, bus: &mut impl Bus) {
        for _ in 0..cycles {
            self.tick(bus);
        }
    }
}

/// Represents an action scheduled with a `Timer`. Passed to
/// [`Timer::fired()`] or [`Timer::cancel`].
pub struct ActionHandle(ScheduledAction);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TimerAction {
    Poll,
    WarmReset,
}

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
struct ScheduledAction {
    /// Clock edge the action is due on; first so the set is ordered by time.
    time: u64,

    id: u64,

    /// Identifies the clock the action was scheduled on.
    owner: *const ClockImpl,

    action: TimerAction,
}

struct ClockImpl {
    now: Cell<u64>,
    next_id: Cell<u64>,
    pending: RefCell<BTreeSet<ScheduledAction>>,
}

impl ClockImpl {
    fn schedule(self: &Rc<Self>, time: u64, action: TimerAction) -> ActionHandle {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        let scheduled = ScheduledAction {
            time,
            id,
            owner: Rc::as_ptr(self),
            action,
        };
        self.pending.borrow_mut().insert(scheduled);
        ActionHandle(scheduled)
    }

    fn take_fired(&self) -> HashSet<TimerAction> {
        let now = self.now.get();
        let mut pending = self.pending.borrow_mut();
        let mut fired = HashSet::new();
        while let Some(first) = pending.first().copied() {
            if first.time > now {
                break;
            }
            pending.remove(&first);
            fired.insert(first.action);
        }
        fired
    }
}
