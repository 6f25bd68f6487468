/*! The five logical timers of spec §4.7, collapsed onto one physical
per-connection timer via [`Timers::next_expiry`].

Generalizes the teacher's 4-variant `Timer` enum (`Idle`/`Retransmit`/
`FastRetransmit`/`Close`), which folds REXMT and the fast-retransmit signal
into one type and has no PERSIST or KEEP at all, back out to the full
5-timer set `tcp_timer.c` implements — those are the timers spec.md names
in §2 and §4.7, and duplicate-ACK/fast-retransmit is not itself a timer in
the original (it is driven synchronously off the dupack counter in the
input path, not a deadline), so it does not get its own slot here.
*/

use crate::host::TimerKind;
use crate::time::Instant;

/// Per-kind expiry times; `None` means inactive. Indexed positionally by
/// [`TimerKind`] via [`kind_index`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Timers {
    expiry: [Option<Instant>; 5],
}

const fn kind_index(kind: TimerKind) -> usize {
    match kind {
        TimerKind::Delack => 0,
        TimerKind::Rexmt => 1,
        TimerKind::Persist => 2,
        TimerKind::Keep => 3,
        TimerKind::TimeWait => 4,
    }
}

impl Timers {
    pub const fn new() -> Timers {
        Timers { expiry: [None; 5] }
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.expiry[kind_index(kind)].is_some()
    }

    pub fn expiry_of(&self, kind: TimerKind) -> Option<Instant> {
        self.expiry[kind_index(kind)]
    }

    /// Arms `kind` to expire at `at`. At most one of REXMT and PERSIST may
    /// be active at once (spec §3 invariant); arming one clears the other.
    pub fn activate(&mut self, kind: TimerKind, at: Instant) {
        self.expiry[kind_index(kind)] = Some(at);
        match kind {
            TimerKind::Rexmt => self.expiry[kind_index(TimerKind::Persist)] = None,
            TimerKind::Persist => self.expiry[kind_index(TimerKind::Rexmt)] = None,
            _ => {}
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.expiry[kind_index(kind)] = None;
    }

    /// The earliest active expiry, if any, and which timer it belongs to —
    /// what the host's single physical timer should be set to.
    pub fn next_expiry(&self) -> Option<(TimerKind, Instant)> {
        const KINDS: [TimerKind; 5] = [
            TimerKind::Delack,
            TimerKind::Rexmt,
            TimerKind::Persist,
            TimerKind::Keep,
            TimerKind::TimeWait,
        ];
        let mut best: Option<(TimerKind, Instant)> = None;
        for (i, expiry) in self.expiry.iter().enumerate() {
            if let Some(at) = expiry {
                if best.map_or(true, |(_, cur)| *at < cur) {
                    best = Some((KINDS[i], *at));
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activating_rexmt_clears_persist() {
        let mut t = Timers::new();
        t.activate(TimerKind::Persist, Instant::from_millis(100));
        t.activate(TimerKind::Rexmt, Instant::from_millis(200));
        assert!(!t.is_active(TimerKind::Persist));
        assert!(t.is_active(TimerKind::Rexmt));
    }

    #[test]
    fn next_expiry_picks_earliest() {
        let mut t = Timers::new();
        t.activate(TimerKind::Keep, Instant::from_millis(500));
        t.activate(TimerKind::Delack, Instant::from_millis(50));
        assert_eq!(t.next_expiry(), Some((TimerKind::Delack, Instant::from_millis(50))));
    }
}
