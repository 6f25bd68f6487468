/*! RTT estimation and RTO backoff (spec §4.4), generalizing the teacher's
`RttEstimator` (which keeps Jacobson/Karels smoothing but no backoff table
or PAWS-adjacent bookkeeping) with the `t_*` fields and backoff-table logic
spec.md names explicitly.
*/

use crate::config::{TCPTV_CPU_VAR, TCPTV_MIN, TCPTV_REXMTMAX, TCP_BACKOFF, TCP_MAXRXTSHIFT, TCP_SYN_BACKOFF};
use crate::time::{Duration, Instant};
use crate::wire::TcpSeqNumber;

#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    /// Smoothed RTT, scaled by 8.
    pub t_srtt: u32,
    /// RTT variance, scaled by 4.
    pub t_rttvar: u32,
    pub t_rttmin: u32,
    pub t_rttbest: u32,
    /// Current RTO.
    pub t_rxtcur: Duration,
    /// Backoff exponent into [`TCP_BACKOFF`]/[`TCP_SYN_BACKOFF`].
    pub t_rxtshift: u32,
    /// When the segment being timed was sent, if any.
    pub t_rtttime: Option<Instant>,
    pub t_rtseq: TcpSeqNumber,
    pub t_rttlow: u32,
    pub t_rttupdated: u32,
    pub t_softerror: bool,
}

impl RttEstimator {
    pub const fn new() -> RttEstimator {
        RttEstimator {
            t_srtt: 0,
            t_rttvar: 0,
            t_rttmin: TCPTV_MIN.total_millis() as u32,
            t_rttbest: 0,
            t_rxtcur: TCPTV_MIN,
            t_rxtshift: 0,
            t_rtttime: None,
            t_rtseq: TcpSeqNumber(0),
            t_rttlow: 0,
            t_rttupdated: 0,
            t_softerror: false,
        }
    }

    /// Begins timing `seq`, if no sample is already in flight.
    pub fn start_timing(&mut self, now: Instant, seq: TcpSeqNumber) {
        if self.t_rtttime.is_none() {
            self.t_rtttime = Some(now);
            self.t_rtseq = seq;
        }
    }

    /// A segment acked `ack` at `now`; if it covers the timed sequence,
    /// folds the sample into `t_srtt`/`t_rttvar` and recomputes `t_rxtcur`
    /// (spec §4.4 "RTT").
    pub fn ack_update(&mut self, now: Instant, ack: TcpSeqNumber) {
        let Some(sent_at) = self.t_rtttime else { return };
        if ack <= self.t_rtseq {
            return;
        }
        let r = now.checked_duration_since(sent_at).unwrap_or(Duration::ZERO).total_millis() as i64;
        self.t_rtttime = None;
        self.t_rxtshift = 0;
        self.t_rttupdated += 1;
        if self.t_rttbest == 0 || (r as u32) < self.t_rttbest {
            self.t_rttbest = r as u32;
        }

        if self.t_srtt == 0 {
            // First sample.
            self.t_srtt = (r * 8) as u32;
            self.t_rttvar = (r * 2) as u32;
        } else {
            let delta = r - (self.t_srtt as i64 / 8);
            self.t_srtt = (self.t_srtt as i64 + delta).max(1) as u32;
            let abs_delta = delta.unsigned_abs() as i64;
            let rttvar_delta = abs_delta - (self.t_rttvar as i64 / 4);
            self.t_rttvar = (self.t_rttvar as i64 + rttvar_delta).max(1) as u32;
        }
        self.recompute_rxtcur();
    }

    fn recompute_rxtcur(&mut self) {
        let base = (self.t_srtt / 8).max(self.t_rttmin) + self.t_rttvar;
        let slop = TCPTV_CPU_VAR.total_millis() as u32;
        let rto = Duration::from_millis((base * 2 + slop) as u64);
        self.t_rxtcur = clamp_rto(rto);
    }

    /// REXMT fired: back off the RTO per the backoff table, reseeding
    /// `t_srtt` to zero once backoff passes a quarter of the max shift
    /// (spec §4.4), returning whether the shift has now exceeded
    /// `TCP_MAXRXTSHIFT` (the caller should drop the connection).
    pub fn backoff(&mut self, is_syn: bool) -> bool {
        self.t_rxtshift += 1;
        if self.t_rxtshift > TCP_MAXRXTSHIFT {
            return true;
        }
        let table = if is_syn { &TCP_SYN_BACKOFF } else { &TCP_BACKOFF };
        let mult = table[self.t_rxtshift as usize];
        let base_rto = (self.t_srtt / 8).max(self.t_rttmin) + self.t_rttvar;
        let rto = Duration::from_millis((base_rto * mult) as u64);
        self.t_rxtcur = clamp_rto(rto);
        if self.t_rxtshift > TCP_MAXRXTSHIFT / 4 {
            self.t_srtt = 0;
        }
        self.t_rtttime = None;
        false
    }
}

fn clamp_rto(rto: Duration) -> Duration {
    if rto < TCPTV_MIN {
        TCPTV_MIN
    } else if rto > TCPTV_REXMTMAX {
        TCPTV_REXMTMAX
    } else {
        rto
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_srtt_and_rttvar() {
        let mut rtte = RttEstimator::new();
        rtte.start_timing(Instant::from_millis(0), TcpSeqNumber(100));
        rtte.ack_update(Instant::from_millis(50), TcpSeqNumber(101));
        assert_eq!(rtte.t_srtt, 50 * 8);
        assert_eq!(rtte.t_rttvar, 50 * 2);
        assert!(rtte.t_rxtcur >= TCPTV_MIN);
    }

    #[test]
    fn rxtcur_stays_within_bounds() {
        let mut rtte = RttEstimator::new();
        rtte.start_timing(Instant::from_millis(0), TcpSeqNumber(1));
        rtte.ack_update(Instant::from_millis(1), TcpSeqNumber(2));
        assert!(rtte.t_rxtcur >= TCPTV_MIN && rtte.t_rxtcur <= TCPTV_REXMTMAX);
    }

    #[test]
    fn backoff_past_max_shift_signals_drop() {
        let mut rtte = RttEstimator::new();
        let mut dropped = false;
        for _ in 0..(TCP_MAXRXTSHIFT + 1) {
            dropped = rtte.backoff(false);
        }
        assert!(dropped);
    }
}
