/*! NewReno congestion control (RFC 5681 + RFC 6582), spec §4.4.

Flattens the original's `cc_algo` function-pointer vtable
(`original_source/.../cc.h`) into a plain struct with methods: the
original's own `CC_ALGO(tp)` macro already hardcodes
`&newreno_cc_algo`, so the indirection never varied at runtime, and the
teacher's own `congestion::AnyController` stub is a single concrete type
for the same reason — this keeps that shape rather than reintroducing a
dispatch layer spec.md never asks for (see DESIGN.md).
*/

use crate::wire::TcpSeqNumber;

/// The signal that triggered an `ack_received` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckType {
    /// A cumulative ACK that covers new data outside of recovery.
    New,
    /// A cumulative ACK received while in fast recovery.
    InRecovery,
}

/// The signal that triggered a `cong_signal` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongSignal {
    /// Three duplicate ACKs observed.
    NDupAck,
    /// REXMT fired.
    Rto,
    /// A post-RTO ACK arrived for data sent before the RTO (spec §4.4
    /// "bad-RTO recovery").
    RtoErr,
}

/// MSS thresholds from RFC 5681's legacy initial-window rule (spec §6:
/// `initcwnd_segments = 0` selects this rule rather than a fixed segment
/// count).
const IW_MSS_HIGH: usize = 2190;
const IW_MSS_LOW: usize = 1095;

/// TCP_MAXWIN scaled bound for `snd_ssthresh` at connection init.
const TCP_MAXWIN: usize = 65535;

#[derive(Debug, Clone, Copy)]
pub struct NewReno {
    pub snd_cwnd: usize,
    pub snd_ssthresh: usize,
    snd_cwnd_prev: usize,
    snd_ssthresh_prev: usize,
    snd_recover_prev: TcpSeqNumber,
}

impl NewReno {
    pub const fn new() -> NewReno {
        NewReno {
            snd_cwnd: 0,
            snd_ssthresh: 0,
            snd_cwnd_prev: 0,
            snd_ssthresh_prev: 0,
            snd_recover_prev: TcpSeqNumber(0),
        }
    }

    /// Seeds `snd_cwnd`/`snd_ssthresh` at connection establishment (spec
    /// §4.4 "CC conn-init").
    pub fn conn_init(&mut self, maxseg: usize, syn_was_retransmitted: bool) {
        self.snd_cwnd = if syn_was_retransmitted {
            maxseg
        } else if maxseg > IW_MSS_HIGH {
            2 * maxseg
        } else if maxseg > IW_MSS_LOW {
            3 * maxseg
        } else {
            4 * maxseg
        };
        self.snd_ssthresh = TCP_MAXWIN;
    }

    /// A new cumulative ACK arrived; in classic NewReno this grows cwnd
    /// (slow-start or congestion-avoidance) outside of recovery, or (during
    /// recovery) is handled by the input engine's partial-ACK logic instead
    /// of here.
    pub fn ack_received(&mut self, acked: usize, maxseg: usize) {
        if self.snd_cwnd <= self.snd_ssthresh {
            // Slow start.
            self.snd_cwnd += acked.min(maxseg);
        } else {
            // Congestion avoidance: roughly one MSS per RTT.
            let incr = (maxseg * maxseg) / self.snd_cwnd.max(1);
            self.snd_cwnd += incr.max(1).min(maxseg);
        }
    }

    /// A loss signal arrived (spec §4.4). `snd_recover` is the caller's
    /// current value, saved on `Rto` and handed back (restored) on
    /// `RtoErr` along with `snd_cwnd`/`snd_ssthresh`; the caller is
    /// responsible for writing the returned value back and, on `RtoErr`,
    /// clearing the fast-/congestion-recovery flags (spec §4.4 "bad-RTO
    /// recovery", Testable Property 10).
    pub fn cong_signal(&mut self, signal: CongSignal, flight_size: usize, maxseg: usize, snd_recover: TcpSeqNumber) -> (usize, TcpSeqNumber) {
        match signal {
            CongSignal::NDupAck => {
                let win = (flight_size / 2 / maxseg).max(2) * maxseg;
                self.snd_ssthresh = win;
                (win, snd_recover)
            }
            CongSignal::Rto => {
                self.snd_cwnd_prev = self.snd_cwnd;
                self.snd_ssthresh_prev = self.snd_ssthresh;
                self.snd_recover_prev = snd_recover;
                let win = (flight_size / 2 / maxseg).max(2) * maxseg;
                self.snd_ssthresh = win;
                self.snd_cwnd = maxseg;
                (win, snd_recover)
            }
            CongSignal::RtoErr => {
                self.snd_cwnd = self.snd_cwnd_prev;
                self.snd_ssthresh = self.snd_ssthresh_prev;
                (self.snd_ssthresh, self.snd_recover_prev)
            }
        }
    }

    /// Post-recovery reset (deflate cwnd back to ssthresh on exiting fast
    /// recovery).
    pub fn post_recovery(&mut self) {
        self.snd_cwnd = self.snd_ssthresh;
    }

    /// Idle-restart: if the connection has been idle at least one RTO,
    /// slow-start from scratch rather than bursting at the old cwnd (RFC
    /// 5681 §4.1).
    pub fn after_idle(&mut self, maxseg: usize) {
        self.conn_init(maxseg, false);
    }
}

impl Default for NewReno {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_init_picks_legacy_iw() {
        let mut cc = NewReno::new();
        cc.conn_init(474, false);
        assert_eq!(cc.snd_cwnd, 4 * 474);
    }

    #[test]
    fn ndupack_halves_flight() {
        let mut cc = NewReno::new();
        cc.conn_init(474, false);
        let (ssthresh, _) = cc.cong_signal(CongSignal::NDupAck, 4000, 474, TcpSeqNumber(0));
        assert_eq!(ssthresh, (4000 / 2 / 474).max(2) * 474);
    }

    #[test]
    fn rto_err_restores_saved_state() {
        let mut cc = NewReno::new();
        cc.conn_init(474, false);
        let cwnd_before = cc.snd_cwnd;
        let ssthresh_before = cc.snd_ssthresh;
        let recover_before = TcpSeqNumber(1000);
        cc.cong_signal(CongSignal::Rto, 4000, 474, recover_before);
        assert_ne!(cc.snd_cwnd, cwnd_before);
        let (_, recovered) = cc.cong_signal(CongSignal::RtoErr, 4000, 474, TcpSeqNumber(9999));
        assert_eq!(cc.snd_cwnd, cwnd_before);
        assert_eq!(recovered, recover_before);
        assert_eq!(cc.snd_ssthresh, ssthresh_before);
    }
}
