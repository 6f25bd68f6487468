/*! The input engine: spec §4.1's per-segment processing, covering the
SYN-SENT handshake completion, the synchronized-state ACK/data/FIN pipeline,
RFC 5961 challenge ACKs, and duplicate-ACK-driven fast retransmit.

The teacher's `socket::tcp` had no dedicated input module of its own (its
`Socket` drove everything from `iface`'s dispatch loop inline); this follows
the split `tcp_input.c` makes between header-prediction and the full slow
path, minus the header-prediction fast path itself, which duplicates enough
of the slow path's bookkeeping that keeping both would drift out of sync
for a five-timer, SACK-aware TCB (see DESIGN.md).
*/

use super::congestion::CongSignal;
use super::{sack, output, FinIndex, Socket, State};
use crate::config;
use crate::error::DisconnectReason;
use crate::host::{Host, Signals, TimerKind};
use crate::time::{Duration, Instant};
use crate::wire::{TcpControl, TcpRepr, TcpSeqNumber};

/// Feeds one inbound segment to `sock` (spec §4.1).
pub(crate) fn process<H: Host>(
    sock: &mut Socket,
    host: &mut H,
    repr: &TcpRepr,
    payload: &[u8],
    signals: &mut Signals,
) -> super::ProcessResult {
    if sock.state == State::Closed {
        return super::ProcessResult::Done;
    }
    if sock.state == State::TimeWait {
        return time_wait_input(sock, host, repr, signals);
    }
    if repr.control == TcpControl::Rst {
        return handle_rst(sock, host, repr);
    }
    if repr.control == TcpControl::Syn && sock.state != State::SynSent {
        handle_inwindow_syn(sock, host, repr);
        return super::ProcessResult::Done;
    }
    match sock.state {
        State::SynSent => syn_sent_input(sock, host, repr, signals),
        _ => synchronized_input(sock, host, repr, payload, signals),
    }
}

/// Expiry handler for the host's single physical timer (spec §4.7).
pub(crate) fn timer_expired<H: Host>(sock: &mut Socket, host: &mut H, kind: TimerKind, signals: &mut Signals) {
    match kind {
        TimerKind::Delack => {
            sock.timers.cancel(TimerKind::Delack);
            sock.flags.ack_now = true;
            output::dispatch(sock, host, signals);
        }
        TimerKind::Rexmt => {
            sock.timers.cancel(TimerKind::Rexmt);
            let is_syn = sock.flags.need_syn;
            let srtt_ms = (sock.rtte.t_srtt / 8).max(1);
            if sock.rtte.backoff(is_syn) {
                log::debug!("retransmit limit reached, giving up");
                host.connection_lost(DisconnectReason::TimedOut);
                sock.set_state(host, State::Closed);
                return;
            }
            let flight = ((sock.snd_max - sock.snd_una).max(0) as usize).max(sock.t_maxseg);
            sock.cc.cong_signal(CongSignal::Rto, flight, sock.t_maxseg, sock.snd_recover);
            sock.flags.prev_rto_valid = true;
            sock.flags.in_fast_recovery = false;
            sock.snd_nxt = sock.snd_una;
            sock.sack_hint = None;
            let now = host.get_ticks();
            sock.bad_rxt_win = now + Duration::from_millis((srtt_ms / 2) as u64);
            output::dispatch(sock, host, signals);
        }
        TimerKind::Persist => {
            sock.timers.cancel(TimerKind::Persist);
            if sock.snd_wnd == 0 {
                sock.flags.force_data = true;
                output::dispatch(sock, host, signals);
                sock.flags.force_data = false;
            }
        }
        TimerKind::Keep => {
            sock.timers.cancel(TimerKind::Keep);
            let now = host.get_ticks();
            let idle = now.checked_duration_since(sock.last_activity).unwrap_or(Duration::ZERO);
            let give_up_after = config::TCPTV_KEEP_IDLE + config::TCPTV_KEEPINTVL * config::TCPTV_KEEPCNT;
            if idle >= give_up_after {
                host.connection_lost(DisconnectReason::TimedOut);
                sock.set_state(host, State::Closed);
            } else {
                sock.flags.force_data = true;
                output::dispatch(sock, host, signals);
                sock.flags.force_data = false;
                let at = now + config::TCPTV_KEEPINTVL;
                sock.timers.activate(TimerKind::Keep, at);
                host.set_timer(TimerKind::Keep, config::TCPTV_KEEPINTVL.total_millis() as u32);
            }
        }
        TimerKind::TimeWait => {
            sock.timers.cancel(TimerKind::TimeWait);
            host.connection_lost(DisconnectReason::TimeWait);
            sock.set_state(host, State::Closed);
        }
    }
}

fn in_window(sock: &Socket, seq: TcpSeqNumber) -> bool {
    seq >= sock.rcv_nxt && (seq - sock.rcv_nxt) as usize <= sock.rcv_wnd
}

fn arm_time_wait<H: Host>(sock: &mut Socket, host: &mut H, now: Instant) {
    let delay = config::TCP_MSL * 2;
    sock.timers.activate(TimerKind::TimeWait, now + delay);
    host.set_timer(TimerKind::TimeWait, delay.total_millis() as u32);
}

fn arm_delack<H: Host>(sock: &mut Socket, host: &mut H, now: Instant) {
    if !sock.timers.is_active(TimerKind::Delack) {
        sock.timers.activate(TimerKind::Delack, now + config::TCPTV_DELACK);
        host.set_timer(TimerKind::Delack, config::TCPTV_DELACK.total_millis() as u32);
    }
}

/// Rate-limited challenge ACK (RFC 5961 §3.2/§4.2): at most one per
/// [`config::TCP_CHALLENGEACK_LIMIT_PER_SEC`].
fn maybe_send_challenge_ack<H: Host>(sock: &mut Socket, host: &mut H) {
    let now = host.get_ticks();
    let min_gap = Duration::from_millis(1000 / config::TCP_CHALLENGEACK_LIMIT_PER_SEC as u64);
    let due = now.checked_duration_since(sock.challenge_ack_at).map_or(true, |gap| gap >= min_gap);
    if !due {
        return;
    }
    sock.challenge_ack_at = now;
    sock.flags.ack_now = true;
    let mut signals = Signals::new();
    output::dispatch(sock, host, &mut signals);
}

fn handle_rst<H: Host>(sock: &mut Socket, host: &mut H, repr: &TcpRepr) -> super::ProcessResult {
    match sock.state {
        State::SynSent => {
            if repr.ack_number == Some(sock.snd_nxt) {
                host.connection_lost(DisconnectReason::Refused);
                sock.set_state(host, State::Closed);
            }
        }
        _ => {
            if repr.seq_number == sock.rcv_nxt {
                log::debug!("connection reset by peer");
                host.connection_lost(DisconnectReason::Reset);
                sock.set_state(host, State::Closed);
            } else if in_window(sock, repr.seq_number) {
                maybe_send_challenge_ack(sock, host);
            }
        }
    }
    super::ProcessResult::Done
}

/// An in-window SYN on an already-synchronized connection is not a new
/// handshake (that is the listener's job); challenge it per RFC 5961 §4.2
/// instead of reopening the connection.
fn handle_inwindow_syn<H: Host>(sock: &mut Socket, host: &mut H, repr: &TcpRepr) {
    if in_window(sock, repr.seq_number) {
        maybe_send_challenge_ack(sock, host);
    }
}

fn time_wait_input<H: Host>(
    sock: &mut Socket,
    host: &mut H,
    repr: &TcpRepr,
    signals: &mut Signals,
) -> super::ProcessResult {
    if repr.control == TcpControl::Syn && repr.seq_number > sock.rcv_nxt {
        return super::ProcessResult::RelookupRequired;
    }
    if repr.control == TcpControl::Rst {
        host.connection_lost(DisconnectReason::TimeWait);
        sock.set_state(host, State::Closed);
        return super::ProcessResult::Done;
    }
    // A retransmitted FIN or pure ACK: re-ack and restart 2MSL.
    sock.flags.ack_now = true;
    output::dispatch(sock, host, signals);
    arm_time_wait(sock, host, host.get_ticks());
    super::ProcessResult::Done
}

/// Negotiates MSS/window-scale/SACK/timestamps from the peer's SYN or
/// SYN-ACK options (spec §6).
pub(super) fn negotiate_options(sock: &mut Socket, repr: &TcpRepr, now: Instant) {
    if let Some(mss) = repr.max_seg_size {
        sock.t_maxseg = sock.t_maxseg.min(mss as usize).max(config::TCP_MINMSS);
        sock.t_maxopd = sock.t_maxseg;
    }
    if let Some(scale) = repr.window_scale {
        sock.snd_scale = scale;
        sock.rcv_scale = sock.request_r_scale;
        sock.flags.snd_scale_negotiated = true;
        sock.flags.rcv_scale_negotiated = true;
    } else {
        sock.snd_scale = 0;
        sock.rcv_scale = 0;
    }
    sock.flags.sack_permitted = sock.flags.sack_permitted && repr.sack_permitted;
    if let Some(ts) = repr.timestamp {
        sock.ts_recent = ts.tsval;
        sock.ts_recent_age = now;
    } else {
        sock.flags.timestamps = false;
    }
}

fn syn_sent_input<H: Host>(
    sock: &mut Socket,
    host: &mut H,
    repr: &TcpRepr,
    signals: &mut Signals,
) -> super::ProcessResult {
    if repr.control != TcpControl::Syn {
        return super::ProcessResult::Done;
    }
    if let Some(ack) = repr.ack_number {
        if ack <= sock.iss || ack > sock.snd_nxt {
            output::send_reset(sock, host);
            return super::ProcessResult::Done;
        }
    }

    let now = host.get_ticks();
    sock.irs = repr.seq_number;
    sock.rcv_nxt = repr.seq_number + 1;
    sock.last_ack_sent = sock.rcv_nxt;
    negotiate_options(sock, repr, now);

    if let Some(ack) = repr.ack_number {
        sock.snd_una = ack;
        if sock.snd_nxt < ack {
            sock.snd_nxt = ack;
        }
    }

    if sock.snd_una > sock.iss {
        sock.cc.conn_init(sock.t_maxseg, sock.rtte.t_rxtshift > 0);
        sock.flags.need_syn = false;
        sock.set_state(host, State::Established);
        sock.flags.ack_now = true;
        signals.established = true;
        output::dispatch(sock, host, signals);
    } else {
        // Simultaneous open: the peer's bare SYN hasn't acked ours yet.
        sock.set_state(host, State::SynReceived);
        sock.flags.need_syn = true;
        output::dispatch(sock, host, signals);
    }
    super::ProcessResult::Done
}

/// Validates and applies an inbound ACK (spec §4.1/§4.4). Returns `false`
/// if the segment should be dropped without further processing (an
/// unacceptable ACK past `snd_max`, already challenged).
fn process_ack<H: Host>(sock: &mut Socket, host: &mut H, repr: &TcpRepr, signals: &mut Signals) -> bool {
    let Some(ack) = repr.ack_number else { return false };
    if ack > sock.snd_max {
        maybe_send_challenge_ack(sock, host);
        return false;
    }

    if sock.snd_wl1 < repr.seq_number || (sock.snd_wl1 == repr.seq_number && sock.snd_wl2 <= ack) {
        sock.snd_wnd = (repr.window_len as usize) << sock.snd_scale;
        sock.snd_wl1 = repr.seq_number;
        sock.snd_wl2 = ack;
    }

    if ack < sock.snd_una {
        return true;
    }

    if ack > sock.snd_una {
        let now = host.get_ticks();
        let bytes_acked = (ack - sock.snd_una) as usize;
        sock.dupacks = 0;
        sock.rtte.ack_update(now, ack);

        if sock.flags.prev_rto_valid && now <= sock.bad_rxt_win {
            log::trace!("bad RTO detected, restoring pre-RTO congestion state");
            let (_, recovered) = sock.cc.cong_signal(CongSignal::RtoErr, 0, sock.t_maxseg, sock.snd_recover);
            sock.snd_recover = recovered;
            sock.flags.in_fast_recovery = false;
            sock.flags.was_in_fast_recovery = false;
            sock.flags.in_congestion_recovery = false;
            sock.flags.was_in_congestion_recovery = false;
        } else if sock.flags.in_fast_recovery {
            if ack >= sock.snd_recover {
                sock.cc.post_recovery();
                sock.flags.in_fast_recovery = false;
            } else {
                sock.cc.snd_cwnd = sock.cc.snd_cwnd.saturating_sub(bytes_acked).max(sock.t_maxseg);
            }
        } else {
            sock.cc.ack_received(bytes_acked, sock.t_maxseg);
        }
        sock.flags.prev_rto_valid = false;

        sack::on_cumulative_ack(&mut sock.sack_holes, ack, &mut sock.sack_bytes_rexmit);

        let mut completed: u8 = 0;
        sock.send_buf.pop(bytes_acked, |_| completed = completed.saturating_add(1));
        sock.snd_una = ack;
        if sock.snd_nxt < sock.snd_una {
            sock.snd_nxt = sock.snd_una;
        }
        signals.send_done_count = signals.send_done_count.saturating_add(completed);
        signals.forward_progress = true;

        if sock.snd_una == sock.snd_max {
            sock.timers.cancel(TimerKind::Rexmt);
            host.stop_timer(TimerKind::Rexmt);
        } else {
            let at = host.get_ticks() + sock.rtte.t_rxtcur;
            sock.timers.activate(TimerKind::Rexmt, at);
            host.set_timer(TimerKind::Rexmt, sock.rtte.t_rxtcur.total_millis() as u32);
        }
    } else {
        sock.dupacks = sock.dupacks.saturating_add(1);
        if sock.dupacks == config::TCPREXMTTHRESH && !sock.flags.in_fast_recovery {
            log::trace!("entering fast recovery at {} dupacks", sock.dupacks);
            sock.snd_recover = sock.snd_max;
            let flight = (sock.snd_max - sock.snd_una).max(0) as usize;
            sock.cc.cong_signal(CongSignal::NDupAck, flight, sock.t_maxseg, sock.snd_recover);
            sock.flags.in_fast_recovery = true;
            sock.snd_nxt = sock.snd_una;
        }
    }
    true
}

/// Appends in-order data, buffers out-of-order data and its SACK block, and
/// drains any out-of-order runs that the new data makes contiguous (spec
/// §4.5).
fn process_data(sock: &mut Socket, repr: &TcpRepr, payload: &[u8], signals: &mut Signals) {
    if payload.is_empty() || !sock.may_recv() {
        return;
    }
    let offset = repr.seq_number - sock.rcv_nxt;
    if offset == 0 {
        let written = sock.recv_buf.enqueue(payload);
        sock.rcv_nxt = sock.rcv_nxt + written;
        signals.recvbuf_added += written;
        sock.flags.ack_now = true;
        loop {
            let merged = sock.recv_buf.merge_contiguous_prefix();
            if merged == 0 {
                break;
            }
            sock.rcv_nxt = sock.rcv_nxt + merged;
            signals.recvbuf_added += merged;
        }
    } else if offset > 0 {
        let (written, _, new_bytes) = sock.recv_buf.write_at(offset as usize, payload);
        if written > 0 {
            sock.flags.ack_now = true;
        }
        if new_bytes > 0 {
            if sock.sackblks.len() == sock.sackblks.capacity() {
                sock.sackblks.remove(0);
            }
            let _ = sock.sackblks.push((repr.seq_number, repr.seq_number + written));
        }
    } else {
        // Old or partially-duplicate data; re-ack so the peer's own
        // retransmit timer clears promptly.
        sock.flags.ack_now = true;
    }
}

/// Processes a FIN flag, consuming its pseudo-byte of sequence space once
/// it is in order (spec §4.1/§4.3).
fn process_fin<H: Host>(sock: &mut Socket, host: &mut H, repr: &TcpRepr, payload: &[u8], signals: &mut Signals) {
    if repr.control != TcpControl::Fin {
        return;
    }
    let fin_seq = repr.seq_number + payload.len();
    let offset = fin_seq - sock.rcv_nxt;
    if offset == 0 {
        sock.rcv_nxt = sock.rcv_nxt + 1;
        sock.flags.cant_recv_more = true;
        sock.reass_fin_index = FinIndex::Delivered;
        signals.fin_seen = true;
        sock.flags.ack_now = true;
        match sock.state {
            State::SynReceived | State::Established => sock.set_state(host, State::CloseWait),
            State::FinWait1 => sock.set_state(host, State::Closing),
            State::FinWait2 => {
                sock.set_state(host, State::TimeWait);
                arm_time_wait(sock, host, host.get_ticks());
            }
            _ => {}
        }
    } else if offset > 0 {
        sock.reass_fin_index = FinIndex::Pending(offset as usize);
    }
}

fn synchronized_input<H: Host>(
    sock: &mut Socket,
    host: &mut H,
    repr: &TcpRepr,
    payload: &[u8],
    signals: &mut Signals,
) -> super::ProcessResult {
    let now = host.get_ticks();

    if let Some(ts) = repr.timestamp {
        if sock.flags.timestamps && sock.ts_recent != 0 && (ts.tsval as i32).wrapping_sub(sock.ts_recent as i32) < 0 {
            let age = now.checked_duration_since(sock.ts_recent_age).unwrap_or(Duration::ZERO);
            if age < config::TCP_PAWS_IDLE {
                sock.flags.ack_now = true;
                output::dispatch(sock, host, signals);
                return super::ProcessResult::Done;
            }
        }
    }

    if !process_ack(sock, host, repr, signals) {
        return super::ProcessResult::Done;
    }

    if sock.state == State::SynReceived {
        sock.set_state(host, State::Established);
        signals.established = true;
        signals.accepted_connection = true;
        if !host.accepted_connection(sock.local, sock.peer) {
            sock.abort(host);
            return super::ProcessResult::Done;
        }
        sock.cc.conn_init(sock.t_maxseg, false);
    }

    if sock.state == State::FinWait1 && sock.flags.sent_fin && sock.snd_una == sock.snd_max {
        sock.set_state(host, State::FinWait2);
    } else if sock.state == State::Closing && sock.flags.sent_fin && sock.snd_una == sock.snd_max {
        sock.set_state(host, State::TimeWait);
        arm_time_wait(sock, host, now);
    } else if sock.state == State::LastAck && sock.flags.sent_fin && sock.snd_una == sock.snd_max {
        host.connection_lost(DisconnectReason::Normal);
        sock.set_state(host, State::Closed);
        return super::ProcessResult::Done;
    }

    if let Some(ts) = repr.timestamp {
        if sock.flags.timestamps {
            sock.ts_recent = ts.tsval;
            sock.ts_recent_age = now;
        }
    }

    if sock.flags.sack_permitted {
        for (start, end) in repr.sack_ranges.iter().flatten().copied() {
            sack::merge_sack_block(
                &mut sock.sack_holes,
                &mut sock.snd_fack,
                &mut sock.sack_bytes_rexmit,
                TcpSeqNumber::from_u32(start),
                TcpSeqNumber::from_u32(end),
            );
        }
    }

    process_data(sock, repr, payload, signals);
    process_fin(sock, host, repr, payload, signals);

    if sock.flags.ack_now {
        output::dispatch(sock, host, signals);
    } else if sock.flags.delayed_ack {
        arm_delack(sock, host, now);
    }

    super::ProcessResult::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::tcp::tests::FakeHost;
    use crate::storage::SendBuffer;
    use crate::wire::{IpEndpoint, Ipv6Address};

    #[test]
    fn syn_sent_completes_on_syn_ack() {
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut sock = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let mut host = FakeHost::new();
        host.isn = 100;
        let local = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 49152);
        let peer = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 7);
        sock.connect(&mut host, local, peer, true).unwrap();

        let repr = TcpRepr {
            src_port: peer.port,
            dst_port: local.port,
            control: TcpControl::Syn,
            seq_number: TcpSeqNumber::from_u32(500),
            ack_number: Some(sock.snd_nxt),
            window_len: 1000,
            window_scale: None,
            max_seg_size: Some(474),
            sack_permitted: false,
            sack_ranges: [None, None, None],
            timestamp: None,
            ece: false,
            cwr: false,
            payload_len: 0,
        };
        let mut signals = Signals::new();
        let result = process(&mut sock, &mut host, &repr, &[], &mut signals);
        assert_eq!(result, super::super::ProcessResult::Done);
        assert_eq!(sock.state(), State::Established);
        assert!(signals.established);
    }

    #[test]
    fn inorder_data_appends_and_acks() {
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut sock = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let mut host = FakeHost::new();
        sock.state = State::Established;
        sock.rcv_nxt = TcpSeqNumber::from_u32(1000);
        sock.snd_una = TcpSeqNumber::from_u32(1);
        sock.snd_nxt = TcpSeqNumber::from_u32(1);
        sock.snd_max = TcpSeqNumber::from_u32(1);
        sock.rcv_wnd = 64;

        let repr = TcpRepr {
            src_port: 7,
            dst_port: 49152,
            control: TcpControl::None,
            seq_number: TcpSeqNumber::from_u32(1000),
            ack_number: Some(TcpSeqNumber::from_u32(1)),
            window_len: 1000,
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            sack_ranges: [None, None, None],
            timestamp: None,
            ece: false,
            cwr: false,
            payload_len: 5,
        };
        let mut signals = Signals::new();
        process(&mut sock, &mut host, &repr, b"hello", &mut signals);
        assert_eq!(signals.recvbuf_added, 5);
        assert_eq!(sock.rcv_nxt, TcpSeqNumber::from_u32(1005));
        assert_eq!(host.sent.len(), 1);
    }

    #[test]
    fn three_dup_acks_trigger_fast_recovery() {
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut sock = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let mut host = FakeHost::new();
        sock.state = State::Established;
        sock.rcv_nxt = TcpSeqNumber::from_u32(1000);
        sock.snd_una = TcpSeqNumber::from_u32(1);
        sock.snd_nxt = TcpSeqNumber::from_u32(1001);
        sock.snd_max = TcpSeqNumber::from_u32(1001);
        sock.rcv_wnd = 64;

        let repr = TcpRepr {
            src_port: 7,
            dst_port: 49152,
            control: TcpControl::None,
            seq_number: TcpSeqNumber::from_u32(1000),
            ack_number: Some(TcpSeqNumber::from_u32(1)),
            window_len: 1000,
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            sack_ranges: [None, None, None],
            timestamp: None,
            ece: false,
            cwr: false,
            payload_len: 0,
        };
        let mut signals = Signals::new();
        for _ in 0..3 {
            process(&mut sock, &mut host, &repr, &[], &mut signals);
        }
        assert!(sock.flags.in_fast_recovery);
    }

    #[test]
    fn rst_on_rcv_nxt_resets_connection() {
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut sock = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let mut host = FakeHost::new();
        sock.state = State::Established;
        sock.rcv_nxt = TcpSeqNumber::from_u32(1000);
        sock.rcv_wnd = 64;

        let repr = TcpRepr {
            src_port: 7,
            dst_port: 49152,
            control: TcpControl::Rst,
            seq_number: TcpSeqNumber::from_u32(1000),
            ack_number: None,
            window_len: 0,
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            sack_ranges: [None, None, None],
            timestamp: None,
            ece: false,
            cwr: false,
            payload_len: 0,
        };
        let mut signals = Signals::new();
        process(&mut sock, &mut host, &repr, &[], &mut signals);
        assert_eq!(sock.state(), State::Closed);
    }
}
