/*! The output engine: spec §4.2's decision procedure for whether to send a
segment and what to put in it.
*/

use super::{sack, Socket, State};
use crate::config;
use crate::host::{Host, Signals, TimerKind};
use crate::wire::{self, TcpControl, TcpPacket, TcpRepr, TcpSeqNumber, TcpTimestampRepr};

/// Runs the full decision procedure once and, if a segment is warranted,
/// emits it via `host`.
pub(crate) fn dispatch<H: Host>(sock: &mut Socket, host: &mut H, signals: &mut Signals) {
    let now = host.get_ticks();

    // 1. Idle restart.
    if sock.snd_max == sock.snd_una || (sock.flags.last_was_idle && idle_for(sock, now) >= sock.rtte.t_rxtcur) {
        sock.cc.after_idle(sock.t_maxseg);
    }
    sock.flags.last_was_idle = false;

    // 2. SACK retransmit preference.
    let mut rexmit_seq: Option<TcpSeqNumber> = None;
    let mut rexmit_len = 0usize;
    if sock.flags.in_fast_recovery && sock.flags.sack_permitted {
        if let Some(idx) = sack::next_rexmit_hole(&sock.sack_holes, sock.sack_hint) {
            let hole = sock.sack_holes.get(idx);
            sock.sack_hint = Some(idx);
            rexmit_seq = Some(hole.rxmit);
            rexmit_len = (hole.end - hole.rxmit).max(0) as usize;
        }
    }

    // 3. Length.
    let off = (sock.snd_nxt - sock.snd_una).max(0) as usize;
    let sendwin = sock.snd_wnd.min(sock.cc.snd_cwnd);
    let send_buf_used = sock.send_buf.used_space();

    let mut len = if sock.flags.force_data && sendwin == 0 {
        1
    } else if let Some(seq) = rexmit_seq {
        rexmit_len.min(sendwin.saturating_sub((seq - sock.snd_una).max(0) as usize))
    } else {
        send_buf_used.saturating_sub(off).min(sendwin.saturating_sub(off.min(sendwin)))
    };

    let seq_to_send = rexmit_seq.unwrap_or(sock.snd_nxt);
    let all_sent = rexmit_seq.is_none() && off + len >= send_buf_used;
    let mut fin_now = sock.flags.need_fin && all_sent && !sock.flags.sent_fin;
    if !all_sent {
        fin_now = false;
    }

    // 4. Send triggers.
    let window_grew = {
        let adv_now = sock.rcv_nxt.to_u32() as i64 + sock.rcv_wnd as i64;
        let adv_prev = sock.rcv_adv.to_u32() as i64;
        (adv_now - adv_prev) >= (sock.recv_buf.capacity() / 4) as i64
    };
    let should_send = len >= sock.t_maxseg
        || (len > 0 && (sock.flags.last_was_idle || sock.flags.nodelay))
        || sock.flags.force_data
        || (sock.snd_wnd > 0 && len >= (sock.snd_wnd / 2).max(1) && len > 0)
        || (sock.snd_nxt < sock.snd_max && rexmit_seq.is_none())
        || rexmit_seq.is_some()
        || window_grew
        || sock.flags.ack_now
        || sock.flags.need_syn
        || fin_now;

    if !should_send {
        // 5. Persist timer.
        if sock.snd_wnd == 0
            && send_buf_used > off
            && !sock.timers.is_active(TimerKind::Rexmt)
            && !sock.timers.is_active(TimerKind::Persist)
        {
            arm_persist(sock, host, now);
        }
        return;
    }

    let is_syn = sock.flags.need_syn;
    let is_fin = fin_now;
    let control = if is_syn {
        TcpControl::Syn
    } else if is_fin {
        TcpControl::Fin
    } else {
        TcpControl::None
    };

    send_segment(sock, host, now, seq_to_send, len, control, signals);
    if sock.send_buf.used_space() == 0 {
        sock.flags.last_was_idle = true;
    }
}

fn idle_for(sock: &Socket, now: crate::time::Instant) -> crate::time::Duration {
    now.checked_duration_since(sock.last_activity).unwrap_or(crate::time::Duration::ZERO)
}

fn arm_persist<H: Host>(sock: &mut Socket, host: &mut H, now: crate::time::Instant) {
    let shift = sock.rtte.t_rxtshift.min(7);
    let base = config::TCPTV_PERSMIN.total_millis() << shift.min(5);
    let delay = base.clamp(config::TCPTV_PERSMIN.total_millis(), config::TCPTV_PERSMAX.total_millis());
    let at = now + crate::time::Duration::from_millis(delay);
    sock.timers.activate(TimerKind::Persist, at);
    host.set_timer(TimerKind::Persist, delay as u32);
}

/// Builds and sends one segment starting at `seq` covering `len` data
/// bytes, with `control` set. Performs the bookkeeping of spec §4.2 steps
/// 6-8.
fn send_segment<H: Host>(
    sock: &mut Socket,
    host: &mut H,
    now: crate::time::Instant,
    seq: TcpSeqNumber,
    len: usize,
    control: TcpControl,
    signals: &mut Signals,
) {
    let Some(message) = host.new_message() else { return };

    let ack_number = if sock.state != State::Closed && sock.state != State::SynSent {
        Some(sock.rcv_nxt)
    } else {
        None
    };

    let repr = TcpRepr {
        src_port: sock.local.port,
        dst_port: sock.peer.port,
        control,
        seq_number: seq,
        ack_number,
        window_len: (sock.rcv_wnd >> sock.rcv_scale).min(u16::MAX as usize) as u16,
        window_scale: if control == TcpControl::Syn { Some(sock.request_r_scale) } else { None },
        max_seg_size: if control == TcpControl::Syn { Some(sock.t_maxseg as u16) } else { None },
        sack_permitted: control == TcpControl::Syn && sock.flags.sack_permitted,
        sack_ranges: sock.sackblks_as_u32(),
        timestamp: if sock.flags.timestamps {
            Some(TcpTimestampRepr {
                tsval: now.total_millis() as u32,
                tsecr: sock.ts_recent,
            })
        } else {
            None
        },
        ece: sock.flags.send_ece,
        cwr: sock.flags.send_cwr,
        payload_len: len,
    };

    let header_len = repr.header_len();
    let mut header_buf = [0u8; wire::TCP_HEADER_LEN + wire::TCP_MAX_OPTION_LEN];
    {
        let mut packet = TcpPacket::new_unchecked(&mut header_buf[..header_len]);
        repr.emit(&mut packet);
    }
    host.write_message(message, 0, &header_buf[..header_len]);

    let offset = (seq - sock.snd_una).max(0) as usize;
    copy_payload(sock, host, message, header_len, offset, len);
    host.set_message_length(message, header_len + len);

    host.send_message(message, sock.local, sock.peer, if sock.flags.ecn_permitted { 0x02 } else { 0 });

    let consumed = len + control.len();
    if !sock.flags.force_data || len > 1 {
        sock.snd_nxt = seq + consumed;
        if sock.snd_nxt > sock.snd_max {
            sock.snd_max = sock.snd_nxt;
            sock.rtte.start_timing(now, seq);
        }
        if !sock.timers.is_active(TimerKind::Rexmt) && sock.snd_nxt != sock.snd_una {
            let at = now + sock.rtte.t_rxtcur;
            sock.timers.activate(TimerKind::Rexmt, at);
            host.set_timer(TimerKind::Rexmt, sock.rtte.t_rxtcur.total_millis() as u32);
        }
    }

    if control == TcpControl::Syn {
        sock.flags.need_syn = false;
    }
    if control == TcpControl::Fin {
        sock.flags.sent_fin = true;
    }
    sock.flags.ack_now = false;
    sock.last_ack_sent = sock.rcv_nxt;
    sock.rcv_adv = sock.rcv_nxt + sock.rcv_wnd;
    sock.last_activity = now;
    let _ = signals;
}

/// Copies `[offset, offset+len)` of the unacked send-buffer stream into
/// `message` by reference, per spec §4.2 step 7 ("append payload by
/// reference"). `SendBuffer::locate` identifies at most the first and last
/// entries a range touches; segments spanning three or more outstanding
/// `send_by_reference` entries at once are not expected in practice given
/// `t_maxseg` and `SEND_BUF_ENTRIES`, and are not handled here (see
/// DESIGN.md).
fn copy_payload<H: Host>(sock: &Socket, host: &mut H, message: crate::host::MessageHandle, header_len: usize, offset: usize, len: usize) {
    if len == 0 {
        return;
    }
    let Some(range) = sock.send_buf.locate(offset, len) else {
        return;
    };
    if core::ptr::eq(range.first.as_ptr(), range.last.as_ptr()) && range.first.len() == range.last.len() {
        let slice = &range.first[range.first_offset..range.first.len() - range.last_extra];
        host.write_message(message, header_len, slice);
    } else {
        let head = &range.first[range.first_offset..];
        host.write_message(message, header_len, head);
        let tail = &range.last[..range.last.len() - range.last_extra];
        host.write_message(message, header_len + head.len(), tail);
    }
}

/// RFC 793 "SEGMENT ARRIVES"/CLOSED-state handling for a segment that
/// matched no listener and no connection (spec §4.1 "Preconditions"/
/// "Failure semantics"), and for a SYN a listener's `accept_ready` refused
/// (spec §6 `AcceptDecision::Refuse`). An incoming RST is dropped silently;
/// otherwise the reply's sequence number comes from the incoming segment's
/// ACK field if present, else a bare RST acks the peer's seq/control/data.
/// This is the host's only way to get the required RST-on-unmatched-segment
/// behavior out of this crate, since no TCB exists yet to carry it out.
pub fn dropwithreset<H: Host>(host: &mut H, local: crate::wire::IpEndpoint, peer: crate::wire::IpEndpoint, repr: &TcpRepr) {
    if repr.control == TcpControl::Rst {
        return;
    }
    let Some(message) = host.new_message() else { return };
    let (seq_number, ack_number) = match repr.ack_number {
        Some(ack) => (ack, None),
        None => (TcpSeqNumber(0), Some(repr.seq_number + repr.control.len() + repr.payload_len)),
    };
    let out = TcpRepr {
        src_port: local.port,
        dst_port: peer.port,
        control: crate::wire::TcpControl::Rst,
        seq_number,
        ack_number,
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
    let header_len = out.header_len();
    let mut buf = [0u8; wire::TCP_HEADER_LEN];
    {
        let mut packet = TcpPacket::new_unchecked(&mut buf[..header_len]);
        out.emit(&mut packet);
    }
    host.write_message(message, 0, &buf[..header_len]);
    host.set_message_length(message, header_len);
    host.send_message(message, local, peer, 0);
}

pub(crate) fn send_reset<H: Host>(sock: &mut Socket, host: &mut H) {
    let Some(message) = host.new_message() else { return };
    let repr = TcpRepr {
        src_port: sock.local.port,
        dst_port: sock.peer.port,
        control: crate::wire::TcpControl::Rst,
        seq_number: sock.snd_nxt,
        ack_number: Some(sock.rcv_nxt),
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
    let header_len = repr.header_len();
    let mut buf = [0u8; wire::TCP_HEADER_LEN];
    {
        let mut packet = TcpPacket::new_unchecked(&mut buf[..header_len]);
        repr.emit(&mut packet);
    }
    host.write_message(message, 0, &buf[..header_len]);
    host.set_message_length(message, header_len);
    host.send_message(message, sock.local, sock.peer, 0);
}
