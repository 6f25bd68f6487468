/*! The active-endpoint TCB and its state machine (spec §3 "Active endpoint
(TCB)", §4.3).

Generalizes the teacher's `socket::tcp::Socket` skeleton — which already
supplies the right shape (ring buffers, an RTT estimator, a `State` enum, a
congestion controller field) for a single IPv4 peer with no SACK or window
scaling — into the full spec'd TCB: SACK scoreboard, the five-timer set,
window scaling/timestamps negotiation, and TFO flag plumbing.
*/

mod congestion;
pub mod input;
pub mod output;
mod rtt;
mod sack;
mod state;
mod timer;

pub use self::congestion::NewReno;
pub use self::output::dropwithreset;
pub use self::rtt::RttEstimator;
pub use self::state::State;
pub use self::timer::Timers;

use crate::config;
use crate::error::{DisconnectReason, Error, Result};
use crate::host::{Host, Signals, TimerKind};
use crate::storage::{RecvBuffer, SackHoles, SendBuffer};
use crate::time::Instant;
use crate::wire::{IpEndpoint, TcpRepr, TcpSeqNumber};

/// Where a reassembled FIN's pseudo-byte sits relative to the receive
/// buffer, per spec §3 "reass_fin_index".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinIndex {
    None,
    Pending(usize),
    Delivered,
}

/// The multi-bit flag set of spec §3 "Flag set", collapsed to plain bools
/// on the struct (the teacher favors named `bool` fields over a bitset
/// newtype for its own socket flags, e.g. `nagle`/`rx_fin_received`).
#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    ack_now: bool,
    delayed_ack: bool,
    nodelay: bool,
    sent_fin: bool,
    snd_scale_negotiated: bool,
    rcv_scale_negotiated: bool,
    timestamps: bool,
    sack_permitted: bool,
    need_syn: bool,
    need_fin: bool,
    more_to_come: bool,
    prev_rto_valid: bool,
    last_was_idle: bool,
    rx_wnd_zero_sent: bool,
    in_fast_recovery: bool,
    was_in_fast_recovery: bool,
    force_data: bool,
    ecn_permitted: bool,
    send_cwr: bool,
    send_ece: bool,
    in_congestion_recovery: bool,
    was_in_congestion_recovery: bool,
    cant_recv_more: bool,
    cant_send_more: bool,
    passive_opened: bool,
    no_fast_open: bool,
}

/// An active TCP endpoint: a connected, connecting, or passively-spawned
/// half of a connection.
pub struct Socket<'a> {
    state: State,
    flags: Flags,

    local: IpEndpoint,
    peer: IpEndpoint,

    // --- send sequence space (spec §3) ---
    snd_una: TcpSeqNumber,
    snd_nxt: TcpSeqNumber,
    snd_max: TcpSeqNumber,
    snd_wl1: TcpSeqNumber,
    snd_wl2: TcpSeqNumber,
    iss: TcpSeqNumber,
    snd_wnd: usize,
    snd_recover: TcpSeqNumber,

    // --- receive sequence space ---
    rcv_nxt: TcpSeqNumber,
    rcv_adv: TcpSeqNumber,
    rcv_wnd: usize,
    irs: TcpSeqNumber,
    last_ack_sent: TcpSeqNumber,

    rtte: RttEstimator,

    ts_recent: u32,
    ts_recent_age: Instant,
    ts_offset: u32,
    snd_scale: u8,
    rcv_scale: u8,
    request_r_scale: u8,

    sackblks: heapless::Vec<(TcpSeqNumber, TcpSeqNumber), { config::TCP_MAX_SACK }>,
    sack_holes: SackHoles,
    snd_fack: TcpSeqNumber,
    sack_bytes_rexmit: u32,
    sack_hint: Option<u8>,
    sack_newdata: TcpSeqNumber,

    t_maxseg: usize,
    t_maxopd: usize,

    cc: NewReno,
    bytes_this_ack: usize,

    send_buf: SendBuffer<'a>,
    recv_buf: RecvBuffer<'a>,
    reass_fin_index: FinIndex,

    timers: Timers,

    dupacks: u8,
    challenge_ack_at: Instant,
    last_activity: Instant,
    /// Deadline for bad-RTO detection (spec §4.4): a new, non-duplicate ACK
    /// arriving at or before this instant, while `prev_rto_valid` is set,
    /// means the REXMT that set it was spurious.
    bad_rxt_win: Instant,
}

/// Outcome of feeding one inbound segment to [`Socket::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    Done,
    /// The segment should be handed back to listener matching (spec §4.1
    /// TIME-WAIT short-circuit).
    RelookupRequired,
}

impl<'a> Socket<'a> {
    /// `recv_buf`/`recv_bitmap` are the split halves spec §6 `initialize`
    /// describes (`L - ceil((L+8)/9)` data bytes and a trailing bitmap);
    /// the host performs that split before calling in, since only it knows
    /// the raw buffer length `L`.
    pub fn new(send_buf: SendBuffer<'a>, recv_buf: &'a mut [u8], recv_bitmap: &'a mut [u8]) -> Socket<'a> {
        Socket {
            state: State::Closed,
            flags: Flags::default(),
            local: IpEndpoint::new(Default::default(), 0),
            peer: IpEndpoint::new(Default::default(), 0),
            snd_una: TcpSeqNumber(0),
            snd_nxt: TcpSeqNumber(0),
            snd_max: TcpSeqNumber(0),
            snd_wl1: TcpSeqNumber(0),
            snd_wl2: TcpSeqNumber(0),
            iss: TcpSeqNumber(0),
            snd_wnd: 0,
            snd_recover: TcpSeqNumber(0),
            rcv_nxt: TcpSeqNumber(0),
            rcv_adv: TcpSeqNumber(0),
            rcv_wnd: 0,
            irs: TcpSeqNumber(0),
            last_ack_sent: TcpSeqNumber(0),
            rtte: RttEstimator::new(),
            ts_recent: 0,
            ts_recent_age: Instant::ZERO,
            ts_offset: 0,
            snd_scale: 0,
            rcv_scale: 0,
            request_r_scale: 0,
            sackblks: heapless::Vec::new(),
            sack_holes: SackHoles::new(),
            snd_fack: TcpSeqNumber(0),
            sack_bytes_rexmit: 0,
            sack_hint: None,
            sack_newdata: TcpSeqNumber(0),
            t_maxseg: config::V6MSSDFLT,
            t_maxopd: config::V6MSSDFLT,
            cc: NewReno::new(),
            bytes_this_ack: 0,
            send_buf,
            recv_buf: RecvBuffer::new(recv_buf, recv_bitmap),
            reass_fin_index: FinIndex::None,
            timers: Timers::new(),
            dupacks: 0,
            challenge_ack_at: Instant::ZERO,
            last_activity: Instant::ZERO,
            bad_rxt_win: Instant::ZERO,
        }
    }

    /// `sackblks` as the fixed 3-slot array `wire::TcpRepr` expects
    /// (spec §6 caps emitted SACK blocks independent of `TCP_MAX_SACK`,
    /// the limit on *received* blocks tracked).
    fn sackblks_as_u32(&self) -> [Option<(u32, u32)>; 3] {
        let mut out = [None; 3];
        for (slot, (start, end)) in out.iter_mut().zip(self.sackblks.iter()) {
            *slot = Some((start.to_u32(), end.to_u32()));
        }
        out
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn local_endpoint(&self) -> IpEndpoint {
        self.local
    }

    pub fn peer_endpoint(&self) -> IpEndpoint {
        self.peer
    }

    pub fn may_send(&self) -> bool {
        !self.flags.cant_send_more && self.state.is_synchronized()
    }

    pub fn may_recv(&self) -> bool {
        !self.flags.cant_recv_more && (self.state.is_synchronized() || self.reass_fin_index != FinIndex::None)
    }

    fn set_state(&mut self, host: &mut impl Host, new_state: State) {
        log::trace!("{:?} -> {:?}", self.state, new_state);
        self.state = new_state;
        host.on_state_change(new_state);
        if new_state == State::Closed {
            self.reset_to_closed();
        }
    }

    fn reset_to_closed(&mut self) {
        self.flags = Flags::default();
        self.snd_una = TcpSeqNumber(0);
        self.snd_nxt = TcpSeqNumber(0);
        self.snd_max = TcpSeqNumber(0);
        self.rcv_nxt = TcpSeqNumber(0);
        self.sack_holes.clear();
        self.sackblks.clear();
        self.sack_bytes_rexmit = 0;
        self.dupacks = 0;
        self.reass_fin_index = FinIndex::None;
        self.timers = Timers::new();
        self.cc = NewReno::new();
        self.rtte = RttEstimator::new();
    }

    /// `connect(tcb, peer, flags)` (spec §6). Without `NO_FAST_OPEN`, the
    /// SYN is deferred to the first `send_by_*` call (TFO fast-path); this
    /// port never generates TFO cookies (spec §9 Open Question 1), so in
    /// practice only the `no_fast_open` path below actually emits a SYN.
    pub fn connect(
        &mut self,
        host: &mut impl Host,
        local: IpEndpoint,
        peer: IpEndpoint,
        no_fast_open: bool,
    ) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::AlreadyConnected);
        }
        self.local = local;
        self.peer = peer;
        self.flags.no_fast_open = no_fast_open;
        self.iss = TcpSeqNumber::from_u32(host.generate_isn());
        self.snd_una = self.iss;
        self.snd_nxt = self.iss;
        self.snd_max = self.iss;
        self.snd_recover = self.iss;
        self.request_r_scale = 0;
        self.flags.sack_permitted = true;
        self.flags.timestamps = true;
        self.cc.conn_init(self.t_maxseg, false);
        if no_fast_open {
            self.flags.need_syn = true;
            self.set_state(host, State::SynSent);
            self.rtte.start_timing(host.get_ticks(), self.iss);
            output::dispatch(self, host, &mut Signals::new());
        }
        Ok(())
    }

    /// Spawns this (previously CLOSED) TCB into SYN-RECEIVED from a
    /// listener's matched SYN (spec §6 `accept_ready`): seeds the receive
    /// sequence space from the SYN, negotiates options, and emits the
    /// SYN-ACK immediately.
    pub(crate) fn accept(
        &mut self,
        host: &mut impl Host,
        local: IpEndpoint,
        peer: IpEndpoint,
        repr: &TcpRepr,
    ) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::AlreadyConnected);
        }
        self.local = local;
        self.peer = peer;
        self.irs = repr.seq_number;
        self.rcv_nxt = self.irs + 1;
        self.last_ack_sent = self.rcv_nxt;
        self.iss = TcpSeqNumber::from_u32(host.generate_isn());
        self.snd_una = self.iss;
        self.snd_nxt = self.iss;
        self.snd_max = self.iss;
        self.snd_recover = self.iss;
        self.request_r_scale = 0;
        self.flags.sack_permitted = true;
        self.flags.timestamps = true;
        self.flags.passive_opened = true;
        let now = host.get_ticks();
        input::negotiate_options(self, repr, now);
        self.flags.need_syn = true;
        self.set_state(host, State::SynReceived);
        self.rtte.start_timing(now, self.iss);
        output::dispatch(self, host, &mut Signals::new());
        Ok(())
    }

    /// `send_by_reference`: append a zero-copy descriptor to the send
    /// buffer.
    pub fn send_by_reference(&mut self, data: &'a [u8], more_to_come: bool) -> Result<()> {
        if self.flags.cant_send_more {
            return Err(Error::Closed);
        }
        self.flags.more_to_come = more_to_come;
        self.send_buf.append(data, more_to_come).map_err(|_| Error::BufferFull)
    }

    pub fn receive_by_reference(&self) -> (&[u8], &[u8]) {
        self.recv_buf.contiguous_slices()
    }

    pub fn receive_contiguify(&mut self) {
        self.recv_buf.make_contiguous();
    }

    /// `commit_receive`: pop `n_bytes` from the receive buffer, re-opening
    /// the advertised window.
    pub fn commit_receive(&mut self, host: &mut impl Host, n_bytes: usize) {
        self.recv_buf.pop(n_bytes);
        if matches!(self.reass_fin_index, FinIndex::Pending(idx) if idx < n_bytes) {
            self.reass_fin_index = FinIndex::Delivered;
        }
        let mut signals = Signals::new();
        output::dispatch(self, host, &mut signals);
    }

    /// `send_end_of_stream`: user-close, the send half only.
    pub fn send_end_of_stream(&mut self, host: &mut impl Host) -> Result<()> {
        if self.flags.cant_send_more {
            return Err(Error::Closed);
        }
        self.flags.cant_send_more = true;
        self.flags.need_fin = true;
        match self.state {
            State::Established => self.set_state(host, State::FinWait1),
            State::CloseWait => self.set_state(host, State::LastAck),
            _ => {}
        }
        let mut signals = Signals::new();
        output::dispatch(self, host, &mut signals);
        Ok(())
    }

    /// `abort`: send RST, discard connection state.
    pub fn abort(&mut self, host: &mut impl Host) {
        if self.state != State::Closed {
            output::send_reset(self, host);
        }
        host.connection_lost(DisconnectReason::Reset);
        self.set_state(host, State::Closed);
    }

    pub fn deinitialize(&mut self, host: &mut impl Host) {
        self.abort(host);
    }

    /// Feeds one inbound segment (spec §4.1). `payload` is the data past
    /// the TCP header; `repr` has already been parsed by the caller.
    pub fn process(
        &mut self,
        host: &mut impl Host,
        repr: &crate::wire::TcpRepr,
        payload: &[u8],
        signals: &mut Signals,
    ) -> ProcessResult {
        input::process(self, host, repr, payload, signals)
    }

    /// Drives the output engine: decides whether to send and emits the
    /// segment via the host, per spec §4.2.
    pub fn dispatch(&mut self, host: &mut impl Host) {
        let mut signals = Signals::new();
        output::dispatch(self, host, &mut signals);
    }

    /// Expiry handler dispatch for the host's single physical timer (spec
    /// §4.7).
    pub fn timer_expired(&mut self, host: &mut impl Host, kind: TimerKind) {
        let mut signals = Signals::new();
        input::timer_expired(self, host, kind, &mut signals);
    }

    pub fn next_timer_expiry(&self) -> Option<(TimerKind, Instant)> {
        self.timers.next_expiry()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::host::{AcceptDecision, Host};
    use crate::wire::Ipv6Address;
    use std::collections::VecDeque;

    pub struct FakeHost {
        pub now: Instant,
        pub isn: u32,
        pub sent: VecDeque<(u32, usize, IpEndpoint, IpEndpoint)>,
        next_handle: u32,
        lengths: heapless::FnvIndexMap<u32, usize, 16>,
    }

    impl FakeHost {
        pub fn new() -> FakeHost {
            FakeHost {
                now: Instant::ZERO,
                isn: 1000,
                sent: VecDeque::new(),
                next_handle: 1,
                lengths: heapless::FnvIndexMap::new(),
            }
        }
    }

    impl Host for FakeHost {
        fn new_message(&mut self) -> Option<u32> {
            let h = self.next_handle;
            self.next_handle += 1;
            self.lengths.insert(h, 0).ok();
            Some(h)
        }

        fn free_message(&mut self, message: u32) {
            self.lengths.remove(&message);
        }

        fn set_message_length(&mut self, message: u32, len: usize) {
            self.lengths.insert(message, len).ok();
        }

        fn read_message(&mut self, _message: u32, _offset: usize, _buf: &mut [u8]) -> usize {
            0
        }

        fn write_message(&mut self, _message: u32, _offset: usize, _data: &[u8]) {}

        fn send_message(&mut self, message: u32, local: IpEndpoint, peer: IpEndpoint, _traffic_class: u8) {
            let len = self.lengths.get(&message).copied().unwrap_or(0);
            self.sent.push_back((message, len, local, peer));
        }

        fn get_ticks(&self) -> Instant {
            self.now
        }

        fn get_millis(&self) -> u32 {
            self.now.total_millis() as u32
        }

        fn set_timer(&mut self, _kind: TimerKind, _delay_ms: u32) {}
        fn stop_timer(&mut self, _kind: TimerKind) {}

        fn autobind(&mut self, _peer: &IpEndpoint, _bind_addr: &mut Option<Ipv6Address>, bind_port: &mut u16) -> bool {
            *bind_port = 49152;
            true
        }

        fn generate_isn(&mut self) -> u32 {
            self.isn
        }

        fn accept_ready(&mut self, _local: IpEndpoint, _peer: IpEndpoint) -> AcceptDecision {
            AcceptDecision::Accept
        }

        fn accepted_connection(&mut self, _local: IpEndpoint, _peer: IpEndpoint) -> bool {
            true
        }

        fn connection_lost(&mut self, _reason: DisconnectReason) {}
        fn on_state_change(&mut self, _new_state: State) {}
    }

    #[test]
    fn connect_seeds_iss_and_enters_syn_sent() {
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut sock = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let mut host = FakeHost::new();
        host.isn = 555;
        let local = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 49152);
        let peer = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 7000);
        sock.connect(&mut host, local, peer, true).unwrap();
        assert_eq!(sock.state(), State::SynSent);
        assert_eq!(sock.iss, TcpSeqNumber(555));
        assert_eq!(sock.snd_nxt, TcpSeqNumber(555));
    }

    #[test]
    fn connect_twice_errors() {
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut sock = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let mut host = FakeHost::new();
        let local = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 49152);
        let peer = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 7000);
        sock.connect(&mut host, local, peer, true).unwrap();
        assert_eq!(sock.connect(&mut host, local, peer, true), Err(Error::AlreadyConnected));
    }
}
