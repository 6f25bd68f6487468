/*! The collaboration surface with the externally-supplied radio/6LoWPAN/IPv6
layer (spec §6 "Host-provided functions"/"Host-visible user operations").

Nothing in `socket::tcp` touches a radio or an IPv6 stack directly; every
such interaction is a call on [`Host`]. This mirrors the `tcplp_sys_*`
C functions the original port calls out to, and plays the same role the
teacher's `phy::Device` trait plays between `iface` and the wire: an
abstraction the core is generic over, not a concrete dependency.
*/

use crate::error::DisconnectReason;
use crate::time::Instant;
use crate::wire::{IpEndpoint, Ipv6Address};

/// A handle to a host-allocated outbound message buffer. Opaque to the
/// core; only ever round-tripped back into [`Host`] methods.
pub type MessageHandle = u32;

/// The five logical timers of spec §4.7, collapsed by the host onto one
/// physical per-connection timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Delack,
    Rexmt,
    Persist,
    Keep,
    TimeWait,
}

/// The host's decision on an inbound SYN matched to a listener (spec §6
/// `accept_ready`). On `Accept`, the host is expected to have already
/// pointed `accept_ready`'s out-parameter at an initialized-but-CLOSED
/// endpoint TCB for the input engine to spawn into SYN-RECEIVED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptDecision {
    /// Accept; the caller spawns the endpoint passed via `accept_ready`'s
    /// out-parameter into SYN-RECEIVED.
    Accept,
    /// Silently drop the SYN; the peer's retransmissions may still succeed.
    Defer,
    /// Reject with a RST carrying `ECONNREFUSED`.
    Refuse,
}

/// Per-call-batch counters threaded through the input engine out to the
/// host's callback dispatch, mirroring `struct tcplp_signals` in the
/// original: rather than invoke a callback per micro-event, the input path
/// accumulates what happened during one `process()` call and the caller
/// (typically the host's dispatch loop) fires user callbacks once from the
/// accumulated totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub established: bool,
    pub accepted_connection: bool,
    pub send_done_count: u8,
    pub forward_progress: bool,
    pub recvbuf_added: usize,
    pub fin_seen: bool,
    pub disconnected: Option<DisconnectReason>,
}

impl Signals {
    pub const fn new() -> Signals {
        Signals {
            established: false,
            accepted_connection: false,
            send_done_count: 0,
            forward_progress: false,
            recvbuf_added: 0,
            fin_seen: false,
            disconnected: None,
        }
    }
}

/// The contract the core requires of its host environment: message
/// allocation, transmission, timers, a tick source, and the accept/drop
/// decisions only the host (with its own TCB registry and policy) can make.
///
/// `'m` is the lifetime of message handles' backing storage, owned by the
/// host, not the core.
pub trait Host {
    /// Allocates a new, empty outbound message.
    fn new_message(&mut self) -> Option<MessageHandle>;

    /// Releases a message the core decided not to send (e.g. a send
    /// failure backout).
    fn free_message(&mut self, message: MessageHandle);

    /// Truncates or extends the message's logical length.
    fn set_message_length(&mut self, message: MessageHandle, len: usize);

    /// Reads `buf.len()` bytes from `message` starting at `offset`.
    fn read_message(&mut self, message: MessageHandle, offset: usize, buf: &mut [u8]) -> usize;

    /// Writes `data` into `message` starting at `offset`, growing the
    /// message's length if needed.
    fn write_message(&mut self, message: MessageHandle, offset: usize, data: &[u8]);

    /// Hands a fully-composed message to the IPv6 layer for transmission.
    /// `traffic_class` carries ECN bits when the connection is
    /// ECN-permitted (spec §9 "ECN").
    fn send_message(
        &mut self,
        message: MessageHandle,
        local: IpEndpoint,
        peer: IpEndpoint,
        traffic_class: u8,
    );

    /// Monotonic millisecond tick count, matching [`get_millis`](Host::get_millis)'s epoch.
    fn get_ticks(&self) -> Instant;

    /// Monotonic millisecond counter; on this port, identical to `get_ticks`.
    fn get_millis(&self) -> u32;

    /// Arms the connection's single physical timer to fire at `delay_ms`
    /// from now for `kind` (re-arming replaces any previous expiry for
    /// that kind).
    fn set_timer(&mut self, kind: TimerKind, delay_ms: u32);

    /// Cancels a previously-armed timer for `kind`, if any.
    fn stop_timer(&mut self, kind: TimerKind);

    /// Host-specific source-address and/or ephemeral-port selection (spec
    /// §6 `autobind`). Returns `false` if no suitable address/port could
    /// be chosen.
    fn autobind(&mut self, peer: &IpEndpoint, bind_addr: &mut Option<Ipv6Address>, bind_port: &mut u16) -> bool;

    /// Cryptographically strong initial sequence number (RFC 6528).
    fn generate_isn(&mut self) -> u32;

    /// Asks whether an inbound SYN matched to a listener should be
    /// accepted. On `AcceptDecision::Accept` the host is responsible for
    /// having an endpoint TCB ready to spawn (spec §6 `accept_ready`).
    fn accept_ready(&mut self, local: IpEndpoint, peer: IpEndpoint) -> AcceptDecision;

    /// Fires once the passive-open three-way handshake completes.
    /// Returning `false` asks the core to abort the new connection.
    fn accepted_connection(&mut self, local: IpEndpoint, peer: IpEndpoint) -> bool;

    /// Fires exactly once on a terminal transition.
    fn connection_lost(&mut self, reason: DisconnectReason);

    /// Fires on every state transition; on `State::Closed` the core has
    /// already reset the TCB to a reusable state.
    fn on_state_change(&mut self, new_state: crate::socket::tcp::State);

    /// Fires on SYN-SENT → ESTABLISHED for an active open.
    fn established(&mut self) {}

    /// Fires once per send-buffer entry whose last byte has been
    /// cumulatively ACKed, in FIFO order.
    fn send_done(&mut self) {}

    /// Fires on any cumulative-ACK advance or local enqueue that lowers
    /// backlog.
    fn forward_progress(&mut self, send_bytes_remaining: usize, backlog_bytes: usize) {
        let _ = (send_bytes_remaining, backlog_bytes);
    }

    /// Fires when newly in-order bytes or the FIN become available to read.
    fn receive_available(&mut self, available_bytes: usize, fin_seen: bool, free_window_bytes: usize) {
        let _ = (available_bytes, fin_seen, free_window_bytes);
    }
}
