/*! The passive listener (spec §3 "Passive listener").

A listener holds nothing but the address/port it is bound to; it owns no
buffers and carries no sequence-space state of its own; see the original's
`struct tcpcb_listen` split from `struct tcpcb`; the same split keeps the
five-timer, SACK-aware TCB out of the (usually much larger) set of
listening sockets.
*/

use crate::host::{AcceptDecision, Host};
use crate::socket::tcp::{output, Socket};
use crate::wire::{IpEndpoint, IpListenEndpoint, TcpControl, TcpRepr};

/// A bound, passively-listening TCP endpoint.
pub struct Listener {
    local: IpListenEndpoint,
    active: bool,
}

impl Listener {
    pub const fn new() -> Listener {
        Listener {
            local: IpListenEndpoint { addr: None, port: 0 },
            active: false,
        }
    }

    /// Starts listening on `local` (a port, or an address+port pair via
    /// `IpListenEndpoint`'s `From` impls).
    pub fn listen<T: Into<IpListenEndpoint>>(&mut self, local: T) {
        self.local = local.into();
        self.active = true;
    }

    pub fn close(&mut self) {
        self.active = false;
    }

    pub fn is_listening(&self) -> bool {
        self.active
    }

    pub fn local_endpoint(&self) -> IpListenEndpoint {
        self.local
    }

    /// True if an inbound segment addressed to `local` matches this
    /// listener's bound address/port.
    pub fn accepts(&self, local: IpEndpoint) -> bool {
        self.active && self.local.port == local.port && self.local.addr.map_or(true, |addr| addr == local.addr)
    }

    /// Matches an inbound SYN against this listener and, per the host's
    /// [`AcceptDecision`], spawns `new_conn` into SYN-RECEIVED. `new_conn`
    /// must be a CLOSED, otherwise-uninitialized TCB the host set aside for
    /// this purpose; the core never allocates one itself (spec §6, no
    /// allocator). Returns whether a connection was spawned.
    pub fn process<H: Host>(
        &self,
        host: &mut H,
        local: IpEndpoint,
        peer: IpEndpoint,
        repr: &TcpRepr,
        new_conn: &mut Socket,
    ) -> bool {
        if !self.accepts(local) || repr.control != TcpControl::Syn {
            return false;
        }
        match host.accept_ready(local, peer) {
            AcceptDecision::Accept => new_conn.accept(host, local, peer, repr).is_ok(),
            AcceptDecision::Defer => false,
            AcceptDecision::Refuse => {
                log::debug!("refusing connection from {:?}", peer);
                output::dropwithreset(host, local, peer, repr);
                false
            }
        }
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::tcp::tests::FakeHost;
    use crate::socket::tcp::State;
    use crate::storage::SendBuffer;
    use crate::wire::{Ipv6Address, TcpSeqNumber};

    #[test]
    fn accepts_matches_bound_port_only() {
        let mut listener = Listener::new();
        listener.listen(7u16);
        let matching = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 7);
        let other = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 8);
        assert!(listener.accepts(matching));
        assert!(!listener.accepts(other));
    }

    #[test]
    fn accepted_syn_spawns_syn_received() {
        let mut listener = Listener::new();
        listener.listen(7u16);
        let mut host = FakeHost::new();
        host.isn = 4242;

        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut new_conn = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);

        let local = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 7);
        let peer = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 9000);
        let repr = TcpRepr {
            src_port: peer.port,
            dst_port: local.port,
            control: TcpControl::Syn,
            seq_number: TcpSeqNumber::from_u32(777),
            ack_number: None,
            window_len: 1000,
            window_scale: Some(4),
            max_seg_size: Some(474),
            sack_permitted: true,
            sack_ranges: [None, None, None],
            timestamp: None,
            ece: false,
            cwr: false,
            payload_len: 0,
        };

        let spawned = listener.process(&mut host, local, peer, &repr, &mut new_conn);
        assert!(spawned);
        assert_eq!(new_conn.state(), State::SynReceived);
    }

    #[test]
    fn non_syn_segment_is_ignored() {
        let listener_local = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 7);
        let mut listener = Listener::new();
        listener.listen(7u16);
        let mut host = FakeHost::new();
        let mut recv = [0u8; 64];
        let mut bitmap = [0u8; 8];
        let mut new_conn = Socket::new(SendBuffer::new(), &mut recv, &mut bitmap);
        let repr = TcpRepr {
            src_port: 9000,
            dst_port: 7,
            control: TcpControl::None,
            seq_number: TcpSeqNumber::from_u32(1),
            ack_number: Some(TcpSeqNumber::from_u32(1)),
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
        let peer = IpEndpoint::new(Ipv6Address::UNSPECIFIED, 9000);
        assert!(!listener.process(&mut host, listener_local, peer, &repr, &mut new_conn));
    }
}
