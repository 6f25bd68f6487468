/// The state of a TCP endpoint, per [RFC 793].
///
/// `Listen` is carried over from the teacher's enum but never occupied by
/// an endpoint TCB here — passive listening is [`crate::listener::Listener`],
/// a separate, lighter record, matching the original's split between
/// `struct tcpcb` and `struct tcpcb_listen`.
///
/// [RFC 793]: https://tools.ietf.org/html/rfc793
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    pub const fn is_synchronized(self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent | State::SynReceived)
    }
}
