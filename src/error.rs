/*! Error taxonomy (spec §7).

Packet-level failures (parse-drop, bandlim-rst, resource-exhaustion) never
reach the host as a `Result`; they are absorbed internally by the input
engine and the timers. This enum only covers the Usage-error class: wrong
calls by the user of the socket API.
*/

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `connect` called on a socket that is already connected or connecting.
    AlreadyConnected,
    /// Operation not valid in the socket's current state.
    InvalidState,
    /// Send attempted on a socket whose send side is already closed.
    Closed,
    /// The connection was aborted locally or by the peer.
    ConnectionAborted,
    /// The send buffer has no room for more data right now.
    BufferFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Error::AlreadyConnected => "already connected",
            Error::InvalidState => "operation invalid in current state",
            Error::Closed => "socket closed for sending",
            Error::ConnectionAborted => "connection aborted",
            Error::BufferFull => "buffer full",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Reasons for the terminal `disconnected` / `connection_lost` callback
/// (spec §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Graceful full close, both directions FINed and ACKed.
    Normal,
    /// Peer (or a listener) sent RST before the connection was established.
    Refused,
    /// Retransmit backoff exceeded `TCP_MAXRXTSHIFT`, or persist/keepalive
    /// idle bound exceeded.
    TimedOut,
    /// Peer sent RST on a synchronized connection, or the user aborted it.
    Reset,
    /// TIME-WAIT's 2MSL timer expired.
    TimeWait,
}
