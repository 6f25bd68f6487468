/*! Low-level packet access and construction.

Unlike the teacher crate's `wire` module, this one only ever sees IPv6: the
6LoWPAN/IPv6 layer (out of scope, per spec §1) has already parsed the IPv6
header and hands the core a contiguous TCP segment plus the already-decoded
source/destination addresses and ports. So there is no `Ipv4`/`Ipv6` enum
split here the way the teacher's `wire::ip` has one for IPv4/IPv6 — `wire`
is IPv6-only, and the `Packet`/`Repr` split is reserved for the TCP segment
itself (`wire::tcp`), the only wire format this crate is responsible for
encoding or decoding.
*/

use core::fmt;

mod ip;
mod tcp;

pub use self::ip::{Endpoint as IpEndpoint, ListenEndpoint as IpListenEndpoint};
pub use self::tcp::{
    Control as TcpControl, Packet as TcpPacket, Repr as TcpRepr, SeqNumber as TcpSeqNumber,
    TcpOption, TcpTimestampRepr, HEADER_LEN as TCP_HEADER_LEN,
    MAX_OPTION_LEN as TCP_MAX_OPTION_LEN,
};

pub use core::net::Ipv6Addr as Ipv6Address;

/// Parsing a packet failed: either it is malformed, or this crate does not
/// support some option it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
