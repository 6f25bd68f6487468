/*! Fixed-capacity, allocation-free storage primitives shared by the
connection state machine: the reassembly/allocation [`Bitmap`], the
[`SendBuffer`] ("lbuf") and [`RecvBuffer`] ("cbuf"), and the
[`SackHoles`] scoreboard arena.
*/

mod bitmap;
mod recvbuf;
mod sackhole;
mod sendbuf;

pub use self::bitmap::Bitmap;
pub use self::recvbuf::RecvBuffer;
pub use self::sackhole::SackHoles;
pub use self::sendbuf::SendBuffer;
