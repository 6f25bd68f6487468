/*! Compile-time knobs.
//!
Everything here was a "virtualized" global in the FreeBSD-derived original
(`V_tcp_do_sack`, `V_tcp_v6mssdflt`, ...). This port has no module-load
phase and no per-instance feature switches, so they all collapse to plain
`const`s, per the design note in spec §9 "Global state".
*/

use crate::time::Duration;

/// Ticks per second. Every `TCPTV_*` constant below is already expressed in
/// milliseconds, so `hz` only documents the assumption; nothing divides by
/// it at runtime.
pub const HZ: u32 = 1000;

/// 6LoWPAN framing budget used to derive the default data MSS (spec §6).
const FRAMES_PER_SEG: usize = 5;
const FRAMECAP_6LOWPAN: usize = 122 - 11 - 5;
const IP6HDR_SIZE: usize = 2 + 1 + 1 + 16 + 16;
const TCP_HDR_SIZE: usize = 20;

/// Default data MSS: `5*(122-11-5) - (2+1+1+16+16) - 20 = 474` bytes.
pub const V6MSSDFLT: usize = FRAMES_PER_SEG * FRAMECAP_6LOWPAN - IP6HDR_SIZE - TCP_HDR_SIZE;

/// Minimum MSS we will ever negotiate down to (must leave room for options
/// plus one byte of data).
pub const TCP_MINMSS: usize = 216;

pub const TCP_MAXRXTSHIFT: u32 = 12;
pub const MAX_SACK_BLKS: usize = 6;
pub const TCP_MAX_SACK: usize = 4;
pub const MAX_SACKHOLES: usize = 5;

pub const TCPTV_MIN: Duration = Duration::from_millis((HZ / 33) as u64);
pub const TCPTV_CPU_VAR: Duration = Duration::from_millis((HZ / 5) as u64);
pub const TCPTV_REXMTMAX: Duration = Duration::from_millis((64 * HZ) as u64);
pub const TCPTV_PERSMIN: Duration = Duration::from_millis((5 * HZ) as u64);
pub const TCPTV_PERSMAX: Duration = Duration::from_millis((60 * HZ) as u64);
pub const TCPTV_KEEP_INIT: Duration = Duration::from_millis((75 * HZ) as u64);
pub const TCPTV_KEEP_IDLE: Duration = Duration::from_millis((120 * 60 * HZ) as u64);
pub const TCPTV_KEEPINTVL: Duration = Duration::from_millis((75 * HZ) as u64);
pub const TCPTV_KEEPCNT: u32 = 8;
pub const TCPTV_FINWAIT2_TIMEOUT: Duration = Duration::from_millis((60 * HZ) as u64);
pub const TCPTV_DELACK: Duration = Duration::from_millis((HZ / 10) as u64);
pub const TCP_MSL: Duration = Duration::from_millis((30 * HZ) as u64);

/// Number of consecutive duplicate ACKs that triggers fast retransmit.
pub const TCPREXMTTHRESH: u8 = 3;

/// RFC 1323 timestamp "too old" rejection window used by PAWS: 24 days.
pub const TCP_PAWS_IDLE: Duration = Duration::from_millis(24 * 24 * 60 * 60 * 1000);

/// RTO backoff multipliers, indexed by `t_rxtshift` (`TCP_MAXRXTSHIFT + 1`
/// entries), copied verbatim from `tcp_timer.c`.
pub const TCP_BACKOFF: [u32; TCP_MAXRXTSHIFT as usize + 1] =
    [1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 512, 512, 512];

/// SYN-specific backoff table; SYN retransmits back off more gently so the
/// handshake doesn't stall for a minute on a lossy first hop.
pub const TCP_SYN_BACKOFF: [u32; TCP_MAXRXTSHIFT as usize + 1] =
    [1, 1, 1, 1, 1, 2, 4, 8, 16, 32, 64, 64, 64];

/// Rate limit for challenge ACKs sent in response to an in-window but
/// unacceptable RST or SYN (RFC 5961).
pub const TCP_CHALLENGEACK_LIMIT_PER_SEC: u32 = 1;

/// Ephemeral port range the host's `autobind` picks from.
pub const DYNAMIC_PORT_MIN: u16 = 49152;
pub const DYNAMIC_PORT_MAX: u16 = 65535;
