use core::cmp::Ordering;
use core::fmt;
use core::ops;

use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM: Field = 4..8;
    pub const ACK_NUM: Field = 8..12;
    pub const FLAGS: Field = 12..14;
    pub const WINDOW: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;
    pub const OPTIONS: Rest = 20..;
}

pub const HEADER_LEN: usize = field::OPTIONS.start;
/// Option space is capped at 40 bytes by the 4-bit data-offset field.
pub const MAX_OPTION_LEN: usize = 40;

/// A TCP sequence number.
///
/// A sequence number is really a 32-bit integer that wraps around; this
/// type's `Ord`/arithmetic implementations treat it that way, per RFC 793
/// §3.3's "sequence number arithmetic" and the `SEQ_LT`/`SEQ_GT` family of
/// macros in `tcp_var.h`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeqNumber(pub i32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl SeqNumber {
    pub const fn from_u32(n: u32) -> SeqNumber {
        SeqNumber(n as i32)
    }

    pub const fn to_u32(self) -> u32 {
        self.0 as u32
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;
    fn add(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;
    fn sub(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::Sub<SeqNumber> for SeqNumber {
    type Output = isize;
    fn sub(self, rhs: SeqNumber) -> isize {
        self.0.wrapping_sub(rhs.0) as isize
    }
}

impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.0.wrapping_sub(other.0).cmp(&0))
    }
}

/// The TCP control flag carried by a segment, collapsed to the at-most-one
/// of SYN/FIN/RST that matters for sequencing (a segment can carry both
/// data and SYN or FIN simultaneously; ACK is tracked separately since it
/// can accompany any of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    None,
    Syn,
    Fin,
    Rst,
}

impl Control {
    /// Number of sequence numbers this control flag itself consumes.
    pub const fn len(self) -> usize {
        match self {
            Control::Syn | Control::Fin => 1,
            _ => 0,
        }
    }
}

/// The nine low-order control bits of the flags/data-offset word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u16);

impl Flags {
    pub const FIN: Flags = Flags(0x001);
    pub const SYN: Flags = Flags(0x002);
    pub const RST: Flags = Flags(0x004);
    pub const PSH: Flags = Flags(0x008);
    pub const ACK: Flags = Flags(0x010);
    pub const URG: Flags = Flags(0x020);
    pub const ECE: Flags = Flags(0x040);
    pub const CWR: Flags = Flags(0x080);

    pub const fn empty() -> Flags {
        Flags(0)
    }

    pub const fn from_bits_truncate(bits: u16) -> Flags {
        Flags(bits & 0x01ff)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

/// A read/write wrapper around a TCP header buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        let data = self.buffer.as_ref();
        if data.len() < HEADER_LEN {
            return Err(Error);
        }
        let offset = self.data_offset() as usize;
        if offset < HEADER_LEN || offset > data.len() {
            return Err(Error);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber::from_u32(NetworkEndian::read_u32(&self.buffer.as_ref()[field::SEQ_NUM]))
    }

    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber::from_u32(NetworkEndian::read_u32(&self.buffer.as_ref()[field::ACK_NUM]))
    }

    fn raw_flags(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS])
    }

    pub fn data_offset(&self) -> u8 {
        (self.raw_flags() >> 12) as u8 * 4
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.raw_flags() & 0x01ff)
    }

    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WINDOW])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::URGENT])
    }

    pub fn options(&self) -> &[u8] {
        let offset = self.data_offset() as usize;
        &self.buffer.as_ref()[field::OPTIONS.start..offset]
    }

    pub fn payload(&self) -> &[u8] {
        let offset = self.data_offset() as usize;
        &self.buffer.as_ref()[offset..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value);
    }

    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value);
    }

    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.to_u32());
    }

    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::ACK_NUM], value.to_u32());
    }

    pub fn set_data_offset_and_flags(&mut self, data_offset: u8, flags: Flags) {
        let raw = ((data_offset as u16 / 4) << 12) | flags.bits();
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLAGS], raw);
    }

    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WINDOW], value);
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value);
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        let offset = self.data_offset() as usize;
        &mut self.buffer.as_mut()[field::OPTIONS.start..offset]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = self.data_offset() as usize;
        &mut self.buffer.as_mut()[offset..]
    }
}

/// A parsed RFC 1323 timestamp option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpTimestampRepr {
    pub tsval: u32,
    pub tsecr: u32,
}

/// A single recognized TCP option.
///
/// `Signature` is parsed and its length validated, but its payload is
/// never interpreted — spec §4.1: "accepted & ignored".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption<'a> {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    WindowScale(u8),
    SackPermitted,
    SackRange([Option<(u32, u32)>; 3]),
    Timestamp(TcpTimestampRepr),
    Signature,
    Unknown { kind: u8, data: &'a [u8] },
}

mod opt {
    pub const END: u8 = 0;
    pub const NOP: u8 = 1;
    pub const MSS: u8 = 2;
    pub const WS: u8 = 3;
    pub const SACKPERM: u8 = 4;
    pub const SACK: u8 = 5;
    pub const TS: u8 = 8;
    pub const SIGNATURE: u8 = 19;
}

impl<'a> TcpOption<'a> {
    /// Parses one option from the front of `buffer`, returning it and the
    /// remaining, unparsed tail. Malformed lengths terminate the parse by
    /// returning `Err` (spec §4.1: "malformed options terminate the parse
    /// silently" — the caller stops on `Err` without recording a drop).
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (kind, rest) = buffer.split_first().ok_or(Error)?;
        if *kind == opt::END {
            return Ok((&[], TcpOption::EndOfList));
        }
        if *kind == opt::NOP {
            return Ok((rest, TcpOption::NoOperation));
        }
        let (&len, rest) = rest.split_first().ok_or(Error)?;
        if len < 2 || len as usize > buffer.len() {
            return Err(Error);
        }
        let data = &buffer[2..len as usize];
        let tail = &buffer[len as usize..];
        let option = match (*kind, len) {
            (opt::MSS, 4) => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
            (opt::WS, 3) => TcpOption::WindowScale(data[0]),
            (opt::SACKPERM, 2) => TcpOption::SackPermitted,
            (opt::SACK, n) if n >= 2 && (n - 2) % 8 == 0 && (n - 2) / 8 <= 3 => {
                let mut ranges = [None; 3];
                for (i, chunk) in data.chunks_exact(8).enumerate() {
                    ranges[i] = Some((
                        NetworkEndian::read_u32(&chunk[0..4]),
                        NetworkEndian::read_u32(&chunk[4..8]),
                    ));
                }
                TcpOption::SackRange(ranges)
            }
            (opt::TS, 10) => TcpOption::Timestamp(TcpTimestampRepr {
                tsval: NetworkEndian::read_u32(&data[0..4]),
                tsecr: NetworkEndian::read_u32(&data[4..8]),
            }),
            (opt::SIGNATURE, 18) => TcpOption::Signature,
            (kind, _) => TcpOption::Unknown { kind, data },
        };
        Ok((tail, option))
    }

    /// Encoded length in bytes, including kind+length octets (0 for
    /// `EndOfList`/`NoOperation`, which are single-byte).
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::SackRange(s) => 2 + 8 * s.iter().flatten().count(),
            TcpOption::Timestamp(_) => 10,
            TcpOption::Signature => 18,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    pub fn emit(&self, buffer: &mut [u8]) -> usize {
        match self {
            TcpOption::EndOfList => {
                buffer[0] = opt::END;
                1
            }
            TcpOption::NoOperation => {
                buffer[0] = opt::NOP;
                1
            }
            TcpOption::MaxSegmentSize(mss) => {
                buffer[0] = opt::MSS;
                buffer[1] = 4;
                NetworkEndian::write_u16(&mut buffer[2..4], *mss);
                4
            }
            TcpOption::WindowScale(scale) => {
                buffer[0] = opt::WS;
                buffer[1] = 3;
                buffer[2] = *scale;
                3
            }
            TcpOption::SackPermitted => {
                buffer[0] = opt::SACKPERM;
                buffer[1] = 2;
                2
            }
            TcpOption::SackRange(ranges) => {
                let present: heapless::Vec<(u32, u32), 3> = ranges.iter().flatten().copied().collect();
                let len = 2 + 8 * present.len();
                buffer[0] = opt::SACK;
                buffer[1] = len as u8;
                for (i, (l, r)) in present.iter().enumerate() {
                    let off = 2 + i * 8;
                    NetworkEndian::write_u32(&mut buffer[off..off + 4], *l);
                    NetworkEndian::write_u32(&mut buffer[off + 4..off + 8], *r);
                }
                len
            }
            TcpOption::Timestamp(ts) => {
                buffer[0] = opt::TS;
                buffer[1] = 10;
                NetworkEndian::write_u32(&mut buffer[2..6], ts.tsval);
                NetworkEndian::write_u32(&mut buffer[6..10], ts.tsecr);
                10
            }
            TcpOption::Signature => {
                buffer[0] = opt::SIGNATURE;
                buffer[1] = 18;
                18
            }
            TcpOption::Unknown { kind, data } => {
                buffer[0] = *kind;
                buffer[1] = 2 + data.len() as u8;
                buffer[2..2 + data.len()].copy_from_slice(data);
                2 + data.len()
            }
        }
    }
}

/// A high-level, parsed representation of a TCP segment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub control: Control,
    pub seq_number: SeqNumber,
    pub ack_number: Option<SeqNumber>,
    pub window_len: u16,
    pub window_scale: Option<u8>,
    pub max_seg_size: Option<u16>,
    pub sack_permitted: bool,
    pub sack_ranges: [Option<(u32, u32)>; 3],
    pub timestamp: Option<TcpTimestampRepr>,
    pub ece: bool,
    pub cwr: bool,
    pub payload_len: usize,
}

impl Repr {
    /// Parses a segment's header. The preconditions of spec §4.1 (data
    /// offset within bounds, checksum already verified by the caller) are
    /// assumed to hold; violations surface as `Err` here instead.
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        let flags = packet.flags();
        let control = match (
            flags.contains(Flags::SYN),
            flags.contains(Flags::FIN),
            flags.contains(Flags::RST),
        ) {
            (true, _, _) => Control::Syn,
            (_, true, _) => Control::Fin,
            (_, _, true) => Control::Rst,
            _ => Control::None,
        };
        let ack_number = flags.contains(Flags::ACK).then(|| packet.ack_number());

        let mut repr = Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            control,
            seq_number: packet.seq_number(),
            ack_number,
            window_len: packet.window_len(),
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            sack_ranges: [None, None, None],
            timestamp: None,
            ece: flags.contains(Flags::ECE),
            cwr: flags.contains(Flags::CWR),
            payload_len: packet.payload().len(),
        };

        let mut options = packet.options();
        while !options.is_empty() {
            let (rest, option) = match TcpOption::parse(options) {
                Ok(v) => v,
                Err(_) => break,
            };
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => {}
                TcpOption::MaxSegmentSize(mss) => repr.max_seg_size = Some(mss),
                TcpOption::WindowScale(scale) => repr.window_scale = Some(scale),
                TcpOption::SackPermitted => repr.sack_permitted = true,
                TcpOption::SackRange(r) => repr.sack_ranges = r,
                TcpOption::Timestamp(ts) => repr.timestamp = Some(ts),
                TcpOption::Signature | TcpOption::Unknown { .. } => {}
            }
            options = rest;
        }

        Ok(repr)
    }

    /// Header length including options, rounded up to a multiple of 4
    /// bytes (spec §6: "EOL-terminated and zero-padded").
    pub fn header_len(&self) -> usize {
        let mut options_len = 0;
        if self.max_seg_size.is_some() {
            options_len += 4;
        }
        if let Some(_scale) = self.window_scale {
            options_len += 4; // NOP + WSCALE(3), padded
        }
        if self.sack_permitted {
            options_len += 4; // NOP + NOP + SACKPERM
        }
        if self.timestamp.is_some() {
            options_len += 12; // NOP + NOP + TIMESTAMP(10), padded
        }
        let sack_count = self.sack_ranges.iter().flatten().count();
        if sack_count > 0 {
            options_len += (2 + 8 * sack_count + 3) / 4 * 4;
        }
        HEADER_LEN + options_len
    }

    pub fn buffer_len(&self) -> usize {
        self.header_len()
    }

    /// Emits this representation's header (and options, in the fixed
    /// order of spec §6) into `packet`. `packet`'s buffer must be exactly
    /// `self.header_len()` bytes before the payload.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        packet.set_ack_number(self.ack_number.unwrap_or(SeqNumber(0)));
        packet.set_window_len(self.window_len);
        packet.set_urgent_at(0);

        let mut flags = Flags::empty();
        if self.ack_number.is_some() {
            flags |= Flags::ACK;
        }
        match self.control {
            Control::Syn => flags |= Flags::SYN,
            Control::Fin => flags |= Flags::FIN,
            Control::Rst => flags |= Flags::RST,
            Control::None => {}
        }
        if self.ece {
            flags |= Flags::ECE;
        }
        if self.cwr {
            flags |= Flags::CWR;
        }

        let header_len = self.header_len();
        packet.set_data_offset_and_flags(header_len as u8, flags);

        let options = packet.options_mut();
        let mut pos = 0;
        if let Some(mss) = self.max_seg_size {
            pos += TcpOption::MaxSegmentSize(mss).emit(&mut options[pos..]);
        }
        if let Some(scale) = self.window_scale {
            pos += TcpOption::NoOperation.emit(&mut options[pos..]);
            pos += TcpOption::WindowScale(scale).emit(&mut options[pos..]);
        }
        if self.sack_permitted {
            pos += TcpOption::NoOperation.emit(&mut options[pos..]);
            pos += TcpOption::NoOperation.emit(&mut options[pos..]);
            pos += TcpOption::SackPermitted.emit(&mut options[pos..]);
        }
        if let Some(ts) = self.timestamp {
            pos += TcpOption::NoOperation.emit(&mut options[pos..]);
            pos += TcpOption::NoOperation.emit(&mut options[pos..]);
            pos += TcpOption::Timestamp(ts).emit(&mut options[pos..]);
        }
        if self.sack_ranges.iter().any(Option::is_some) {
            pos += TcpOption::SackRange(self.sack_ranges).emit(&mut options[pos..]);
        }
        while pos < options.len() {
            options[pos] = 0;
            pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_number_wraps() {
        let a = SeqNumber::from_u32(0xFFFF_FFF0);
        let b = a + 32usize;
        assert!(b > a);
        assert_eq!(b - a, 32);
    }

    #[test]
    fn option_parse_mss() {
        let buf = [2u8, 4, 0x02, 0x38];
        let (rest, opt) = TcpOption::parse(&buf).unwrap();
        assert_eq!(opt, TcpOption::MaxSegmentSize(0x0238));
        assert!(rest.is_empty());
    }

    #[test]
    fn option_parse_malformed_length_errors() {
        let buf = [2u8, 200, 0, 0];
        assert!(TcpOption::parse(&buf).is_err());
    }

    #[test]
    fn repr_roundtrip_with_options() {
        let repr = Repr {
            src_port: 1000,
            dst_port: 2000,
            control: Control::Syn,
            seq_number: SeqNumber::from_u32(111),
            ack_number: None,
            window_len: 0xffff,
            window_scale: Some(0),
            max_seg_size: Some(474),
            sack_permitted: true,
            sack_ranges: [None, None, None],
            timestamp: Some(TcpTimestampRepr {
                tsval: 42,
                tsecr: 0,
            }),
            ece: false,
            cwr: false,
            payload_len: 0,
        };
        let mut buf = [0u8; 64];
        let len = repr.header_len();
        let mut packet = Packet::new_unchecked(&mut buf[..len]);
        repr.emit(&mut packet);
        let packet = Packet::new_checked(&buf[..len]).unwrap();
        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.src_port, 1000);
        assert_eq!(parsed.max_seg_size, Some(474));
        assert_eq!(parsed.window_scale, Some(0));
        assert!(parsed.sack_permitted);
        assert_eq!(parsed.timestamp.unwrap().tsval, 42);
        assert_eq!(parsed.control, Control::Syn);
    }
}
