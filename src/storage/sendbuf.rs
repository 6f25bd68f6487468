/*! Linked send buffer ("lbuf", spec §2.2).

A FIFO of caller-owned buffer descriptors. The TCB never copies outbound
data into a staging area: `send_by_reference` hands in a borrow, and that
borrow is held until the bytes it covers are cumulatively ACKed, at which
point ownership is returned to the caller via `send_done` (spec §6 callback
contract, Testable Property 4).

Grounded on `original_source/third_party/tcplp/lib/lbuf.{h,c}`, adapted
from an intrusive pointer-linked list (the original threads entries through
caller-supplied `struct lbufent` nodes) to a fixed-capacity ring of
borrows, since this crate has no allocator and no pointer-stable storage to
thread an intrusive list through.
*/

use heapless::Deque;

/// Upper bound on the number of outstanding (unacked) send buffer entries
/// per connection. A caller that needs more concurrent entries must wait
/// for `send_done` to fire, same as the original's fixed `lbufent` pool
/// would force once exhausted.
pub const SEND_BUF_ENTRIES: usize = 8;

struct Entry<'a> {
    data: &'a [u8],
    /// Bytes at the front of `data` already cumulatively ACKed and popped.
    popped: usize,
    /// `MORE_TO_COME` flag recorded at `send_by_reference` time (spec §6).
    more_to_come: bool,
}

impl<'a> Entry<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.popped
    }
}

/// FIFO of borrowed send buffer entries, plus O(1) queries over byte
/// offsets into the logical (unacked) stream.
pub struct SendBuffer<'a> {
    entries: Deque<Entry<'a>, SEND_BUF_ENTRIES>,
    /// Total unacked bytes currently queued across all entries.
    used: usize,
}

/// Returned by `locate`: references into the buffer that collectively cover
/// `[offset, offset+len)` of the unacked stream, for zero-copy read-out by
/// `tcp_output`.
pub struct Range<'a> {
    pub first: &'a [u8],
    pub first_offset: usize,
    pub last: &'a [u8],
    pub last_extra: usize,
}

impl<'a> SendBuffer<'a> {
    pub fn new() -> Self {
        SendBuffer {
            entries: Deque::new(),
            used: 0,
        }
    }

    pub fn used_space(&self) -> usize {
        self.used
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Appends a new caller-owned descriptor. Fails with the slice handed
    /// back if the fixed-size entry pool is exhausted.
    pub fn append(&mut self, data: &'a [u8], more_to_come: bool) -> Result<(), &'a [u8]> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len();
        let entry = Entry {
            data,
            popped: 0,
            more_to_come,
        };
        match self.entries.push_back(entry) {
            Ok(()) => {
                self.used += len;
                Ok(())
            }
            Err(entry) => Err(entry.data),
        }
    }

    /// True if the last queued entry asked to suppress PSH (more data is
    /// coming from the same logical write).
    pub fn more_to_come(&self) -> bool {
        self.entries.back().is_some_and(|e| e.more_to_come)
    }

    /// Pops up to `numbytes` from the front, invoking `on_done` once, in
    /// FIFO order, for every entry whose last byte was included. Returns
    /// the number of bytes actually popped.
    pub fn pop<F: FnMut(&'a [u8])>(&mut self, numbytes: usize, mut on_done: F) -> usize {
        let mut remaining = numbytes.min(self.used);
        let mut popped_total = 0;
        while remaining > 0 {
            let Some(front) = self.entries.front_mut() else {
                break;
            };
            let avail = front.remaining();
            if avail <= remaining {
                remaining -= avail;
                popped_total += avail;
                let entry = self.entries.pop_front().expect("front just checked");
                on_done(entry.data);
            } else {
                front.popped += remaining;
                popped_total += remaining;
                remaining = 0;
            }
        }
        self.used -= popped_total;
        popped_total
    }

    /// Locates the entry range covering unacked-stream bytes
    /// `[offset, offset+len)`. Returns `None` if the buffer doesn't hold
    /// that many bytes (mirrors `lbuf_getrange`'s failure case).
    pub fn locate(&self, offset: usize, len: usize) -> Option<Range<'a>> {
        if len == 0 || offset + len > self.used {
            return None;
        }
        let mut pos = 0usize;
        let mut first: Option<(&[u8], usize)> = None;
        let mut last: Option<(&[u8], usize)> = None;
        for entry in self.entries.iter() {
            let avail = entry.remaining();
            let entry_start = pos;
            let entry_end = pos + avail;
            let data = &entry.data[entry.popped..];

            if first.is_none() && offset < entry_end {
                first = Some((data, offset - entry_start));
            }
            if first.is_some() && offset + len <= entry_end {
                last = Some((data, entry_end - (offset + len)));
                break;
            }
            pos = entry_end;
        }
        match (first, last) {
            (Some((first, first_offset)), Some((last, last_extra))) => Some(Range {
                first,
                first_offset,
                last,
                last_extra,
            }),
            _ => None,
        }
    }
}

impl<'a> Default for SendBuffer<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_used_space() {
        let mut buf = SendBuffer::new();
        buf.append(b"hello", false).unwrap();
        buf.append(b"world", false).unwrap();
        assert_eq!(buf.used_space(), 10);
    }

    #[test]
    fn pop_fires_send_done_in_fifo_order() {
        let mut buf = SendBuffer::new();
        buf.append(b"hello", false).unwrap();
        buf.append(b"world", false).unwrap();
        let mut done: heapless::Vec<&[u8], 4> = heapless::Vec::new();
        let popped = buf.pop(5, |entry| done.push(entry).unwrap());
        assert_eq!(popped, 5);
        assert_eq!(done.as_slice(), &[b"hello".as_slice()]);
        assert_eq!(buf.used_space(), 5);

        let popped = buf.pop(5, |entry| done.push(entry).unwrap());
        assert_eq!(popped, 5);
        assert_eq!(done.as_slice(), &[b"hello".as_slice(), b"world".as_slice()]);
        assert_eq!(buf.used_space(), 0);
    }

    #[test]
    fn pop_splits_an_entry() {
        let mut buf = SendBuffer::new();
        buf.append(b"hello world", false).unwrap();
        let mut done_count = 0;
        let popped = buf.pop(5, |_| done_count += 1);
        assert_eq!(popped, 5);
        assert_eq!(done_count, 0);
        assert_eq!(buf.used_space(), 6);
        let popped = buf.pop(6, |_| done_count += 1);
        assert_eq!(popped, 6);
        assert_eq!(done_count, 1);
    }

    #[test]
    fn locate_spans_two_entries() {
        let mut buf = SendBuffer::new();
        buf.append(b"hello", false).unwrap();
        buf.append(b"world", false).unwrap();
        let range = buf.locate(3, 4).unwrap();
        assert_eq!(range.first, b"hello");
        assert_eq!(range.first_offset, 3);
        assert_eq!(range.last, b"world");
        assert_eq!(range.last_extra, 3);
    }

    #[test]
    fn locate_out_of_range_is_none() {
        let mut buf = SendBuffer::new();
        buf.append(b"hi", false).unwrap();
        assert!(buf.locate(0, 10).is_none());
    }
}
