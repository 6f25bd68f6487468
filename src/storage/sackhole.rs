/*! Fixed-capacity SACK scoreboard arena (spec §2.1, §4.6).

The original's `tcpcb` keeps the hole list as a real linked list of heap
allocations (`tcp_sack.c`'s `sackhole` objects, `malloc`'d from `M_SACKHOLE`
and freed back to it). There is no allocator here, so the pool is a fixed
array of [`MAX_SACKHOLES`](crate::config::MAX_SACKHOLES) slots, with
occupancy tracked in a one-byte [`Bitmap`] and ordering kept as an
intrusive singly-linked list threaded through `next` indices — the same
shape `tcp_var.h`'s `TAILQ` gives the original, minus the allocator.
*/

use crate::config::MAX_SACKHOLES;
use crate::storage::Bitmap;
use crate::wire::TcpSeqNumber;

#[derive(Debug, Clone, Copy)]
struct Hole {
    start: TcpSeqNumber,
    end: TcpSeqNumber,
    rxmit: TcpSeqNumber,
    next: Option<u8>,
}

/// A fixed-capacity, ordered list of SACK holes.
pub struct SackHoles {
    slots: [Option<Hole>; MAX_SACKHOLES],
    occupied: [u8; 1],
    head: Option<u8>,
}

impl SackHoles {
    pub fn new() -> Self {
        SackHoles {
            slots: [None; MAX_SACKHOLES],
            occupied: [0u8],
            head: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_SACKHOLES];
        self.occupied = [0u8];
        self.head = None;
    }

    fn bitmap(&mut self) -> Bitmap<'_> {
        Bitmap::new(&mut self.occupied)
    }

    fn alloc_slot(&mut self) -> Option<u8> {
        let idx = self.bitmap().find_clear_from(0)?;
        self.bitmap().set(idx);
        Some(idx as u8)
    }

    fn free_slot(&mut self, idx: u8) {
        self.bitmap().clear(idx as usize);
        self.slots[idx as usize] = None;
    }

    /// Iterates holes in ascending-sequence order.
    pub fn iter(&self) -> HoleIter<'_> {
        HoleIter {
            holes: self,
            cur: self.head,
        }
    }

    /// Finds the first hole whose `[start, end)` contains `seq`.
    pub fn find_containing(&self, seq: TcpSeqNumber) -> Option<(u8, Hole)> {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let hole = self.slots[idx as usize].expect("linked slot must be occupied");
            if seq >= hole.start && seq < hole.end {
                return Some((idx, hole));
            }
            cur = hole.next;
        }
        None
    }

    /// Inserts a new hole `[start, end)` in sequence order. Returns `false`
    /// (silently dropping the hole, per spec §4.6 "the pool is exhausted")
    /// if the pool has no free slot.
    pub fn insert(&mut self, start: TcpSeqNumber, end: TcpSeqNumber) -> bool {
        self.insert_with_rxmit(start, end, start)
    }

    /// Like [`insert`](Self::insert), but seeds `rxmit` explicitly instead
    /// of "nothing retransmitted yet" — used by `split` when the remainder
    /// of a shrunk hole already had bytes retransmitted past its new start
    /// (spec §4.6, the rexmit-pending byte count must carry over, not reset).
    pub fn insert_with_rxmit(&mut self, start: TcpSeqNumber, end: TcpSeqNumber, rxmit: TcpSeqNumber) -> bool {
        let Some(idx) = self.alloc_slot() else {
            return false;
        };
        let new_hole = Hole {
            start,
            end,
            rxmit,
            next: None,
        };

        let mut prev: Option<u8> = None;
        let mut cur = self.head;
        while let Some(cur_idx) = cur {
            let cur_hole = self.slots[cur_idx as usize].expect("linked slot must be occupied");
            if start < cur_hole.start {
                break;
            }
            prev = Some(cur_idx);
            cur = cur_hole.next;
        }

        self.slots[idx as usize] = Some(Hole {
            next: cur,
            ..new_hole
        });
        match prev {
            Some(prev_idx) => {
                self.slots[prev_idx as usize].as_mut().unwrap().next = Some(idx);
            }
            None => self.head = Some(idx),
        }
        true
    }

    /// Removes the hole at `idx` from the list and frees its slot.
    pub fn remove(&mut self, idx: u8) {
        let next = self.slots[idx as usize].and_then(|h| h.next);
        if self.head == Some(idx) {
            self.head = next;
        } else {
            let mut cur = self.head;
            while let Some(cur_idx) = cur {
                let cur_hole = self.slots[cur_idx as usize].unwrap();
                if cur_hole.next == Some(idx) {
                    self.slots[cur_idx as usize].as_mut().unwrap().next = next;
                    break;
                }
                cur = cur_hole.next;
            }
        }
        self.free_slot(idx);
    }

    /// Shrinks the hole at `idx` to start at `new_start`, removing it
    /// outright if that empties the hole. Used when new SACKed data
    /// eats into the front of a hole (spec §4.6).
    pub fn advance_start(&mut self, idx: u8, new_start: TcpSeqNumber) {
        let hole = self.slots[idx as usize].as_mut().expect("slot occupied");
        hole.start = new_start;
        if hole.rxmit < new_start {
            hole.rxmit = new_start;
        }
        if hole.start >= hole.end {
            self.remove(idx);
        }
    }

    /// Splits the hole at `idx` around a newly-SACKed `[sack_start,
    /// sack_end)` range fully inside it, shrinking it to the left part and
    /// inserting a new hole for the right part if one remains.
    pub fn split(&mut self, idx: u8, sack_start: TcpSeqNumber, sack_end: TcpSeqNumber) {
        let hole = self.slots[idx as usize].expect("slot occupied");
        let right_start = sack_end;
        let right_end = hole.end;
        let right_rxmit = if hole.rxmit > right_start { hole.rxmit } else { right_start };

        if sack_start <= hole.start {
            self.advance_start(idx, sack_end);
        } else {
            let left = self.slots[idx as usize].as_mut().unwrap();
            left.end = sack_start;
            if left.rxmit > sack_start {
                left.rxmit = sack_start;
            }
            if right_start < right_end {
                self.insert_with_rxmit(right_start, right_end, right_rxmit);
            }
        }
    }

    pub fn get(&self, idx: u8) -> Hole {
        self.slots[idx as usize].expect("slot occupied")
    }

    pub fn set_rxmit(&mut self, idx: u8, rxmit: TcpSeqNumber) {
        self.slots[idx as usize].as_mut().expect("slot occupied").rxmit = rxmit;
    }
}

impl Default for SackHoles {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HoleIter<'a> {
    holes: &'a SackHoles,
    cur: Option<u8>,
}

impl<'a> Iterator for HoleIter<'a> {
    type Item = (u8, Hole);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let hole = self.holes.slots[idx as usize].expect("linked slot must be occupied");
        self.cur = hole.next;
        Some((idx, hole))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sn(n: u32) -> TcpSeqNumber {
        TcpSeqNumber::from_u32(n)
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let mut holes = SackHoles::new();
        assert!(holes.insert(sn(100), sn(200)));
        assert!(holes.insert(sn(300), sn(400)));
        assert!(holes.insert(sn(50), sn(80)));
        let starts: heapless::Vec<u32, 3> = holes.iter().map(|(_, h)| h.start.to_u32()).collect();
        assert_eq!(starts, [50, 100, 300]);
    }

    #[test]
    fn pool_exhaustion_drops_insert() {
        let mut holes = SackHoles::new();
        for i in 0..crate::config::MAX_SACKHOLES as u32 {
            assert!(holes.insert(sn(i * 100), sn(i * 100 + 50)));
        }
        assert!(!holes.insert(sn(9999), sn(10000)));
    }

    #[test]
    fn split_in_the_middle_creates_right_remainder() {
        let mut holes = SackHoles::new();
        holes.insert(sn(100), sn(200));
        let (idx, _) = holes.find_containing(sn(150)).unwrap();
        holes.split(idx, sn(140), sn(160));
        let ranges: heapless::Vec<(u32, u32), 3> = holes
            .iter()
            .map(|(_, h)| (h.start.to_u32(), h.end.to_u32()))
            .collect();
        assert_eq!(ranges, [(100, 140), (160, 200)]);
    }

    #[test]
    fn advance_start_past_end_removes_hole() {
        let mut holes = SackHoles::new();
        holes.insert(sn(100), sn(200));
        let (idx, _) = holes.find_containing(sn(150)).unwrap();
        holes.advance_start(idx, sn(200));
        assert!(holes.is_empty());
    }
}
