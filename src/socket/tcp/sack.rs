/*! SACK scoreboard maintenance (spec §4.6), operating on the per-TCB
[`SackHoles`] arena.
*/

use crate::storage::SackHoles;
use crate::wire::TcpSeqNumber;

/// Frees every hole fully covered by a new cumulative ACK, deducting its
/// retransmitted-byte count from `sack_bytes_rexmit`.
pub fn on_cumulative_ack(holes: &mut SackHoles, snd_una: TcpSeqNumber, sack_bytes_rexmit: &mut u32) {
    let covered: heapless::Vec<u8, { crate::config::MAX_SACKHOLES }> = holes
        .iter()
        .filter(|(_, h)| h.end <= snd_una)
        .map(|(idx, _)| idx)
        .collect();
    for idx in covered {
        let hole = holes.get(idx);
        *sack_bytes_rexmit = sack_bytes_rexmit.saturating_sub((hole.rxmit - hole.start) as u32);
        holes.remove(idx);
    }
}

/// Merges one received SACK block `[start, end)` (already clipped to
/// `(snd_una, snd_max]` by the caller) into the scoreboard, extending
/// `snd_fack` when the block lies entirely beyond it.
pub fn merge_sack_block(
    holes: &mut SackHoles,
    snd_fack: &mut TcpSeqNumber,
    sack_bytes_rexmit: &mut u32,
    start: TcpSeqNumber,
    end: TcpSeqNumber,
) {
    if start >= *snd_fack {
        if start > *snd_fack {
            holes.insert(*snd_fack, start);
        }
        *snd_fack = end;
        return;
    }

    // The block may overlap one or more existing holes; walk them and
    // shrink/split/delete as needed (spec §4.6).
    loop {
        let Some((idx, hole)) = holes.find_containing(start).or_else(|| {
            holes
                .iter()
                .find(|(_, h)| h.start < end && h.end > start)
        }) else {
            break;
        };
        let overlap_start = start.max(hole.start);
        let overlap_end = end.min(hole.end);
        if overlap_start >= overlap_end {
            break;
        }
        // Only the part of the hole's already-retransmitted span that falls
        // inside this overlap is actually being acked here; any of it past
        // `overlap_end` survives into the new right-hand hole `split`
        // produces and must stay counted (spec §4.6, Testable Property 6).
        let rxmit_in_overlap = if hole.rxmit < overlap_start {
            overlap_start
        } else if hole.rxmit > overlap_end {
            overlap_end
        } else {
            hole.rxmit
        };
        let retired = (rxmit_in_overlap - overlap_start).max(0) as u32;
        holes.split(idx, overlap_start, overlap_end);
        *sack_bytes_rexmit = sack_bytes_rexmit.saturating_sub(retired);
    }

    if end > *snd_fack {
        *snd_fack = end;
    }
}

/// `tcp_sack_output`: the next hole worth retransmitting, i.e. one whose
/// `rxmit < end`, starting from `hint` when it still names a live hole.
pub fn next_rexmit_hole(holes: &SackHoles, hint: Option<u8>) -> Option<u8> {
    let start_from = hint.filter(|idx| holes.iter().any(|(i, _)| i == *idx));
    let mut started = start_from.is_none();
    for (idx, hole) in holes.iter() {
        if !started {
            if Some(idx) == start_from {
                started = true;
            } else {
                continue;
            }
        }
        if hole.rxmit < hole.end {
            return Some(idx);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sn(n: u32) -> TcpSeqNumber {
        TcpSeqNumber::from_u32(n)
    }

    #[test]
    fn block_beyond_fack_extends_tail() {
        let mut holes = SackHoles::new();
        let mut fack = sn(1000);
        let mut rexmit = 0;
        merge_sack_block(&mut holes, &mut fack, &mut rexmit, sn(1100), sn(1200));
        assert_eq!(fack, sn(1200));
        let ranges: heapless::Vec<(u32, u32), 3> = holes
            .iter()
            .map(|(_, h)| (h.start.to_u32(), h.end.to_u32()))
            .collect();
        assert_eq!(ranges, [(1000, 1100)]);
    }

    #[test]
    fn cumulative_ack_frees_covered_holes() {
        let mut holes = SackHoles::new();
        holes.insert(sn(100), sn(200));
        holes.insert(sn(300), sn(400));
        let mut rexmit = 0;
        on_cumulative_ack(&mut holes, sn(250), &mut rexmit);
        let ranges: heapless::Vec<(u32, u32), 3> = holes
            .iter()
            .map(|(_, h)| (h.start.to_u32(), h.end.to_u32()))
            .collect();
        assert_eq!(ranges, [(300, 400)]);
    }
}
