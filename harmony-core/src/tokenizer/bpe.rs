//! Rank-ordered byte-pair merging.

use rustc_hash::FxHashMap;

use super::tiktoken::Rank;

/// Merges the bytes of `piece` by rank and returns the part boundaries.
///
/// The returned vector holds `(start, rank)` pairs; consecutive starts delimit
/// the final parts. The last two entries are sentinels.
fn byte_pair_merge(ranks: &FxHashMap<Vec<u8>, Rank>, piece: &[u8]) -> Vec<(usize, Rank)> {
    let mut parts = Vec::with_capacity(piece.len() + 1);

    let mut min_rank: (Rank, usize) = (Rank::MAX, usize::MAX);
    for i in 0..piece.len() - 1 {
        let rank = *ranks.get(&piece[i..i + 2]).unwrap_or(&Rank::MAX);
        if rank < min_rank.0 {
            min_rank = (rank, i);
        }
        parts.push((i, rank));
    }
    parts.push((piece.len() - 1, Rank::MAX));
    parts.push((piece.len(), Rank::MAX));

    let get_rank = |parts: &Vec<(usize, Rank)>, i: usize| {
        if (i + 3) < parts.len() {
            *ranks
                .get(&piece[parts[i].0..parts[i + 3].0])
                .unwrap_or(&Rank::MAX)
        } else {
            Rank::MAX
        }
    };

    while min_rank.0 != Rank::MAX {
        let i = min_rank.1;
        if i > 0 {
            parts[i - 1].1 = get_rank(&parts, i - 1);
        }
        parts[i].1 = get_rank(&parts, i);
        parts.remove(i + 1);

        min_rank = (Rank::MAX, usize::MAX);
        for (i, &(_, rank)) in parts[..parts.len() - 1].iter().enumerate() {
            if rank < min_rank.0 {
                min_rank = (rank, i);
            }
        }
    }
    parts
}

/// Encodes one pre-tokenized piece into ranks.
///
/// Every single byte must be present in `ranks`; [`super::CoreBpe::new`]
/// checks this before any piece is encoded. Unknown parts map to
/// `Rank::MAX`, which never happens for a validated vocabulary.
pub(crate) fn byte_pair_encode(piece: &[u8], ranks: &FxHashMap<Vec<u8>, Rank>) -> Vec<Rank> {
    match piece.len() {
        0 => Vec::new(),
        1 => vec![ranks.get(piece).copied().unwrap_or(Rank::MAX)],
        _ => byte_pair_merge(ranks, piece)
            .windows(2)
            .map(|part| {
                ranks
                    .get(&piece[part[0].0..part[1].0])
                    .copied()
                    .unwrap_or(Rank::MAX)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks(merges: &[&str]) -> FxHashMap<Vec<u8>, Rank> {
        let mut ranks: FxHashMap<Vec<u8>, Rank> =
            (0u8..=255).map(|b| (vec![b], Rank::from(b))).collect();
        for (i, merge) in merges.iter().enumerate() {
            ranks.insert(merge.as_bytes().to_vec(), 256 + i as Rank);
        }
        ranks
    }

    #[test]
    fn test_single_byte_piece() {
        let ranks = ranks(&[]);
        assert_eq!(byte_pair_encode(b"a", &ranks), vec![97]);
        assert!(byte_pair_encode(b"", &ranks).is_empty());
    }

    #[test]
    fn test_merges_follow_rank_order() {
        let ranks = ranks(&["he", "ll", "hell", "hello"]);
        assert_eq!(byte_pair_encode(b"hello", &ranks), vec![259]);
        assert_eq!(byte_pair_encode(b"hell", &ranks), vec![258]);
        // only the "ll" pair is in the vocabulary
        assert_eq!(byte_pair_encode(b"yellow", &ranks), vec![121, 101, 257, 111, 119]);
    }

    #[test]
    fn test_lower_rank_wins_overlapping_pairs() {
        let ranks = ranks(&["bc", "ab"]);
        assert_eq!(byte_pair_encode(b"abc", &ranks), vec![97, 256]);
    }
}
