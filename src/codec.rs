/// Erasure codec: Reed-Solomon + Local Reconstruction Codes (spec.md §4.1).
///
/// Grounded on the teacher's `file_storage.rs`, which drives
/// `reed_solomon_erasure::galois_8::ReedSolomon` directly against
/// fixed-size shards; generalized here to arbitrary `(k, m)` and extended
/// with an XOR-based LRC layer for cheap single-shard recovery.
use crate::error::{DecentralisError, DecentralisResult};
use crate::model::{FileMetadata, Sha256Digest};
use reed_solomon_erasure::galois_8::ReedSolomon;

#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub chunks: Vec<Vec<u8>>,
    pub chunk_hashes: Vec<Sha256Digest>,
    pub chunk_size: usize,
    pub lrc_groups: Vec<Vec<usize>>,
}

/// Partition `k` data indices into contiguous groups of `lrc_group_size`,
/// the last group taking whatever remains (spec.md §4.1 step 3).
pub fn lrc_groups(k: usize, lrc_group_size: usize) -> Vec<Vec<usize>> {
    (0..k)
        .collect::<Vec<_>>()
        .chunks(lrc_group_size.max(1))
        .map(|c| c.to_vec())
        .collect()
}

/// Encode `data` into `k + m + groups.len()` equally-sized chunks.
pub fn encode(data: &[u8], k: usize, m: usize, lrc_group_size: usize) -> DecentralisResult<EncodedFile> {
    if k == 0 {
        return Err(DecentralisError::ChunkEncoding("k must be >= 1".to_string()));
    }
    if k + m > 255 {
        return Err(DecentralisError::ChunkEncoding(
            "k + m must be <= 255 (GF(2^8) limit)".to_string(),
        ));
    }

    let chunk_size = data.len().div_ceil(k).max(1);
    let groups = lrc_groups(k, lrc_group_size);

    // Data shards, zero-padded.
    let mut shards: Vec<Vec<u8>> = Vec::with_capacity(k + m);
    for i in 0..k {
        let start = i * chunk_size;
        let mut shard = vec![0u8; chunk_size];
        if start < data.len() {
            let end = (start + chunk_size).min(data.len());
            shard[..end - start].copy_from_slice(&data[start..end]);
        }
        shards.push(shard);
    }

    // RS parity.
    if m > 0 {
        let rs = ReedSolomon::new(k, m)
            .map_err(|e| DecentralisError::ChunkEncoding(format!("{e:?}")))?;
        let mut all_shards = shards.clone();
        all_shards.extend((0..m).map(|_| vec![0u8; chunk_size]));
        rs.encode(&mut all_shards)
            .map_err(|e| DecentralisError::ChunkEncoding(format!("{e:?}")))?;
        shards = all_shards;
    }

    // LRC symbols: XOR of the data chunks in each group.
    for group in &groups {
        let mut symbol = vec![0u8; chunk_size];
        for &idx in group {
            xor_into(&mut symbol, &shards[idx]);
        }
        shards.push(symbol);
    }

    let chunk_hashes = shards.iter().map(|c| Sha256Digest::of(c)).collect();

    Ok(EncodedFile {
        chunks: shards,
        chunk_hashes,
        chunk_size,
        lrc_groups: groups,
    })
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Validate `available[i]` against `meta.chunk_hashes[i]`; a hash mismatch
/// is treated as though the chunk were absent (spec.md §4.1).
fn validate_available(meta: &FileMetadata, mut available: Vec<Option<Vec<u8>>>) -> Vec<Option<Vec<u8>>> {
    for (idx, slot) in available.iter_mut().enumerate() {
        if let Some(bytes) = slot {
            let expected = meta.chunk_hashes.get(idx);
            if expected != Some(&Sha256Digest::of(bytes)) {
                *slot = None;
            }
        }
    }
    available
}

/// Attempt LRC-only recovery of missing data chunks: fills in any data slot
/// whose group has exactly one missing member, given the LRC symbol and the
/// rest of the group. Returns whether anything changed.
fn lrc_recover_pass(meta: &FileMetadata, shards: &mut [Option<Vec<u8>>]) -> bool {
    let mut changed = false;
    for (group_offset, group) in meta.lrc_groups.iter().enumerate() {
        let lrc_index = meta.k + meta.m + group_offset;
        let missing: Vec<usize> = group.iter().copied().filter(|&i| shards[i].is_none()).collect();
        if missing.len() != 1 {
            continue;
        }
        let target = missing[0];
        let Some(symbol) = shards[lrc_index].clone() else {
            continue;
        };
        let mut recovered = symbol;
        let mut ok = true;
        for &idx in group {
            if idx == target {
                continue;
            }
            match &shards[idx] {
                Some(bytes) => xor_into(&mut recovered, bytes),
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            shards[target] = Some(recovered);
            changed = true;
        }
    }
    changed
}

/// Reconstruct the original plaintext from whatever chunks are available.
/// Prefers LRC recovery (cheap XOR) over RS reconstruction wherever a group
/// can be resolved on its own; falls back to RS for the rest.
pub fn reconstruct(meta: &FileMetadata, available: Vec<Option<Vec<u8>>>) -> DecentralisResult<Vec<u8>> {
    let total = meta.total_chunks();
    if available.len() != total {
        return Err(DecentralisError::ChunkDecoding(format!(
            "expected {total} chunk slots, got {}",
            available.len()
        )));
    }

    let mut shards = validate_available(meta, available);

    // Run LRC passes to a fixpoint: recovering one data shard can free up
    // another group that shared an LRC symbol boundary is not possible with
    // contiguous groups, but the loop is cheap and keeps this robust to
    // alternate group layouts.
    while lrc_recover_pass(meta, &mut shards) {}

    let missing_data = (0..meta.k).filter(|&i| shards[i].is_none()).count();
    if missing_data > 0 {
        let present_for_rs = shards[..meta.k + meta.m].iter().filter(|s| s.is_some()).count();
        if present_for_rs < meta.k {
            return Err(DecentralisError::InsufficientChunks(format!(
                "have {present_for_rs} of {} RS-eligible shards, need {}",
                meta.k + meta.m,
                meta.k
            )));
        }
        let rs = ReedSolomon::new(meta.k, meta.m)?;
        let mut rs_shards: Vec<Option<Vec<u8>>> = shards[..meta.k + meta.m].to_vec();
        rs.reconstruct(&mut rs_shards)?;
        for (i, shard) in rs_shards.into_iter().enumerate().take(meta.k) {
            if shards[i].is_none() {
                shards[i] = shard;
            }
        }
    }

    let mut plaintext = Vec::with_capacity(meta.k * meta.chunk_size);
    for i in 0..meta.k {
        let shard = shards[i]
            .as_ref()
            .ok_or_else(|| DecentralisError::InsufficientChunks(format!("data chunk {i} unrecoverable")))?;
        plaintext.extend_from_slice(shard);
    }
    plaintext.truncate(meta.original_size as usize);

    if Sha256Digest::of(&plaintext) != meta.content_hash {
        return Err(DecentralisError::ChunkDecoding(
            "reconstructed content hash mismatch".to_string(),
        ));
    }

    Ok(plaintext)
}

/// True iff `|available ∩ [0, k+m)| >= k` or an LRC shortcut can resolve the
/// missing data chunks — i.e. reconstruction could in principle succeed.
/// Used by the chunking manager to decide whether it has fetched enough.
pub fn can_reconstruct(meta: &FileMetadata, available: &[bool]) -> bool {
    let mut shards: Vec<Option<Vec<u8>>> = available
        .iter()
        .map(|&present| present.then(Vec::new))
        .collect();
    // lrc_recover_pass only needs presence, not content, to determine
    // whether a group is resolvable, so a zero-length placeholder suffices
    // as long as we don't XOR with it for real — reimplement the
    // presence-only check directly instead of reusing lrc_recover_pass.
    loop {
        let mut changed = false;
        for (group_offset, group) in meta.lrc_groups.iter().enumerate() {
            let lrc_index = meta.k + meta.m + group_offset;
            let missing: Vec<usize> = group.iter().copied().filter(|&i| shards[i].is_none()).collect();
            if missing.len() == 1 && shards[lrc_index].is_some() {
                let target = missing[0];
                if group.iter().all(|&idx| idx == target || shards[idx].is_some()) {
                    shards[target] = Some(Vec::new());
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    let missing_data = (0..meta.k).filter(|&i| shards[i].is_none()).count();
    if missing_data == 0 {
        return true;
    }
    let present_for_rs = shards[..meta.k + meta.m].iter().filter(|s| s.is_some()).count();
    present_for_rs >= meta.k
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn meta_for(encoded: &EncodedFile, k: usize, m: usize, original: &[u8]) -> FileMetadata {
        FileMetadata {
            file_uuid: Uuid::new_v4(),
            owner_uuid: Uuid::new_v4(),
            original_name: "test.bin".to_string(),
            original_size: original.len() as u64,
            original_sha256: Sha256Digest::of(original),
            k,
            m,
            chunk_size: encoded.chunk_size,
            lrc_group_size: 2,
            lrc_groups: encoded.lrc_groups.clone(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(30),
            content_hash: Sha256Digest::of(original),
            chunk_hashes: encoded.chunk_hashes.clone(),
        }
    }

    #[test]
    fn round_trip_full_set() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let encoded = encode(&data, 6, 4, 2).unwrap();
        let meta = meta_for(&encoded, 6, 4, &data);
        let available: Vec<Option<Vec<u8>>> = encoded.chunks.iter().cloned().map(Some).collect();
        let decoded = reconstruct(&meta, available).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn rs_recovery_with_minimum_shards() {
        let data = b"0123456789".repeat(500);
        let encoded = encode(&data, 6, 4, 2).unwrap();
        let meta = meta_for(&encoded, 6, 4, &data);
        let mut available: Vec<Option<Vec<u8>>> = encoded.chunks.iter().cloned().map(Some).collect();
        // Drop 4 of the RS-eligible shards (within tolerance of m=4), keep LRC out of it.
        available[1] = None;
        available[2] = None;
        available[7] = None;
        available[8] = None;
        // Remove LRC symbols entirely to force RS path.
        for i in meta.k + meta.m..meta.total_chunks() {
            available[i] = None;
        }
        let decoded = reconstruct(&meta, available).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn lrc_shortcut_recovers_single_missing_data_chunk() {
        let data = b"abcdefgh".repeat(1000);
        let encoded = encode(&data, 6, 4, 2).unwrap();
        let meta = meta_for(&encoded, 6, 4, &data);
        let total = meta.total_chunks();
        // Only chunk #0 and LRC symbol for group {0,1} are present.
        let mut available: Vec<Option<Vec<u8>>> = vec![None; total];
        available[0] = Some(encoded.chunks[0].clone());
        let lrc_index_for_group0 = meta.k + meta.m; // group {0,1} is first group
        available[lrc_index_for_group0] = Some(encoded.chunks[lrc_index_for_group0].clone());
        assert!(can_reconstruct(&meta, &available.iter().map(Option::is_some).collect::<Vec<_>>()) == false);

        // Adding chunk #1's presence should be unnecessary: LRC should recover it
        // from chunk #0 + the symbol alone once we also have every other data
        // chunk needed for a full reconstruct. For this targeted test we only
        // assert that the pure LRC XOR recovers shard #1 given #0 + symbol.
        let mut shards = vec![None; total];
        shards[0] = available[0].clone();
        shards[lrc_index_for_group0] = available[lrc_index_for_group0].clone();
        let changed = lrc_recover_pass(&meta, &mut shards);
        assert!(changed);
        assert_eq!(shards[1].as_ref().unwrap(), &encoded.chunks[1]);
    }

    #[test]
    fn insufficient_chunks_fails() {
        let data = b"payload".repeat(50);
        let encoded = encode(&data, 6, 4, 2).unwrap();
        let meta = meta_for(&encoded, 6, 4, &data);
        let total = meta.total_chunks();
        // Keep only 5 shards total (below k=6), dropping all LRC symbols too.
        let mut available: Vec<Option<Vec<u8>>> = vec![None; total];
        for i in 0..5 {
            available[i] = Some(encoded.chunks[i].clone());
        }
        let err = reconstruct(&meta, available).unwrap_err();
        assert!(matches!(err, DecentralisError::InsufficientChunks(_)));
    }

    #[test]
    fn corrupt_chunk_is_treated_as_missing() {
        let data = b"more payload bytes for testing purposes".repeat(80);
        let encoded = encode(&data, 6, 4, 2).unwrap();
        let meta = meta_for(&encoded, 6, 4, &data);
        let mut available: Vec<Option<Vec<u8>>> = encoded.chunks.iter().cloned().map(Some).collect();
        // Corrupt chunk 0 in place; its hash will no longer match chunk_hashes[0].
        available[0].as_mut().unwrap()[0] ^= 0xFF;
        let decoded = reconstruct(&meta, available).unwrap();
        assert_eq!(decoded, data);
    }
}
