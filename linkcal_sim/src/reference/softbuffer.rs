//! Reference PUSCH decoders and their soft-buffer pool.
//!
//! Soft buffers are keyed by `(rnti, harq_ack_id)` and hold the accumulated
//! LLRs of the whole circular buffer. A new transport block invalidates the
//! buffer; a retransmission with a different number of codeblocks than the
//! stored one is rejected. A buffer whose block passed the CRC skips decoding
//! until [`SoftBufferPool::reset_crcs`].

use super::pusch::{check_crc, mother_code_position, rv_start};
use linkcal_core::DecoderKind;
use linkcal_env::types::TB_CRC_LENGTH;
use linkcal_env::{DecodeResult, PhyError, PuschDecoder, SegmentConfig, SoftBufferId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Accumulated LLRs of one HARQ process.
#[derive(Debug, Clone)]
struct SoftBuffer {
    nof_codeblocks: usize,
    llrs: Vec<i32>,
    /// Set once the block decoded with a valid CRC
    crc_ok: bool,
    decoded: Vec<u8>,
    last_slot: u64,
}

/// Soft-buffer pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftBufferPoolConfig {
    pub max_softbuffers: usize,

    /// Largest codeblock count a single buffer may hold
    pub max_nof_codeblocks: usize,

    /// Decode calls a buffer may stay untouched before it is dropped
    pub expire_timeout_slots: u64,
}

impl Default for SoftBufferPoolConfig {
    fn default() -> Self {
        Self {
            max_softbuffers: 64,
            max_nof_codeblocks: 64,
            expire_timeout_slots: 100,
        }
    }
}

/// Pool of soft buffers.
///
/// Every reservation counts as one slot. Buffers idle for more than
/// `expire_timeout_slots` are dropped before a new one is allocated.
#[derive(Debug, Clone, Default)]
pub struct SoftBufferPool {
    config: SoftBufferPoolConfig,
    buffers: HashMap<(u16, u8), SoftBuffer>,
    slot: u64,
}

impl SoftBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SoftBufferPoolConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SoftBufferPoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn contains(&self, id: &SoftBufferId) -> bool {
        self.buffers.contains_key(&(id.rnti, id.harq_ack_id))
    }

    /// Returns the buffer for `id`, invalidated if `new_data`.
    fn reserve(
        &mut self,
        id: &SoftBufferId,
        buffer_len: usize,
        new_data: bool,
    ) -> Result<&mut SoftBuffer, PhyError> {
        if id.nof_codeblocks == 0 || id.nof_codeblocks > self.config.max_nof_codeblocks {
            return Err(PhyError::SoftBuffer(format!(
                "buffer (rnti {}, harq {}) requested with {} codeblocks, pool allows 1 to {}",
                id.rnti, id.harq_ack_id, id.nof_codeblocks, self.config.max_nof_codeblocks
            )));
        }

        self.slot += 1;
        let slot = self.slot;
        let timeout = self.config.expire_timeout_slots;
        let before = self.buffers.len();
        self.buffers.retain(|_, buffer| slot - buffer.last_slot <= timeout);
        if self.buffers.len() < before {
            debug!("Expired {} soft buffers at slot {}", before - self.buffers.len(), slot);
        }

        let key = (id.rnti, id.harq_ack_id);
        match self.buffers.get(&key) {
            Some(existing) if !new_data && existing.nof_codeblocks != id.nof_codeblocks => {
                return Err(PhyError::SoftBuffer(format!(
                    "buffer (rnti {}, harq {}) holds {} codeblocks, retransmission has {}",
                    id.rnti, id.harq_ack_id, existing.nof_codeblocks, id.nof_codeblocks
                )));
            }
            None if self.buffers.len() >= self.config.max_softbuffers => {
                return Err(PhyError::SoftBuffer(format!(
                    "no free soft buffer for (rnti {}, harq {}): all {} in use",
                    id.rnti, id.harq_ack_id, self.config.max_softbuffers
                )));
            }
            _ => {}
        }

        let buffer = self.buffers.entry(key).or_insert_with(|| SoftBuffer {
            nof_codeblocks: id.nof_codeblocks,
            llrs: vec![0; buffer_len],
            crc_ok: false,
            decoded: Vec::new(),
            last_slot: slot,
        });
        buffer.last_slot = slot;
        if new_data || buffer.llrs.len() != buffer_len {
            buffer.nof_codeblocks = id.nof_codeblocks;
            buffer.llrs.clear();
            buffer.llrs.resize(buffer_len, 0);
            buffer.crc_ok = false;
            buffer.decoded.clear();
        }
        Ok(buffer)
    }

    /// Forgets the CRC outcome of `id` so the next decode runs again.
    pub fn reset_crcs(&mut self, id: &SoftBufferId) -> Result<(), PhyError> {
        let buffer = self
            .buffers
            .get_mut(&(id.rnti, id.harq_ack_id))
            .ok_or_else(|| {
                PhyError::SoftBuffer(format!(
                    "no soft buffer for (rnti {}, harq {})",
                    id.rnti, id.harq_ack_id
                ))
            })?;
        buffer.crc_ok = false;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.slot = 0;
    }
}

fn check_segment(
    llrs: &[i8],
    segment: &SegmentConfig,
    buffer: &SoftBufferId,
) -> Result<usize, PhyError> {
    if llrs.len() != segment.codeword_bits {
        return Err(PhyError::decoding(format!(
            "received {} soft bits, expected {}",
            llrs.len(),
            segment.codeword_bits
        )));
    }
    if segment.tbs == 0 || segment.rv > 3 {
        return Err(PhyError::invalid("segment", format!("{:?}", segment)));
    }
    if buffer.nof_codeblocks != segment.nof_codeblocks() {
        return Err(PhyError::SoftBuffer(format!(
            "buffer (rnti {}, harq {}) requested with {} codeblocks, codeword has {}",
            buffer.rnti,
            buffer.harq_ack_id,
            buffer.nof_codeblocks,
            segment.nof_codeblocks()
        )));
    }
    Ok(3 * (segment.tbs + TB_CRC_LENGTH))
}

/// Adds the rate-matched LLRs into the circular buffer.
fn derate_match(buffer: &mut [i32], llrs: &[i8], rv: u8) {
    let n = buffer.len();
    let k0 = rv_start(rv, n);
    for (j, &llr) in llrs.iter().enumerate() {
        buffer[(k0 + j) % n] += i32::from(llr);
    }
}

/// Combines the three copies of every bit and checks the CRC.
fn decode_buffer(buffer: &[i32], tbs: usize) -> DecodeResult {
    let k = tbs + TB_CRC_LENGTH;
    let block: Vec<u8> = (0..k)
        .map(|i| {
            let sum: i32 = (0..3).map(|copy| buffer[mother_code_position(copy, i, k)]).sum();
            u8::from(sum < 0)
        })
        .collect();

    let crc_ok = check_crc(&block);
    DecodeResult {
        transport_block: block[..tbs].to_vec(),
        crc_ok,
        iterations: 1,
    }
}

/// Decoder combining soft bits across retransmissions.
#[derive(Debug, Clone, Default)]
pub struct SoftCombiningDecoder {
    pool: SoftBufferPool,
}

impl SoftCombiningDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(config: SoftBufferPoolConfig) -> Self {
        Self {
            pool: SoftBufferPool::with_config(config),
        }
    }

    pub fn pool(&self) -> &SoftBufferPool {
        &self.pool
    }

    pub fn reset_crcs(&mut self, buffer: &SoftBufferId) -> Result<(), PhyError> {
        self.pool.reset_crcs(buffer)
    }
}

impl PuschDecoder for SoftCombiningDecoder {
    fn decode(
        &mut self,
        llrs: &[i8],
        segment: &SegmentConfig,
        buffer: &SoftBufferId,
        new_data: bool,
    ) -> Result<DecodeResult, PhyError> {
        let buffer_len = check_segment(llrs, segment, buffer)?;
        let soft = self.pool.reserve(buffer, buffer_len, new_data)?;
        derate_match(&mut soft.llrs, llrs, segment.rv);
        if soft.crc_ok {
            // Already decoded; only the soft bits are accumulated
            return Ok(DecodeResult {
                transport_block: soft.decoded.clone(),
                crc_ok: true,
                iterations: 0,
            });
        }

        let result = decode_buffer(&soft.llrs, segment.tbs);
        if result.crc_ok {
            soft.crc_ok = true;
            soft.decoded.clone_from(&result.transport_block);
        }
        Ok(result)
    }

    fn release(&mut self) {
        debug!("Releasing {} soft buffers", self.pool.len());
        self.pool.clear();
    }
}

/// Decoder using the soft bits of the current transmission only.
#[derive(Debug, Clone, Default)]
pub struct HardDecisionDecoder;

impl PuschDecoder for HardDecisionDecoder {
    fn decode(
        &mut self,
        llrs: &[i8],
        segment: &SegmentConfig,
        buffer: &SoftBufferId,
        _new_data: bool,
    ) -> Result<DecodeResult, PhyError> {
        let buffer_len = check_segment(llrs, segment, buffer)?;
        let mut soft = vec![0; buffer_len];
        derate_match(&mut soft, llrs, segment.rv);
        Ok(decode_buffer(&soft, segment.tbs))
    }

    fn release(&mut self) {}
}

/// Builds the decoder variant selected by `kind`.
pub fn build_decoder(kind: DecoderKind) -> Box<dyn PuschDecoder + Send> {
    match kind {
        DecoderKind::SoftCombining => Box::new(SoftCombiningDecoder::new()),
        DecoderKind::HardDecision => Box::new(HardDecisionDecoder),
    }
}

#[cfg(test)]
mod tests {
    use super::super::pusch::{attach_crc, encode, quantize_llr, rate_match};
    use super::*;
    use linkcal_env::{Modulation, PuschConfig};

    fn segment(rv: u8) -> SegmentConfig {
        SegmentConfig::for_pusch(&PuschConfig::default(), rv)
    }

    fn id(harq: u8) -> SoftBufferId {
        SoftBufferId {
            rnti: 1,
            harq_ack_id: harq,
            nof_codeblocks: 1,
        }
    }

    /// Noiseless LLRs; with `keep = Some(r)` only soft bits `j % 3 == r` survive.
    fn llrs(tb: &[u8], rv: u8, keep: Option<usize>) -> Vec<i8> {
        let seg = segment(rv);
        rate_match(&encode(&attach_crc(tb)), rv, seg.codeword_bits)
            .iter()
            .enumerate()
            .map(|(j, &bit)| match keep {
                Some(residue) if j % 3 != residue => 0,
                _ => quantize_llr(if bit == 0 { 5.0 } else { -5.0 }),
            })
            .collect()
    }

    fn transport_block() -> Vec<u8> {
        (0..segment(0).tbs).map(|i| ((i * 7 + 3) % 5 % 2) as u8).collect()
    }

    #[test]
    fn test_clean_decode() {
        let tb = transport_block();
        for kind in [DecoderKind::SoftCombining, DecoderKind::HardDecision] {
            let mut decoder = build_decoder(kind);
            let result = decoder.decode(&llrs(&tb, 0, None), &segment(0), &id(0), true).unwrap();
            assert!(result.crc_ok);
            assert_eq!(result.transport_block, tb);
            assert_eq!(result.iterations, 1);
        }
    }

    #[test]
    fn test_soft_combining_recovers_erasures() {
        let tb = transport_block();
        // Only a third of the soft bits survive each transmission
        let first = llrs(&tb, 0, Some(0));
        let second = llrs(&tb, 2, Some(1));

        let mut hard = HardDecisionDecoder;
        assert!(!hard.decode(&second, &segment(2), &id(0), false).unwrap().crc_ok);

        let mut soft = SoftCombiningDecoder::new();
        let r1 = soft.decode(&first, &segment(0), &id(0), true).unwrap();
        let r2 = soft.decode(&second, &segment(2), &id(0), false).unwrap();
        assert!(!r1.crc_ok);
        assert!(r2.crc_ok);
        assert_eq!(r2.transport_block, tb);
    }

    #[test]
    fn test_new_data_invalidates_buffer() {
        let tb = transport_block();
        let mut soft = SoftCombiningDecoder::new();
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(3), true).unwrap();

        let other: Vec<u8> = tb.iter().map(|b| b ^ 1).collect();
        let result = soft.decode(&llrs(&other, 0, None), &segment(0), &id(3), true).unwrap();
        assert!(result.crc_ok);
        assert_eq!(result.transport_block, other);
    }

    #[test]
    fn test_codeblock_mismatch_rejected() {
        let tb = transport_block();
        let mut soft = SoftCombiningDecoder::new();
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(1), true).unwrap();

        let mismatched = SoftBufferId {
            nof_codeblocks: 2,
            ..id(1)
        };
        let err = soft
            .decode(&llrs(&tb, 2, None), &segment(2), &mismatched, false)
            .unwrap_err();
        assert!(matches!(err, PhyError::SoftBuffer(_)));
    }

    #[test]
    fn test_release_drops_buffers() {
        let tb = transport_block();
        let mut soft = SoftCombiningDecoder::new();
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(0), true).unwrap();
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(1), true).unwrap();
        assert_eq!(soft.pool().len(), 2);

        soft.release();
        assert!(soft.pool().is_empty());
    }

    #[test]
    fn test_codeblock_count_checked_against_segment() {
        let tb = transport_block();
        let requested = SoftBufferId {
            nof_codeblocks: 3,
            ..id(0)
        };
        for kind in [DecoderKind::SoftCombining, DecoderKind::HardDecision] {
            let mut decoder = build_decoder(kind);
            let err = decoder
                .decode(&llrs(&tb, 0, None), &segment(0), &requested, true)
                .unwrap_err();
            assert!(matches!(err, PhyError::SoftBuffer(_)));
        }
    }

    #[test]
    fn test_full_pool_rejects_new_buffer() {
        let tb = transport_block();
        let mut soft = SoftCombiningDecoder::with_pool(SoftBufferPoolConfig {
            max_softbuffers: 2,
            ..Default::default()
        });
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(0), true).unwrap();
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(1), true).unwrap();

        let err = soft
            .decode(&llrs(&tb, 0, None), &segment(0), &id(2), true)
            .unwrap_err();
        assert!(matches!(err, PhyError::SoftBuffer(_)));
        // Existing buffers are still served
        assert!(soft.decode(&llrs(&tb, 0, None), &segment(0), &id(1), true).unwrap().crc_ok);
        assert_eq!(soft.pool().len(), 2);
    }

    #[test]
    fn test_idle_buffers_expire() {
        let tb = transport_block();
        let mut soft = SoftCombiningDecoder::with_pool(SoftBufferPoolConfig {
            max_softbuffers: 1,
            expire_timeout_slots: 2,
            ..Default::default()
        });
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(0), true).unwrap();

        // Buffer 0 is idle for one, then two slots
        for _ in 0..2 {
            assert!(soft
                .decode(&llrs(&tb, 0, None), &segment(0), &id(1), true)
                .is_err());
        }
        soft.decode(&llrs(&tb, 0, None), &segment(0), &id(1), true).unwrap();
        assert_eq!(soft.pool().len(), 1);
        assert!(soft.pool().contains(&id(1)));
        assert!(!soft.pool().contains(&id(0)));
    }

    #[test]
    fn test_pool_limits_codeblocks_per_buffer() {
        let mut pool = SoftBufferPool::with_config(SoftBufferPoolConfig {
            max_nof_codeblocks: 2,
            ..Default::default()
        });
        let large = SoftBufferId {
            nof_codeblocks: 3,
            ..id(0)
        };
        assert!(matches!(
            pool.reserve(&large, 16, true),
            Err(PhyError::SoftBuffer(_))
        ));
        assert!(pool.is_empty());
        assert!(pool.reserve(&id(0), 16, true).is_ok());
    }

    #[test]
    fn test_decoded_buffer_skips_until_crcs_reset() {
        let tb = transport_block();
        let mut soft = SoftCombiningDecoder::new();
        let first = soft.decode(&llrs(&tb, 0, None), &segment(0), &id(4), true).unwrap();
        assert!(first.crc_ok);
        assert_eq!(first.iterations, 1);

        let silent = vec![0; segment(2).codeword_bits];
        let cached = soft.decode(&silent, &segment(2), &id(4), false).unwrap();
        assert!(cached.crc_ok);
        assert_eq!(cached.iterations, 0);
        assert_eq!(cached.transport_block, tb);

        soft.reset_crcs(&id(4)).unwrap();
        let redecoded = soft.decode(&silent, &segment(2), &id(4), false).unwrap();
        assert!(redecoded.crc_ok);
        assert_eq!(redecoded.iterations, 1);
        assert_eq!(redecoded.transport_block, tb);

        assert!(matches!(
            soft.reset_crcs(&id(9)),
            Err(PhyError::SoftBuffer(_))
        ));
    }

    #[test]
    fn test_wrong_llr_count_is_decoding_error() {
        let mut decoder = build_decoder(DecoderKind::HardDecision);
        let seg = SegmentConfig {
            modulation: Modulation::Qpsk,
            ..segment(0)
        };
        let err = decoder.decode(&[0; 10], &seg, &id(0), true).unwrap_err();
        assert!(matches!(err, PhyError::Decoding(_)));
    }
}
