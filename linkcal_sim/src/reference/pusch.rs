//! Reference OFDM PUSCH transmitter and demodulator.
//!
//! Transmit chain:
//! 1. CRC-24A attachment
//! 2. Rate-1/3 mother code: the block followed by two permuted copies
//! 3. Circular-buffer rate matching starting at `rv * N / 4`
//! 4. Modulation mapping onto the data resource elements
//! 5. OFDM with a `1/N`-scaled inverse transform and a cyclic prefix
//!
//! Two symbols of the allocation carry DM-RS pilots on every subcarrier.
//! The receiver estimates the channel by least squares on the pilots,
//! equalizes with maximum-ratio combining and computes max-log LLRs.

use linkcal_env::types::TB_CRC_LENGTH;
use linkcal_env::{
    Complex64, Modulation, PhyError, PuschCapabilities, PuschConfig, PuschDemodulator,
    PuschTransmitter, TxWaveform, Waveform,
};
use nalgebra::DVector;
use rustfft::FftPlanner;
use std::f64::consts::FRAC_1_SQRT_2;

/// CRC-24A generator polynomial (without the leading term).
const CRC24A_POLY: u32 = 0x86_4CFB;

/// Largest LLR magnitude before quantization.
const LLR_CLAMP: f64 = 20.0;

/// LLR quantization step (levels per unit).
const LLR_SCALE: f64 = 6.0;

/// DM-RS pilot symbol.
pub fn pilot() -> Complex64 {
    Complex64::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2)
}

/// CRC-24A over a bit sequence (one bit per byte).
pub fn crc24a(bits: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &bit in bits {
        let feedback = ((crc >> 23) & 1) ^ u32::from(bit & 1);
        crc = (crc << 1) & 0xFF_FFFF;
        if feedback != 0 {
            crc ^= CRC24A_POLY;
        }
    }
    crc
}

/// Appends the 24 CRC bits, most significant first.
pub fn attach_crc(transport_block: &[u8]) -> Vec<u8> {
    let crc = crc24a(transport_block);
    let mut bits = transport_block.to_vec();
    bits.extend((0..TB_CRC_LENGTH).rev().map(|i| ((crc >> i) & 1) as u8));
    bits
}

/// True if the trailing 24 bits are the CRC of the leading ones.
pub fn check_crc(block: &[u8]) -> bool {
    if block.len() < TB_CRC_LENGTH {
        return false;
    }
    let (payload, parity) = block.split_at(block.len() - TB_CRC_LENGTH);
    let expected = parity
        .iter()
        .fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit & 1));
    crc24a(payload) == expected
}

/// Index of bit `i` inside the `copy`-th third of the mother codeword.
pub fn mother_code_position(copy: usize, i: usize, k: usize) -> usize {
    match copy {
        0 => i,
        1 => k + (k - 1 - i),
        _ => 2 * k + (i + k / 2) % k,
    }
}

/// Rate-1/3 mother codeword of a CRC-attached block.
pub fn encode(block: &[u8]) -> Vec<u8> {
    let k = block.len();
    let mut codeword = vec![0u8; 3 * k];
    for (i, &bit) in block.iter().enumerate() {
        for copy in 0..3 {
            codeword[mother_code_position(copy, i, k)] = bit;
        }
    }
    codeword
}

/// Circular-buffer start position of a redundancy version.
pub fn rv_start(rv: u8, buffer_len: usize) -> usize {
    usize::from(rv) * buffer_len / 4
}

/// Selects `e` bits from the circular buffer starting at the RV position.
pub fn rate_match(codeword: &[u8], rv: u8, e: usize) -> Vec<u8> {
    let n = codeword.len();
    let k0 = rv_start(rv, n);
    (0..e).map(|j| codeword[(k0 + j) % n]).collect()
}

/// Constellation points with their bit labels (bit 0 first).
pub fn constellation(modulation: Modulation) -> Result<Vec<(Complex64, Vec<u8>)>, PhyError> {
    let points: Vec<(Complex64, Vec<u8>)> = match modulation {
        Modulation::Pi2Bpsk => (0..2u8)
            .map(|b| {
                let a = 1.0 - 2.0 * f64::from(b);
                (Complex64::new(a, a) * FRAC_1_SQRT_2, vec![b])
            })
            .collect(),
        Modulation::Qpsk => (0..4u8)
            .map(|v| {
                let bits = vec![(v >> 1) & 1, v & 1];
                let re = 1.0 - 2.0 * f64::from(bits[0]);
                let im = 1.0 - 2.0 * f64::from(bits[1]);
                (Complex64::new(re, im) * FRAC_1_SQRT_2, bits)
            })
            .collect(),
        Modulation::Qam16 => (0..16u8)
            .map(|v| {
                let bits: Vec<u8> = (0..4).rev().map(|i| (v >> i) & 1).collect();
                let level = |sign: u8, amp: u8| {
                    (1.0 - 2.0 * f64::from(sign)) * (2.0 - (1.0 - 2.0 * f64::from(amp)))
                };
                let re = level(bits[0], bits[2]);
                let im = level(bits[1], bits[3]);
                (Complex64::new(re, im) / 10f64.sqrt(), bits)
            })
            .collect(),
        other => return Err(PhyError::invalid("modulation", other)),
    };
    Ok(points)
}

/// pi/2 rotation applied to odd pi/2-BPSK symbols.
fn pi2_rotation(modulation: Modulation, index: usize) -> Complex64 {
    if modulation == Modulation::Pi2Bpsk && index % 2 == 1 {
        Complex64::new(0.0, 1.0)
    } else {
        Complex64::new(1.0, 0.0)
    }
}

/// Maps bits onto symbols.
pub fn modulate(bits: &[u8], modulation: Modulation) -> Result<Vec<Complex64>, PhyError> {
    let points = constellation(modulation)?;
    let qm = modulation.bits_per_symbol();
    Ok(bits
        .chunks(qm)
        .enumerate()
        .map(|(index, chunk)| {
            let symbol = points
                .iter()
                .find(|(_, label)| label.as_slice() == chunk)
                .map(|(point, _)| *point)
                .unwrap_or_default();
            symbol * pi2_rotation(modulation, index)
        })
        .collect())
}

/// Max-log LLRs of one equalized symbol. Positive values favour bit 0.
fn max_log_llrs(
    symbol: Complex64,
    noise_var: f64,
    points: &[(Complex64, Vec<u8>)],
    qm: usize,
    llrs: &mut Vec<f64>,
) {
    for bit in 0..qm {
        let mut best = [f64::INFINITY; 2];
        for (point, label) in points {
            let distance = (symbol - point).norm_sqr();
            let slot = usize::from(label[bit]);
            best[slot] = best[slot].min(distance);
        }
        llrs.push((best[1] - best[0]) / noise_var);
    }
}

/// Quantizes an LLR to `i8`.
pub fn quantize_llr(llr: f64) -> i8 {
    (llr.clamp(-LLR_CLAMP, LLR_CLAMP) * LLR_SCALE).round() as i8
}

/// FFT bin of the `k`-th allocated subcarrier, band centred on DC.
fn subcarrier_bin(k: usize, num_subcarriers: usize, transform_size: usize) -> usize {
    (k + transform_size - num_subcarriers / 2) % transform_size
}

fn check_capabilities(
    capabilities: &PuschCapabilities,
    config: &PuschConfig,
) -> Result<(), PhyError> {
    if !capabilities.supports(config.modulation) {
        return Err(PhyError::invalid("modulation", config.modulation));
    }
    if config.num_layers == 0 || config.num_layers > capabilities.max_layers {
        return Err(PhyError::invalid("num_layers", config.num_layers));
    }
    Ok(())
}

fn reference_capabilities() -> PuschCapabilities {
    PuschCapabilities {
        max_layers: 1,
        modulations: vec![Modulation::Pi2Bpsk, Modulation::Qpsk, Modulation::Qam16],
    }
}

/// Reference PUSCH transmitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfdmPuschTransmitter;

impl PuschTransmitter for OfdmPuschTransmitter {
    fn capabilities(&self) -> PuschCapabilities {
        reference_capabilities()
    }

    fn transmit(
        &self,
        config: &PuschConfig,
        transport_block: &[u8],
        rv: u8,
    ) -> Result<TxWaveform, PhyError> {
        check_capabilities(&self.capabilities(), config)?;
        if transport_block.len() != config.tbs() {
            return Err(PhyError::Generation(format!(
                "transport block has {} bits, allocation carries {}",
                transport_block.len(),
                config.tbs()
            )));
        }
        if rv > 3 {
            return Err(PhyError::invalid("rv", rv));
        }

        let codeword = encode(&attach_crc(transport_block));
        let bits = rate_match(&codeword, rv, config.codeword_bits());
        let symbols = modulate(&bits, config.modulation)?;

        let nsc = config.nof_subcarriers();
        let nfft = config.transform_size();
        let cp = config.cyclic_prefix_len();
        let ifft = FftPlanner::new().plan_fft_inverse(nfft);
        let scale = 1.0 / nfft as f64;

        let mut samples = Vec::with_capacity(config.num_symbols * (nfft + cp));
        let mut data = symbols.into_iter();
        for l in 0..config.num_symbols {
            let mut grid = vec![Complex64::new(0.0, 0.0); nfft];
            let is_dmrs = config.dmrs_symbols.contains(&l);
            for k in 0..nsc {
                grid[subcarrier_bin(k, nsc, nfft)] = if is_dmrs {
                    pilot()
                } else {
                    data.next().unwrap_or_default()
                };
            }
            ifft.process(&mut grid);
            samples.extend(grid[nfft - cp..].iter().map(|s| *s * scale));
            samples.extend(grid.iter().map(|s| *s * scale));
        }

        Ok(TxWaveform {
            samples: DVector::from_vec(samples),
            sample_rate_hz: config.sample_rate_hz(),
            transform_size: nfft,
            cyclic_prefix_len: cp,
        })
    }
}

/// Reference PUSCH demodulator.
#[derive(Debug, Clone, Default)]
pub struct OfdmPuschDemodulator {
    delay: usize,
}

impl OfdmPuschDemodulator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PuschDemodulator for OfdmPuschDemodulator {
    fn set_delay(&mut self, delay_samples: usize) {
        self.delay = delay_samples;
    }

    fn demodulate(
        &self,
        received: &Waveform,
        config: &PuschConfig,
        noise_var: f64,
    ) -> Result<Vec<i8>, PhyError> {
        check_capabilities(&reference_capabilities(), config)?;
        if !(noise_var.is_finite() && noise_var > 0.0) {
            return Err(PhyError::decoding(format!("noise variance {}", noise_var)));
        }

        let nsc = config.nof_subcarriers();
        let nfft = config.transform_size();
        let cp = config.cyclic_prefix_len();
        let num_rx = received.ncols();
        let needed = self.delay + config.num_symbols * (nfft + cp);
        if num_rx == 0 || received.nrows() < needed {
            return Err(PhyError::decoding(format!(
                "received {} samples on {} antennas, need {}",
                received.nrows(),
                num_rx,
                needed
            )));
        }

        // grid[rx][l][k]
        let fft = FftPlanner::new().plan_fft_forward(nfft);
        let zero = Complex64::new(0.0, 0.0);
        let mut grid = vec![vec![vec![zero; nsc]; config.num_symbols]; num_rx];
        let mut buffer = vec![zero; nfft];
        for (rx, rx_grid) in grid.iter_mut().enumerate() {
            for (l, symbol) in rx_grid.iter_mut().enumerate() {
                let start = self.delay + l * (nfft + cp) + cp;
                for (n, sample) in buffer.iter_mut().enumerate() {
                    *sample = received[(start + n, rx)];
                }
                fft.process(&mut buffer);
                for (k, re) in symbol.iter_mut().enumerate() {
                    *re = buffer[subcarrier_bin(k, nsc, nfft)];
                }
            }
        }

        // Least-squares estimate averaged over the DM-RS symbols
        let pilot_conj = pilot().conj();
        let dmrs_count = config.dmrs_symbols.len() as f64;
        let estimates: Vec<Vec<Complex64>> = grid
            .iter()
            .map(|rx_grid| {
                (0..nsc)
                    .map(|k| {
                        config
                            .dmrs_symbols
                            .iter()
                            .map(|&l| rx_grid[l][k] * pilot_conj)
                            .sum::<Complex64>()
                            / dmrs_count
                    })
                    .collect()
            })
            .collect();

        let points = constellation(config.modulation)?;
        let qm = config.modulation.bits_per_symbol();
        let mut llrs = Vec::with_capacity(config.codeword_bits());
        let mut index = 0;
        for l in (0..config.num_symbols).filter(|l| !config.dmrs_symbols.contains(l)) {
            for k in 0..nsc {
                let mut combined = Complex64::new(0.0, 0.0);
                let mut gain = 0.0;
                for rx in 0..num_rx {
                    let h = estimates[rx][k];
                    combined += h.conj() * grid[rx][l][k];
                    gain += h.norm_sqr();
                }
                let gain = gain.max(1e-12);
                let equalized = combined / gain * pi2_rotation(config.modulation, index).conj();
                max_log_llrs(equalized, noise_var / gain, &points, qm, &mut llrs);
                index += 1;
            }
        }

        Ok(llrs.into_iter().map(quantize_llr).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(len: usize, seed: u64) -> Vec<u8> {
        (0..len as u64)
            .map(|i| ((i.wrapping_mul(seed | 1) >> 3) & 1) as u8)
            .collect()
    }

    fn received(tx: &TxWaveform, num_rx: usize) -> Waveform {
        Waveform::from_fn(tx.len(), num_rx, |n, _| tx.samples[n])
    }

    #[test]
    fn test_crc_roundtrip() {
        let block = attach_crc(&bits(100, 5));
        assert_eq!(block.len(), 124);
        assert!(check_crc(&block));

        let mut corrupted = block.clone();
        corrupted[17] ^= 1;
        assert!(!check_crc(&corrupted));
    }

    #[test]
    fn test_mother_code_positions_are_a_permutation() {
        let k = 40;
        let mut seen = vec![false; 3 * k];
        for copy in 0..3 {
            for i in 0..k {
                let p = mother_code_position(copy, i, k);
                assert!(!seen[p]);
                seen[p] = true;
            }
        }
    }

    #[test]
    fn test_rate_matching_wraps() {
        let codeword: Vec<u8> = (0..12).map(|i| i as u8).collect();
        let out = rate_match(&codeword, 2, 8);
        assert_eq!(out, vec![6, 7, 8, 9, 10, 11, 0, 1]);
    }

    #[test]
    fn test_constellations_have_unit_power() {
        for modulation in [Modulation::Pi2Bpsk, Modulation::Qpsk, Modulation::Qam16] {
            let points = constellation(modulation).unwrap();
            let power =
                points.iter().map(|(p, _)| p.norm_sqr()).sum::<f64>() / points.len() as f64;
            assert!((power - 1.0).abs() < 1e-12, "{}", modulation);
        }
        assert!(constellation(Modulation::Qam64).is_err());
    }

    #[test]
    fn test_noiseless_chain_recovers_bits() {
        for modulation in [Modulation::Pi2Bpsk, Modulation::Qpsk, Modulation::Qam16] {
            let config = PuschConfig {
                modulation,
                ..PuschConfig::default()
            };
            let tb = bits(config.tbs(), 11);
            let tx = OfdmPuschTransmitter.transmit(&config, &tb, 0).unwrap();
            assert_eq!(tx.len(), 14 * (config.transform_size() + config.cyclic_prefix_len()));

            let llrs = OfdmPuschDemodulator::new()
                .demodulate(&received(&tx, 2), &config, 1e-3)
                .unwrap();
            assert_eq!(llrs.len(), config.codeword_bits());

            let expected = rate_match(&encode(&attach_crc(&tb)), 0, config.codeword_bits());
            let decided: Vec<u8> = llrs.iter().map(|&l| u8::from(l < 0)).collect();
            assert_eq!(decided, expected, "{}", modulation);
        }
    }

    #[test]
    fn test_demodulator_delay() {
        let config = PuschConfig::default();
        let tb = bits(config.tbs(), 3);
        let tx = OfdmPuschTransmitter.transmit(&config, &tb, 1).unwrap();
        let delay = 5;
        let rx = Waveform::from_fn(tx.len() + delay, 1, |n, _| {
            if n < delay {
                Complex64::new(0.0, 0.0)
            } else {
                tx.samples[n - delay]
            }
        });

        let mut demodulator = OfdmPuschDemodulator::new();
        demodulator.set_delay(delay);
        let llrs = demodulator.demodulate(&rx, &config, 1e-3).unwrap();
        let expected = rate_match(&encode(&attach_crc(&tb)), 1, config.codeword_bits());
        let decided: Vec<u8> = llrs.iter().map(|&l| u8::from(l < 0)).collect();
        assert_eq!(decided, expected);
    }

    #[test]
    fn test_capabilities_enforced() {
        let config = PuschConfig {
            num_layers: 2,
            ..PuschConfig::default()
        };
        let tb = vec![0; config.tbs()];
        assert!(OfdmPuschTransmitter.transmit(&config, &tb, 0).is_err());

        let config = PuschConfig {
            modulation: Modulation::Qam256,
            ..PuschConfig::default()
        };
        let tb = vec![0; config.tbs()];
        assert!(OfdmPuschTransmitter.transmit(&config, &tb, 0).is_err());
    }
}
