//! Apple Data Compression, the LZ77 variant used by older `.dmg` images.
//!
//! Each chunk starts with a tag byte:
//! - `1xxxxxxx`: `x + 1` literal bytes follow;
//! - `01xxxxxx oooooooo oooooooo`: copy `x + 4` bytes from `o + 1` back;
//! - `0xxxxxoo oooooooo`: copy `x + 3` bytes from `o + 1` back.

use crate::{DmgError, Result};

fn corrupt(what: &str, pos: usize) -> DmgError {
    DmgError::Corruption(format!("adc: {what} at input byte {pos}"))
}

/// Decompresses the whole of `input` into `output`, returning the number of
/// bytes produced. Fails if the stream is truncated, refers back past the
/// start of the output, or does not fit.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<usize> {
    let mut inp = 0;
    let mut out = 0;
    while inp < input.len() {
        let tag = input[inp];
        if tag & 0x80 != 0 {
            let len = (tag & 0x7F) as usize + 1;
            let src = input
                .get(inp + 1..inp + 1 + len)
                .ok_or_else(|| corrupt("truncated literal", inp))?;
            output
                .get_mut(out..out + len)
                .ok_or_else(|| corrupt("output overflow", inp))?
                .copy_from_slice(src);
            inp += 1 + len;
            out += len;
            continue;
        }

        let (len, distance, size) = if tag & 0x40 != 0 {
            let b = input
                .get(inp + 1..inp + 3)
                .ok_or_else(|| corrupt("truncated match", inp))?;
            (
                (tag & 0x3F) as usize + 4,
                u16::from_be_bytes([b[0], b[1]]) as usize + 1,
                3,
            )
        } else {
            let b = *input
                .get(inp + 1)
                .ok_or_else(|| corrupt("truncated match", inp))?;
            (
                ((tag & 0x3F) >> 2) as usize + 3,
                (((tag & 0x03) as usize) << 8 | b as usize) + 1,
                2,
            )
        };
        if distance > out {
            return Err(corrupt("match before start of output", inp));
        }
        if out + len > output.len() {
            return Err(corrupt("output overflow", inp));
        }
        // overlapping copies repeat the window
        for i in out..out + len {
            output[i] = output[i - distance];
        }
        inp += size;
        out += len;
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Greedy encoder producing all three chunk kinds.
    pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        let mut literals: Vec<u8> = vec![];
        let flush = |literals: &mut Vec<u8>, out: &mut Vec<u8>| {
            for run in literals.chunks(128) {
                out.push(0x80 | (run.len() - 1) as u8);
                out.extend_from_slice(run);
            }
            literals.clear();
        };
        let mut pos = 0;
        while pos < data.len() {
            let mut best = (0, 0);
            let start = pos.saturating_sub(0x2000);
            for cand in start..pos {
                let mut len = 0;
                while len < 67 && pos + len < data.len() && data[cand + len] == data[pos + len] {
                    len += 1;
                }
                if len > best.0 {
                    best = (len, pos - cand);
                    if len == 67 {
                        break;
                    }
                }
            }
            let (len, distance) = best;
            if len >= 3 && len <= 18 && distance <= 0x400 {
                flush(&mut literals, &mut out);
                let d = distance - 1;
                out.push((((len - 3) as u8) << 2) | (d >> 8) as u8);
                out.push(d as u8);
                pos += len;
            } else if len >= 4 {
                flush(&mut literals, &mut out);
                let d = (distance - 1) as u16;
                out.push(0x40 | (len - 4) as u8);
                out.extend_from_slice(&d.to_be_bytes());
                pos += len;
            } else {
                literals.push(data[pos]);
                pos += 1;
            }
        }
        flush(&mut literals, &mut out);
        out
    }

    #[test]
    fn decodes_each_chunk_kind() -> anyhow::Result<()> {
        // "abc", then 2-byte copy of 6 from distance 3, then 3-byte copy of 4 from distance 9
        let input = [0x82, b'a', b'b', b'c', 0x0C, 0x02, 0x40, 0x00, 0x08];
        let mut output = [0u8; 13];
        assert_eq!(decompress(&input, &mut output)?, 13);
        assert_eq!(&output, b"abcabcabcabca");
        Ok(())
    }

    #[test]
    fn round_trips_text() -> anyhow::Result<()> {
        let mut data = vec![];
        for i in 0..200u32 {
            data.extend_from_slice(format!("line {} of the volume bitmap\n", i % 17).as_bytes());
        }
        data.extend(std::iter::repeat_n(0u8, 5000));
        let compressed = compress(&data);
        assert!(compressed.len() < data.len() / 2);
        let mut output = vec![0u8; data.len()];
        assert_eq!(decompress(&compressed, &mut output)?, data.len());
        assert_eq!(output, data);
        Ok(())
    }

    #[test]
    fn rejects_bad_streams() {
        let mut output = [0u8; 16];
        assert!(decompress(&[0x85, 1, 2], &mut output).is_err());
        assert!(decompress(&[0x00, 0x05], &mut output).is_err());
        assert!(decompress(&[0x80, 1, 0x7C, 0x00], &mut output).is_err());
    }
}
