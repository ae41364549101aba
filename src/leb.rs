// Encoding and decoding of ULEB128 and SLEB128 numbers.
//
// The format is described in the DWARF documents at dwarfstd.org
// ("Variable Length Data", section 7.6). The Wiki article on LEB128 is a
// gentler introduction.
//
// The encoders append to an output buffer since that is how every caller in
// this crate uses them; the decoders exist for the test suites, which state
// their expectations as round-trips.

// Appends the ULEB128 encoding of n. Zero encodes as a single 0x00 byte.
pub fn uleb128(out: &mut Vec<u8>, mut n: u64) {
    loop {
        let mut byte = (n as u8) & 0x7f; // low 7 bits
        n >>= 7;
        if n != 0 {
            byte |= 0x80; // continuation
        }
        out.push(byte);
        if n == 0 {
            break;
        }
    }
}

// Appends the SLEB128 encoding of n. The encoding terminates once the
// remaining value is 0 (or -1 for negatives) and the sign bit of the last
// group agrees with it; >> on i64 is an arithmetic shift, which is exactly
// the sign-extension this termination rule needs.
pub fn sleb128(out: &mut Vec<u8>, mut n: i64) {
    loop {
        let mut byte = (n as u8) & 0x7f;
        n >>= 7;
        let done = (n == 0 && byte & 0x40 == 0) || (n == -1 && byte & 0x40 != 0);
        if !done {
            byte |= 0x80;
        }
        out.push(byte);
        if done {
            break;
        }
    }
}

#[derive(PartialEq, Debug)]
pub enum DecodeError {
    LastByteHasContinueBit,
}

// Reads a ULEB128-encoded value from the input,
// and returns the value and the number of bytes consumed.
pub fn uleb128_decode(bytes: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut val: u64 = 0;
    let mut shift = 0;
    for (i, b) in bytes.iter().enumerate() {
        val |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok((val, i + 1));
        }
        shift += 7;
    }
    Err(DecodeError::LastByteHasContinueBit)
}

// Reads an SLEB128-encoded value from the input,
// and returns the value and the number of bytes consumed.
pub fn sleb128_decode(bytes: &[u8]) -> Result<(i64, usize), DecodeError> {
    let mut val: i64 = 0;
    let mut shift = 0;
    let mut last = 0u8;
    let mut read = 0;
    for (i, b) in bytes.iter().enumerate() {
        (read, last) = (i + 1, *b);
        val |= ((b & 0x7f) as i64) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            break;
        }
    }
    if last & 0x80 != 0 {
        return Err(DecodeError::LastByteHasContinueBit);
    }
    // If the last byte's sign bit is set, sign-extend the result.
    if shift < 64 && last & 0x40 != 0 {
        val |= -1i64 << shift;
    }
    Ok((val, read))
}
