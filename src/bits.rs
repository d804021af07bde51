//! Bit-field access within an 8-byte CAN payload.
//!
//! Bits are numbered little-endian: bit `n` is bit `n % 8` of byte `n / 8`,
//! and multi-bit fields are assembled least-significant bit first.

/// Fixed-size payload buffer used by every CAN frame in this crate.
pub type BitBuffer = [u8; 8];

fn check_range(start: usize, len: usize) {
    assert!(
        (1..=64).contains(&len) && start + len <= 64,
        "bit field {start}+{len} does not fit in 64 bits"
    );
}

/// Read `len` bits starting at `start`, zero-extended.
pub fn get(buffer: &BitBuffer, start: usize, len: usize) -> u64 {
    check_range(start, len);
    let word = u64::from_le_bytes(*buffer);
    let shifted = word >> start;
    if len == 64 { shifted } else { shifted & ((1u64 << len) - 1) }
}

/// Read `len` bits starting at `start` and sign-extend them.
pub fn get_signed(buffer: &BitBuffer, start: usize, len: usize) -> i64 {
    let raw = get(buffer, start, len);
    let unused = 64 - len as u32;
    ((raw << unused) as i64) >> unused
}

/// Write the low `len` bits of `value` at `start`, leaving all other bits intact.
pub fn set(buffer: &mut BitBuffer, start: usize, len: usize, value: u64) {
    check_range(start, len);
    let field_mask = if len == 64 { u64::MAX } else { (1u64 << len) - 1 };
    let mask = field_mask << start;
    let word = u64::from_le_bytes(*buffer);
    let word = (word & !mask) | ((value & field_mask) << start);
    *buffer = word.to_le_bytes();
}

/// Read a single bit.
pub fn flag(buffer: &BitBuffer, bit: usize) -> bool {
    get(buffer, bit, 1) == 1
}
