//! FNV-style name hashing.
//!
//! All engine identifiers (types, components, templates, events, handler
//! names) are 32-bit hashes of their names so that they are stable across runs
//! and computable in `const` context.
//!
//! The fold is `h = (h * PRIME) ^ byte`, starting from [`FNV_OFFSET`].

/// Offset basis of the 32-bit FNV hash.
pub const FNV_OFFSET: u32 = 2_166_136_261;

/// 32-bit FNV prime.
pub const FNV_PRIME: u32 = 16_777_619;

/// Continues a hash from `seed` over `bytes`.
#[inline]
pub const fn fnv_hash_with(bytes: &[u8], seed: u32) -> u32 {
    let mut hash = seed;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_mul(FNV_PRIME) ^ (bytes[i] as u32);
        i += 1;
    }
    hash
}

/// Hashes a byte string from the FNV offset basis.
#[inline]
pub const fn fnv_hash(bytes: &[u8]) -> u32 {
    fnv_hash_with(bytes, FNV_OFFSET)
}

/// Hashes a name.
#[inline]
pub const fn fnv_hash_str(name: &str) -> u32 {
    fnv_hash(name.as_bytes())
}

/// Folds a 32-bit value (little-endian bytes) into `seed`.
#[inline]
pub const fn fnv_hash_u32(value: u32, seed: u32) -> u32 {
    fnv_hash_with(&value.to_le_bytes(), seed)
}
