//! Small utilities.

use alloc::vec::Vec;

use primitive_types::{H160, H256, U256};

/// Convert [U256] into [H256].
#[must_use]
pub fn u256_to_h256(v: U256) -> H256 {
	let mut ret = H256::default();
	v.to_big_endian(&mut ret[..]);
	ret
}

/// Convert [H256] to [U256].
#[must_use]
pub fn h256_to_u256(v: H256) -> U256 {
	U256::from_big_endian(&v[..])
}

/// Convert [H256] into [H160], taking the low 20 bytes.
#[must_use]
pub fn h256_to_h160(v: H256) -> H160 {
	H160::from_slice(&v[12..])
}

/// Convert [U256] into [H160], taking the low 20 bytes.
#[must_use]
pub fn u256_to_h160(v: U256) -> H160 {
	h256_to_h160(u256_to_h256(v))
}

/// Left-pad `value` with zeroes to `len` bytes. Values longer than `len` keep
/// their low-order bytes.
#[must_use]
pub fn left_pad(value: &[u8], len: usize) -> Vec<u8> {
	let mut ret = vec![0; len];
	if value.len() >= len {
		ret.copy_from_slice(&value[value.len() - len..]);
	} else {
		ret[len - value.len()..].copy_from_slice(value);
	}
	ret
}

/// Strip leading zero bytes, the big-endian byte representation of a stack
/// item as an EVM would see it.
#[must_use]
pub fn strip_leading_zeroes(value: &[u8]) -> &[u8] {
	let first = value.iter().position(|b| *b != 0).unwrap_or(value.len());
	&value[first..]
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pad_shorter_and_longer() {
		assert_eq!(left_pad(&[1, 2], 4), vec![0, 0, 1, 2]);
		assert_eq!(left_pad(&[1, 2, 3, 4, 5], 4), vec![2, 3, 4, 5]);
	}

	#[test]
	fn u256_h160_round_trip() {
		let address = H160::from_low_u64_be(0x1234);
		let as_u256 = h256_to_u256(H256::from(address));
		assert_eq!(u256_to_h160(as_u256), address);
	}
}
