use alloc::vec::Vec;

use primitive_types::U256;

use crate::engine::MemoryAccess;
use crate::error::ExitException;

/// Unified view over the guest's linear memory for one host call. The buffer
/// itself is owned by the engine; reads are copies of the engine's view and
/// writes flow back through the engine so they land in its trace.
pub struct GuestMemory<'a> {
	raw: &'a mut dyn MemoryAccess,
}

impl<'a> GuestMemory<'a> {
	/// Wrap an engine memory handle.
	pub fn new(raw: &'a mut dyn MemoryAccess) -> Self {
		Self { raw }
	}

	/// Length of the linear memory in bytes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.raw.len()
	}

	/// Whether the linear memory is empty.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.raw.is_empty()
	}

	/// Copy `size` bytes at `offset` out of guest memory, zero-padded past
	/// the end of the buffer.
	#[must_use]
	pub fn get(&self, offset: u64, size: usize) -> Vec<u8> {
		self.raw.read(offset as u32, size as u32)
	}

	/// Write `value` into guest memory at `offset`, producing a memory-change
	/// event in the engine trace.
	pub fn set(&mut self, offset: u64, value: &[u8]) {
		self.raw.write(offset as u32, value);
	}

	/// Resize the linear memory to at least `size` bytes.
	pub fn resize(&mut self, size: usize) -> Result<(), ExitException> {
		if self.raw.len() >= size {
			return Ok(());
		}
		if self.raw.resize(size) {
			Ok(())
		} else {
			Err(ExitException::Other("memory resize not supported".into()))
		}
	}

	/// Borrow a span of guest memory for in-place mutation. The span becomes
	/// visible to the engine (and its trace) only on [MemorySlot::commit];
	/// dropping the slot discards any mutation.
	pub fn slot(&mut self, offset: u64, size: usize) -> MemorySlot<'_, 'a> {
		let buf = self.get(offset, size);
		MemorySlot {
			memory: self,
			offset,
			buf,
		}
	}

	/// Copy from `data` into guest memory, with EVM large-copy semantics:
	/// the source window is `src..src+len` of `data`, zero-filled where it
	/// runs past the end, and written to guest memory at `dst`.
	pub fn copy_large(
		&mut self,
		dst: U256,
		src: U256,
		len: U256,
		data: &[u8],
	) -> Result<(), ExitException> {
		// Needed to pass ethereum tests defined with (potentially) zero length
		// and out-of-bound source offsets.
		if len.is_zero() {
			return Ok(());
		}

		if dst > U256::from(u32::MAX) || len > U256::from(u32::MAX) {
			return Err(ExitException::OutOfOffset);
		}
		let dst = dst.low_u64();
		let len = len.low_u64() as usize;

		let mut ret = vec![0u8; len];
		if src <= U256::from(usize::MAX) {
			let src = src.low_u64() as usize;
			if src < data.len() {
				let copy_len = core::cmp::min(len, data.len() - src);
				ret[..copy_len].copy_from_slice(&data[src..src + copy_len]);
			}
		}

		self.set(dst, &ret);
		Ok(())
	}
}

/// A mutable span of guest memory together with its commit handle, the
/// `get_ptr` protocol of the memory facade.
pub struct MemorySlot<'m, 'a> {
	memory: &'m mut GuestMemory<'a>,
	offset: u64,
	buf: Vec<u8>,
}

impl<'m, 'a> MemorySlot<'m, 'a> {
	/// The span's current bytes.
	#[must_use]
	pub fn bytes(&self) -> &[u8] {
		&self.buf
	}

	/// Mutable access to the span.
	pub fn bytes_mut(&mut self) -> &mut [u8] {
		&mut self.buf
	}

	/// Write the span back through the engine, emitting a memory-change
	/// event covering it.
	pub fn commit(self) {
		self.memory.set(self.offset, &self.buf);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct VecMemory {
		data: Vec<u8>,
		changes: Vec<(u32, Vec<u8>)>,
	}

	impl MemoryAccess for VecMemory {
		fn len(&self) -> usize {
			self.data.len()
		}

		fn read(&self, offset: u32, len: u32) -> Vec<u8> {
			let mut ret = vec![0; len as usize];
			for (i, b) in ret.iter_mut().enumerate() {
				if let Some(v) = self.data.get(offset as usize + i) {
					*b = *v;
				}
			}
			ret
		}

		fn write(&mut self, offset: u32, value: &[u8]) {
			for (i, b) in value.iter().enumerate() {
				if let Some(v) = self.data.get_mut(offset as usize + i) {
					*v = *b;
				}
			}
			self.changes.push((offset, value.to_vec()));
		}
	}

	#[test]
	fn slot_commit_emits_change() {
		let mut raw = VecMemory {
			data: vec![1, 2, 3, 4],
			changes: Vec::new(),
		};
		let mut memory = GuestMemory::new(&mut raw);

		let mut slot = memory.slot(1, 2);
		assert_eq!(slot.bytes(), &[2, 3]);
		slot.bytes_mut()[0] = 9;
		slot.commit();

		assert_eq!(raw.data, vec![1, 9, 3, 4]);
		assert_eq!(raw.changes, vec![(1, vec![9, 3])]);
	}

	#[test]
	fn slot_drop_discards() {
		let mut raw = VecMemory {
			data: vec![1, 2, 3, 4],
			changes: Vec::new(),
		};
		let mut memory = GuestMemory::new(&mut raw);

		let mut slot = memory.slot(0, 2);
		slot.bytes_mut()[0] = 9;
		drop(slot);

		assert_eq!(raw.data, vec![1, 2, 3, 4]);
		assert!(raw.changes.is_empty());
	}

	#[test]
	fn copy_large_zero_fills_past_source() {
		let mut raw = VecMemory {
			data: vec![0; 8],
			changes: Vec::new(),
		};
		let mut memory = GuestMemory::new(&mut raw);

		memory
			.copy_large(U256::zero(), U256::from(2), U256::from(4), &[1, 2, 3, 4])
			.unwrap();
		assert_eq!(raw.data[..4], [3, 4, 0, 0]);
	}
}
