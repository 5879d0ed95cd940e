//! Ordered queue of chunk fragments that hands out exact-length slices.
//!
//! Writers and multiplexers receive chunks whose boundaries have nothing to do
//! with the length they must emit (a block row, a synchronization step). The
//! queue reconciles the two:
//!
//! - **zero-copy**: if the untouched head fragment is exactly as long as the
//!   requested slice, the fragment itself is handed out.
//! - **consolidation**: otherwise one buffer of exactly the requested length is
//!   filled from the front of the queue, splitting the last fragment it touches.
//!   The unread tail of a split fragment stays queued behind an offset, so it is
//!   neither copied nor shifted until it is needed.

use super::{Chunk, ElementType, chunk::type_mismatch};
use anyhow::{Result, ensure};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct FragmentQueue {
	fragments: VecDeque<Chunk>,
	/// Elements of the head fragment that were already handed out.
	head_offset: usize,
	buffered: usize,
	element_type: Option<ElementType>,
}

impl FragmentQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Enqueues a fragment. The first fragment fixes the element type of the queue.
	/// Empty fragments are dropped.
	pub fn push(&mut self, chunk: Chunk) -> Result<()> {
		let actual = chunk.element_type();
		match self.element_type {
			Some(expected) if expected != actual => return Err(type_mismatch(expected, actual)),
			Some(_) => {}
			None => self.element_type = Some(actual),
		}
		if chunk.is_empty() {
			return Ok(());
		}
		self.buffered += chunk.len();
		self.fragments.push_back(chunk);
		Ok(())
	}

	/// Number of elements queued and not yet taken.
	#[must_use]
	pub fn buffered(&self) -> usize {
		self.buffered
	}

	/// Number of queued fragments, counting a partially consumed head.
	#[must_use]
	pub fn fragments(&self) -> usize {
		self.fragments.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.buffered == 0
	}

	#[must_use]
	pub fn element_type(&self) -> Option<ElementType> {
		self.element_type
	}

	/// Removes exactly `len` elements from the front of the queue.
	///
	/// With `zero_copy` set, an untouched head fragment of exactly `len` elements
	/// is returned without copying.
	pub fn take(&mut self, len: usize, zero_copy: bool) -> Result<Chunk> {
		ensure!(
			len <= self.buffered,
			"cannot take {len} elements, only {} are buffered",
			self.buffered
		);
		let element_type = self.element_type.unwrap_or(ElementType::Float64);

		if zero_copy
			&& self.head_offset == 0
			&& self.fragments.front().is_some_and(|head| head.len() == len)
			&& let Some(head) = self.fragments.pop_front()
		{
			self.buffered -= len;
			return Ok(head);
		}

		let mut output = Chunk::with_capacity(element_type, len);
		while output.len() < len {
			let Some(head) = self.fragments.front() else {
				break;
			};
			let wanted = len - output.len();
			let available = head.len() - self.head_offset;
			if available <= wanted {
				output.extend_from_slice_of(head, self.head_offset..head.len())?;
				self.fragments.pop_front();
				self.head_offset = 0;
			} else {
				let end = self.head_offset + wanted;
				output.extend_from_slice_of(head, self.head_offset..end)?;
				self.head_offset = end;
			}
		}

		self.buffered -= len;
		Ok(output)
	}
}
