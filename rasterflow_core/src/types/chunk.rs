//! Typed, row-major runs of raster elements.
//!
//! A [`Chunk`] owns one `Vec` of a single element type. All slicing, joining and
//! converting goes through the typed vectors, so buffers of different widths are
//! never reinterpreted byte-wise. Lengths are always counted in elements.

use super::{Element, ElementType};
use crate::macros::{dispatch_chunk, with_element_type};
use anyhow::{Result, anyhow, ensure};
use std::{borrow::Cow, ops::Range};

/// A contiguous run of elements of one fixed type.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
	UInt8(Vec<u8>),
	Int8(Vec<i8>),
	UInt16(Vec<u16>),
	Int16(Vec<i16>),
	UInt32(Vec<u32>),
	Int32(Vec<i32>),
	UInt64(Vec<u64>),
	Int64(Vec<i64>),
	Float32(Vec<f32>),
	Float64(Vec<f64>),
}

pub(crate) fn type_mismatch(expected: ElementType, actual: ElementType) -> anyhow::Error {
	anyhow!("TypeError: expected {expected} elements, got {actual}")
}

impl Chunk {
	/// An empty chunk of `element_type` with room for `capacity` elements.
	#[must_use]
	pub fn with_capacity(element_type: ElementType, capacity: usize) -> Self {
		with_element_type!(element_type, T => T::into_chunk(Vec::with_capacity(capacity)))
	}

	/// `len` elements, all set to `value` (converted to `element_type`).
	#[must_use]
	pub fn filled(element_type: ElementType, len: usize, value: f64) -> Self {
		with_element_type!(element_type, T => T::into_chunk(vec![T::from_f64(value); len]))
	}

	#[must_use]
	pub fn zeros(element_type: ElementType, len: usize) -> Self {
		Self::filled(element_type, len, 0.0)
	}

	/// Builds a chunk of `element_type` from `f64` values.
	#[must_use]
	pub fn from_f64(element_type: ElementType, values: Vec<f64>) -> Self {
		Chunk::Float64(values).convert(element_type)
	}

	#[must_use]
	pub fn element_type(&self) -> ElementType {
		dispatch_chunk!(self, _data, T => T::TYPE)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		dispatch_chunk!(self, data, T => data.len())
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn truncate(&mut self, len: usize) {
		dispatch_chunk!(self, data, T => data.truncate(len));
	}

	/// Moves all elements of `other` to the end of `self`.
	///
	/// An empty `self` takes over `other`'s allocation instead of copying.
	pub fn append(&mut self, other: Chunk) -> Result<()> {
		let expected = self.element_type();
		dispatch_chunk!(self, data, T => {
			let other = T::vec_of(other).map_err(|other| type_mismatch(expected, other.element_type()))?;
			if data.is_empty() {
				*data = other;
			} else {
				data.extend_from_slice(&other);
			}
			Ok(())
		})
	}

	/// Copies `range` of `other` to the end of `self`.
	pub fn extend_from_slice_of(&mut self, other: &Chunk, range: Range<usize>) -> Result<()> {
		let expected = self.element_type();
		ensure!(
			range.end <= other.len(),
			"range {range:?} is out of bounds for a chunk of {} elements",
			other.len()
		);
		dispatch_chunk!(self, data, T => {
			let source = T::slice_of(other).ok_or_else(|| type_mismatch(expected, other.element_type()))?;
			data.extend_from_slice(&source[range]);
			Ok(())
		})
	}

	/// Overwrites the elements starting at `offset` with `range` of `source`.
	pub fn copy_from(&mut self, offset: usize, source: &Chunk, range: Range<usize>) -> Result<()> {
		let expected = self.element_type();
		ensure!(
			range.end <= source.len() && offset + range.len() <= self.len(),
			"cannot copy {range:?} of {} elements to offset {offset} of {} elements",
			source.len(),
			self.len()
		);
		dispatch_chunk!(self, data, T => {
			let source = T::slice_of(source).ok_or_else(|| type_mismatch(expected, source.element_type()))?;
			data[offset..offset + range.len()].copy_from_slice(&source[range]);
			Ok(())
		})
	}

	/// Converts every element to `element_type`. Returns `self` untouched when the
	/// type already matches.
	#[must_use]
	pub fn convert(self, element_type: ElementType) -> Chunk {
		if self.element_type() == element_type {
			return self;
		}
		dispatch_chunk!(self, data, S => {
			with_element_type!(element_type, T => {
				T::into_chunk(data.into_iter().map(|value| T::from_f64(value.to_f64())).collect())
			})
		})
	}

	/// The elements as `f64`. Borrows when the chunk already holds `Float64`.
	#[must_use]
	pub fn to_f64(&self) -> Cow<'_, [f64]> {
		match self {
			Chunk::Float64(data) => Cow::Borrowed(data),
			other => dispatch_chunk!(other, data, T => Cow::Owned(data.iter().map(|value| value.to_f64()).collect())),
		}
	}

	/// Replaces every NaN with `value`. Integer chunks cannot hold NaN and are left
	/// alone. Returns the number of replaced elements.
	pub fn nan_to_value(&mut self, value: f64) -> usize {
		match self {
			Chunk::Float32(data) => replace_where(data, |v| v.is_nan(), f32::from_f64(value)),
			Chunk::Float64(data) => replace_where(data, |v| v.is_nan(), value),
			_ => 0,
		}
	}

	/// Replaces every element equal to `value` with NaN. Only float chunks can
	/// represent the result; integer chunks are left alone. Returns the number of
	/// replaced elements.
	pub fn value_to_nan(&mut self, value: f64) -> usize {
		match self {
			Chunk::Float32(data) => {
				let value = f32::from_f64(value);
				replace_where(data, |v| *v == value, f32::NAN)
			}
			Chunk::Float64(data) => replace_where(data, |v| *v == value, f64::NAN),
			_ => 0,
		}
	}

	/// Borrows the elements if the chunk holds `T`.
	#[must_use]
	pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
		T::slice_of(self)
	}

	/// Unwraps the elements, failing with a type error if the chunk does not hold `T`.
	pub fn into_vec<T: Element>(self) -> Result<Vec<T>> {
		T::vec_of(self).map_err(|other| type_mismatch(T::TYPE, other.element_type()))
	}
}

fn replace_where<T: Copy>(data: &mut [T], predicate: impl Fn(&T) -> bool, replacement: T) -> usize {
	let mut count = 0;
	for value in data.iter_mut().filter(|value| predicate(&**value)) {
		*value = replacement;
		count += 1;
	}
	count
}
