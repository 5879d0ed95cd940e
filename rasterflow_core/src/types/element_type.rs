//! Pixel element types.
//!
//! [`ElementType`] is the runtime tag a storage collaborator reports for its band,
//! [`Element`] links each Rust primitive to its tag. The names follow GDAL's data
//! type names, so `"Byte"` parses to [`ElementType::UInt8`].

use super::Chunk;
use anyhow::{Result, bail};
use num_traits::AsPrimitive;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// Runtime tag for the element type of a raster band or chunk.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
pub enum ElementType {
	#[serde(rename = "Byte", alias = "UInt8")]
	UInt8,
	Int8,
	UInt16,
	Int16,
	UInt32,
	Int32,
	UInt64,
	Int64,
	Float32,
	Float64,
}

impl ElementType {
	pub const ALL: [ElementType; 10] = [
		ElementType::UInt8,
		ElementType::Int8,
		ElementType::UInt16,
		ElementType::Int16,
		ElementType::UInt32,
		ElementType::Int32,
		ElementType::UInt64,
		ElementType::Int64,
		ElementType::Float32,
		ElementType::Float64,
	];

	/// Width of one element in bytes.
	#[must_use]
	pub fn size_in_bytes(&self) -> usize {
		use ElementType::*;
		match self {
			UInt8 | Int8 => 1,
			UInt16 | Int16 => 2,
			UInt32 | Int32 | Float32 => 4,
			UInt64 | Int64 | Float64 => 8,
		}
	}

	/// Whether the type can hold NaN.
	#[must_use]
	pub fn is_float(&self) -> bool {
		matches!(self, ElementType::Float32 | ElementType::Float64)
	}

	/// GDAL name of the type.
	#[must_use]
	pub fn as_str(&self) -> &'static str {
		use ElementType::*;
		match self {
			UInt8 => "Byte",
			Int8 => "Int8",
			UInt16 => "UInt16",
			Int16 => "Int16",
			UInt32 => "UInt32",
			Int32 => "Int32",
			UInt64 => "UInt64",
			Int64 => "Int64",
			Float32 => "Float32",
			Float64 => "Float64",
		}
	}
}

impl fmt::Display for ElementType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ElementType {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		if value.eq_ignore_ascii_case("uint8") {
			return Ok(ElementType::UInt8);
		}
		for element_type in ElementType::ALL {
			if element_type.as_str().eq_ignore_ascii_case(value) {
				return Ok(element_type);
			}
		}
		bail!("unknown element type '{value}'")
	}
}

/// A primitive that can live inside a [`Chunk`].
///
/// Conversions between element types go through `f64`, with the saturating
/// semantics of Rust's `as` casts (NaN becomes zero for integer targets).
pub trait Element: Copy + fmt::Debug + PartialEq + Send + Sync + 'static + AsPrimitive<f64> {
	const TYPE: ElementType;

	fn from_f64(value: f64) -> Self;

	#[inline]
	fn to_f64(self) -> f64 {
		self.as_()
	}

	/// Wraps a vector into the matching [`Chunk`] variant.
	fn into_chunk(data: Vec<Self>) -> Chunk;

	/// Borrows the data of `chunk` if it holds this element type.
	fn slice_of(chunk: &Chunk) -> Option<&[Self]>;

	fn slice_of_mut(chunk: &mut Chunk) -> Option<&mut Vec<Self>>;

	/// Unwraps the data of `chunk`, handing the chunk back if the type differs.
	fn vec_of(chunk: Chunk) -> std::result::Result<Vec<Self>, Chunk>;
}

macro_rules! impl_element {
	($($ty:ty => $variant:ident),* $(,)?) => {
		$(
			impl Element for $ty {
				const TYPE: ElementType = ElementType::$variant;

				#[inline]
				fn from_f64(value: f64) -> Self {
					value.as_()
				}

				fn into_chunk(data: Vec<Self>) -> Chunk {
					Chunk::$variant(data)
				}

				fn slice_of(chunk: &Chunk) -> Option<&[Self]> {
					match chunk {
						Chunk::$variant(data) => Some(data),
						_ => None,
					}
				}

				fn slice_of_mut(chunk: &mut Chunk) -> Option<&mut Vec<Self>> {
					match chunk {
						Chunk::$variant(data) => Some(data),
						_ => None,
					}
				}

				fn vec_of(chunk: Chunk) -> std::result::Result<Vec<Self>, Chunk> {
					match chunk {
						Chunk::$variant(data) => Ok(data),
						other => Err(other),
					}
				}
			}

			impl From<Vec<$ty>> for Chunk {
				fn from(data: Vec<$ty>) -> Self {
					Chunk::$variant(data)
				}
			}
		)*
	};
}

impl_element!(
	u8 => UInt8,
	i8 => Int8,
	u16 => UInt16,
	i16 => Int16,
	u32 => UInt32,
	i32 => Int32,
	u64 => UInt64,
	i64 => Int64,
	f32 => Float32,
	f64 => Float64,
);
