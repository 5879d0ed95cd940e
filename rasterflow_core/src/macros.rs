//! Dispatch helpers that turn a runtime element type into a generic code path.

/// Matches a [`Chunk`](crate::Chunk) and binds its vector as `$data`, with `$T`
/// aliased to the element primitive inside `$body`.
macro_rules! dispatch_chunk {
	($chunk:expr, $data:ident, $T:ident => $body:expr) => {
		match $chunk {
			$crate::Chunk::UInt8($data) => {
				#[allow(dead_code)]
				type $T = u8;
				$body
			}
			$crate::Chunk::Int8($data) => {
				#[allow(dead_code)]
				type $T = i8;
				$body
			}
			$crate::Chunk::UInt16($data) => {
				#[allow(dead_code)]
				type $T = u16;
				$body
			}
			$crate::Chunk::Int16($data) => {
				#[allow(dead_code)]
				type $T = i16;
				$body
			}
			$crate::Chunk::UInt32($data) => {
				#[allow(dead_code)]
				type $T = u32;
				$body
			}
			$crate::Chunk::Int32($data) => {
				#[allow(dead_code)]
				type $T = i32;
				$body
			}
			$crate::Chunk::UInt64($data) => {
				#[allow(dead_code)]
				type $T = u64;
				$body
			}
			$crate::Chunk::Int64($data) => {
				#[allow(dead_code)]
				type $T = i64;
				$body
			}
			$crate::Chunk::Float32($data) => {
				#[allow(dead_code)]
				type $T = f32;
				$body
			}
			$crate::Chunk::Float64($data) => {
				#[allow(dead_code)]
				type $T = f64;
				$body
			}
		}
	};
}

/// Evaluates `$body` with `$T` aliased to the primitive behind an
/// [`ElementType`](crate::ElementType).
macro_rules! with_element_type {
	($element_type:expr, $T:ident => $body:expr) => {
		match $element_type {
			$crate::ElementType::UInt8 => {
				type $T = u8;
				$body
			}
			$crate::ElementType::Int8 => {
				type $T = i8;
				$body
			}
			$crate::ElementType::UInt16 => {
				type $T = u16;
				$body
			}
			$crate::ElementType::Int16 => {
				type $T = i16;
				$body
			}
			$crate::ElementType::UInt32 => {
				type $T = u32;
				$body
			}
			$crate::ElementType::Int32 => {
				type $T = i32;
				$body
			}
			$crate::ElementType::UInt64 => {
				type $T = u64;
				$body
			}
			$crate::ElementType::Int64 => {
				type $T = i64;
				$body
			}
			$crate::ElementType::Float32 => {
				type $T = f32;
				$body
			}
			$crate::ElementType::Float64 => {
				type $T = f64;
				$body
			}
		}
	};
}

pub(crate) use dispatch_chunk;
pub(crate) use with_element_type;
