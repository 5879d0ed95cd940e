use serde::Deserialize;
use std::fmt;

/// Width (`x`) and height (`y`) in pixels of a raster or of one storage block.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
pub struct Size {
	pub x: usize,
	pub y: usize,
}

impl Size {
	#[must_use]
	pub const fn new(x: usize, y: usize) -> Self {
		Self { x, y }
	}

	/// Number of elements covered.
	#[must_use]
	pub const fn area(&self) -> usize {
		self.x * self.y
	}
}

impl fmt::Display for Size {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}x{}", self.x, self.y)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn area_and_display() {
		let size = Size::new(801, 601);
		assert_eq!(size.area(), 481_401);
		assert_eq!(size.to_string(), "801x601");
	}
}
