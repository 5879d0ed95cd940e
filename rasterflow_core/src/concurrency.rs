//! Concurrency limits for block I/O.
//!
//! Block reads and writes mostly wait on the backend, so the I/O limit is 3x the
//! CPU count.
//!
//! ```
//! use rasterflow_core::ConcurrencyLimits;
//!
//! let limits = ConcurrencyLimits::default();
//! assert!(limits.io_bound >= ConcurrencyLimits::cpu_count());
//! ```

#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimits {
	/// Block writes a consumer keeps in flight at once.
	pub io_bound: usize,
}

impl ConcurrencyLimits {
	/// Custom limit. Zero is raised to one.
	pub fn new(io_bound: usize) -> Self {
		Self {
			io_bound: io_bound.max(1),
		}
	}

	pub fn cpu_count() -> usize {
		num_cpus::get()
	}
}

impl Default for ConcurrencyLimits {
	fn default() -> Self {
		Self::new(Self::cpu_count() * 3)
	}
}
