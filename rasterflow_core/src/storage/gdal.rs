//! GDAL-backed block storage.
//!
//! GDAL handles are neither `Sync` nor cheap to call from async code, so every
//! access locks the dataset and runs on tokio's blocking pool. Band metadata is
//! read once when the band is opened.

use super::BlockStorage;
use crate::{Chunk, Element, ElementType, Size, macros::with_element_type};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use gdal::{
	Dataset, DatasetOptions, GdalOpenFlags,
	raster::{Buffer, GdalDataType},
};
use parking_lot::Mutex;
use std::{fmt, path::Path, sync::Arc};

pub struct GdalBand {
	dataset: Arc<Mutex<Dataset>>,
	band_index: usize,
	raster_size: Size,
	block_size: Size,
	element_type: ElementType,
	no_data: Option<f64>,
}

impl fmt::Debug for GdalBand {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GdalBand")
			.field("band_index", &self.band_index)
			.field("raster_size", &self.raster_size)
			.field("block_size", &self.block_size)
			.field("element_type", &self.element_type)
			.field("no_data", &self.no_data)
			.finish()
	}
}

fn element_type_of(data_type: GdalDataType) -> Result<ElementType> {
	Ok(match data_type {
		GdalDataType::UInt8 => ElementType::UInt8,
		GdalDataType::Int8 => ElementType::Int8,
		GdalDataType::UInt16 => ElementType::UInt16,
		GdalDataType::Int16 => ElementType::Int16,
		GdalDataType::UInt32 => ElementType::UInt32,
		GdalDataType::Int32 => ElementType::Int32,
		GdalDataType::UInt64 => ElementType::UInt64,
		GdalDataType::Int64 => ElementType::Int64,
		GdalDataType::Float32 => ElementType::Float32,
		GdalDataType::Float64 => ElementType::Float64,
		other => bail!("unsupported GDAL data type {other:?}"),
	})
}

impl GdalBand {
	/// Wraps band `band_index` (1-based, as in GDAL) of an open dataset.
	pub fn from_dataset(dataset: Dataset, band_index: usize) -> Result<Self> {
		let (raster_size, block_size, element_type, no_data) = {
			let band = dataset
				.rasterband(band_index)
				.with_context(|| format!("Failed to get raster band {band_index} from GDAL dataset"))?;
			let (width, height) = band.size();
			let (block_x, block_y) = band.block_size();
			(
				Size::new(width, height),
				Size::new(block_x, block_y),
				element_type_of(band.band_type())?,
				band.no_data_value(),
			)
		};
		log::debug!("opened GDAL band {band_index}: {raster_size} {element_type}, blocks of {block_size}");
		Ok(Self {
			dataset: Arc::new(Mutex::new(dataset)),
			band_index,
			raster_size,
			block_size,
			element_type,
			no_data,
		})
	}

	/// Opens band `band_index` of the raster at `path` for reading.
	pub async fn open(path: impl AsRef<Path>, band_index: usize) -> Result<Self> {
		Self::open_with_flags(path.as_ref(), band_index, GdalOpenFlags::GDAL_OF_RASTER).await
	}

	/// Opens band `band_index` of the raster at `path` for reading and writing.
	pub async fn open_for_update(path: impl AsRef<Path>, band_index: usize) -> Result<Self> {
		Self::open_with_flags(
			path.as_ref(),
			band_index,
			GdalOpenFlags::GDAL_OF_RASTER | GdalOpenFlags::GDAL_OF_UPDATE,
		)
		.await
	}

	async fn open_with_flags(path: &Path, band_index: usize, open_flags: GdalOpenFlags) -> Result<Self> {
		let path = path.to_path_buf();
		blocking(move || {
			let options = DatasetOptions {
				open_flags,
				..DatasetOptions::default()
			};
			let dataset =
				Dataset::open_ex(&path, options).with_context(|| format!("Failed to open GDAL dataset {path:?}"))?;
			GdalBand::from_dataset(dataset, band_index)
		})
		.await
	}

	#[must_use]
	pub fn arc(self) -> Arc<Self> {
		Arc::new(self)
	}

	/// Reads `lines` full-width raster lines starting at `first_line`.
	async fn read_lines(&self, first_line: usize, lines: usize) -> Result<Chunk> {
		let dataset = self.dataset.clone();
		let band_index = self.band_index;
		let element_type = self.element_type;
		let width = self.raster_size.x;
		blocking(move || {
			let dataset = dataset.lock();
			let band = dataset.rasterband(band_index)?;
			let window = (0, first_line as isize);
			let size = (width, lines);
			with_element_type!(element_type, T => {
				let buffer = band.read_as::<T>(window, size, size, None)?;
				Ok(T::into_chunk(buffer.into_shape_and_vec().1))
			})
		})
		.await
	}

	/// Writes the first `lines * W` elements of `data` starting at `first_line`.
	async fn write_lines(&self, first_line: usize, lines: usize, data: Chunk) -> Result<()> {
		let dataset = self.dataset.clone();
		let band_index = self.band_index;
		let width = self.raster_size.x;
		let mut data = data.convert(self.element_type);
		data.truncate(width * lines);
		blocking(move || {
			let dataset = dataset.lock();
			let mut band = dataset.rasterband(band_index)?;
			let window = (0, first_line as isize);
			let size = (width, lines);
			let element_type = data.element_type();
			with_element_type!(element_type, T => {
				let data = data.into_vec::<T>()?;
				let mut buffer = Buffer::new(size, data);
				band.write(window, size, &mut buffer)?;
				Ok(())
			})
		})
		.await
	}

	fn block_row_lines(&self, row: usize) -> Result<(usize, usize)> {
		let first_line = row * self.block_size.y;
		if first_line >= self.raster_size.y {
			bail!("block row {row} is outside of raster {}", self.raster_size);
		}
		Ok((first_line, self.block_size.y.min(self.raster_size.y - first_line)))
	}
}

async fn blocking<R, F>(f: F) -> Result<R>
where
	F: FnOnce() -> Result<R> + Send + 'static,
	R: Send + 'static,
{
	tokio::task::spawn_blocking(f)
		.await
		.map_err(|e| anyhow!("spawn_blocking failed: {e}"))?
}

#[async_trait]
impl BlockStorage for GdalBand {
	async fn block_size(&self) -> Result<Size> {
		Ok(self.block_size)
	}

	async fn raster_size(&self) -> Result<Size> {
		Ok(self.raster_size)
	}

	async fn element_type(&self) -> Result<ElementType> {
		Ok(self.element_type)
	}

	async fn no_data_value(&self) -> Result<Option<f64>> {
		Ok(self.no_data)
	}

	async fn read_block_row(&self, row: usize) -> Result<Chunk> {
		let (first_line, lines) = self.block_row_lines(row)?;
		let mut chunk = self
			.read_lines(first_line, lines)
			.await
			.with_context(|| format!("Failed to read block row {row} from GDAL band {}", self.band_index))?;
		let padding = self.raster_size.x * (self.block_size.y - lines);
		if padding > 0 {
			chunk.append(Chunk::zeros(self.element_type, padding))?;
		}
		Ok(chunk)
	}

	async fn write_block_row(&self, row: usize, data: Chunk) -> Result<()> {
		let (first_line, lines) = self.block_row_lines(row)?;
		self
			.write_lines(first_line, lines, data)
			.await
			.with_context(|| format!("Failed to write block row {row} to GDAL band {}", self.band_index))
	}

	async fn read_line(&self, row: usize) -> Result<Chunk> {
		self
			.read_lines(row, 1)
			.await
			.with_context(|| format!("Failed to read line {row} from GDAL band {}", self.band_index))
	}

	async fn write_line(&self, row: usize, data: Chunk) -> Result<()> {
		self
			.write_lines(row, 1, data)
			.await
			.with_context(|| format!("Failed to write line {row} to GDAL band {}", self.band_index))
	}

	async fn flush(&self) -> Result<()> {
		let dataset = self.dataset.clone();
		blocking(move || {
			dataset.lock().flush_cache()?;
			Ok(())
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use gdal::DriverManager;
	use pretty_assertions::assert_eq;

	fn mem_band(width: usize, height: usize) -> Result<GdalBand> {
		let driver = DriverManager::get_driver_by_name("MEM")?;
		let dataset = driver.create_with_band_type::<f32, _>("", width, height, 1)?;
		GdalBand::from_dataset(dataset, 1)
	}

	#[tokio::test]
	async fn should_report_mem_band_geometry() -> Result<()> {
		let band = mem_band(5, 3)?;
		assert_eq!(band.raster_size().await?, Size::new(5, 3));
		assert_eq!(band.block_size().await?.x, 5);
		assert_eq!(band.element_type().await?, ElementType::Float32);
		Ok(())
	}

	#[tokio::test]
	async fn should_write_and_read_lines() -> Result<()> {
		let band = mem_band(3, 2)?;
		band.write_line(1, Chunk::from(vec![1.5f32, 2.5, 3.5])).await?;
		assert_eq!(band.read_line(1).await?, Chunk::from(vec![1.5f32, 2.5, 3.5]));
		assert_eq!(band.read_line(0).await?, Chunk::from(vec![0.0f32; 3]));
		band.flush().await?;
		Ok(())
	}

	#[test]
	fn should_map_gdal_types() {
		assert_eq!(element_type_of(GdalDataType::UInt8).unwrap(), ElementType::UInt8);
		assert_eq!(element_type_of(GdalDataType::Float64).unwrap(), ElementType::Float64);
		assert!(element_type_of(GdalDataType::Unknown).is_err());
	}
}
