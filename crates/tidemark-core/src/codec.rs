//! Columnar object format: gzip-compressed Parquet.

use std::io::Cursor;

use bytes::Bytes;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{DataFrame, ParquetReader, PolarsError, SerReader};
use thiserror::Error;

pub const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode dataset as parquet: {0}")]
    Encode(#[source] PolarsError),
    #[error("failed to decode parquet object: {0}")]
    Decode(#[source] PolarsError),
}

pub fn encode(dataset: &DataFrame) -> Result<Bytes, CodecError> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = dataset.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Gzip(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)
            .map_err(CodecError::Encode)?;
    }
    Ok(Bytes::from(buffer))
}

pub fn decode(bytes: &[u8]) -> Result<DataFrame, CodecError> {
    ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(CodecError::Decode)
}
