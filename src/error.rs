//! 파이프라인 에러 타입 정의

use std::path::PathBuf;
use thiserror::Error;

/// 좌표 변환 실패 (레코드 단위)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("coordinate is missing")]
    Missing,

    #[error("coordinate is not a finite number: ({x}, {y})")]
    NonFinite { x: f64, y: f64 },

    #[error("coordinate ({x}, {y}) is outside the Seoul metropolitan bounds")]
    OutOfBounds { x: f64, y: f64 },

    #[error("coordinate arrays differ in length: {xs} vs {ys}")]
    LengthMismatch { xs: usize, ys: usize },
}

/// 파이프라인 전역 에러
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing input file {path} (expected from stage '{stage}')")]
    MissingFile { path: PathBuf, stage: String },

    #[error("Column '{column}' not found in {table}")]
    MissingColumn { table: String, column: String },

    #[error("Join integrity violation merging {right} into {left}: expected {expected} rows, got {actual}")]
    JoinIntegrity {
        left: String,
        right: String,
        expected: usize,
        actual: usize,
    },

    #[error("Coordinate error: {0}")]
    Coordinate(#[from] CoordinateError),

    #[error("Reference point set is empty: {0}")]
    EmptyReference(String),

    #[error("Invalid quarter code: {0}")]
    InvalidQuarter(i64),

    #[error("Schema error in {table}: {message}")]
    Schema { table: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Station lookup failed: {0}")]
    StationLookup(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
