pub mod config_manager;
pub mod coordinate_transformer;
pub mod error;
pub mod indicator_calculator;
pub mod panel_merger;
pub mod pipeline;
pub mod quarter;
pub mod schema_mapping;
pub mod search_keyword_builder;
pub mod spatial_matcher;
pub mod station_cache;
pub mod trade_area_data_manager;
pub mod trade_area_mapper;

pub use config_manager::{ConfigManager, PipelineConfig};
pub use error::{CoordinateError, PipelineError, Result};
pub use pipeline::{Pipeline, Stage};
pub use quarter::Quarter;
