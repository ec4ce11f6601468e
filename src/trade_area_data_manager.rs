use encoding_rs::EUC_KR;
use log::*;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use crate::config_manager::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::schema_mapping::{SchemaMapping, TRADE_AREA_KEY, TRADE_AREA_NAME};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

pub const DONG_NAME: &str = "행정동_코드_명";
pub const DISTRICT_NAME: &str = "자치구_코드_명";
pub const TM_X: &str = "엑스좌표_값";
pub const TM_Y: &str = "와이좌표_값";

/// 상권 기준 정보 (읽기 전용 참조 데이터)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeArea {
    #[serde(rename = "상권_코드")]
    pub code: i64,
    #[serde(rename = "상권_코드_명")]
    pub name: String,
    #[serde(rename = "행정동_코드_명")]
    pub dong: Option<String>,
    #[serde(rename = "자치구_코드_명")]
    pub district: Option<String>,
    #[serde(rename = "엑스좌표_값")]
    pub x: Option<f64>,
    #[serde(rename = "와이좌표_값")]
    pub y: Option<f64>,
}

#[derive(Clone)]
pub struct TradeAreaDataManager {
    config: PipelineConfig,
    schema: SchemaMapping,
}

impl TradeAreaDataManager {
    pub fn new(config: PipelineConfig, schema: SchemaMapping) -> Self {
        TradeAreaDataManager { config, schema }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// CSV 를 그대로 읽는다. UTF-8 (BOM 허용) 실패 시 EUC-KR(CP949) 로 다시 해석.
    pub fn read_table(&self, file_name: &str, stage: &str) -> Result<DataFrame> {
        let path = self.config.require_input(file_name, stage)?;
        let bytes = fs::read(&path)?;
        let text = decode_korean_text(&bytes, file_name);

        // 전체 행으로 타입 추론 (뒤쪽 소수값이 정수 컬럼을 넓힌다). 파싱 실패는 파일명과 함께 에러.
        let mut df = CsvReader::new(Cursor::new(text.into_bytes()))
            .has_header(true)
            .infer_schema(None)
            .finish()
            .map_err(|e| PipelineError::Schema {
                table: file_name.to_string(),
                message: format!("CSV parse failed: {}", e),
            })?;

        // 중간에 BOM 이 섞인 헤더 정리
        let bom_headers: Vec<String> = df
            .get_column_names()
            .iter()
            .filter(|c| c.starts_with('\u{feff}'))
            .map(|c| c.to_string())
            .collect();
        for header in bom_headers {
            df.rename(&header, header.trim_start_matches('\u{feff}'))?;
        }

        info!("📂 {} 로드: {}행 × {}열", file_name, df.height(), df.width());
        Ok(df)
    }

    /// 읽기 + 스키마 매핑 적용 + 필수 컬럼 검사
    pub fn read_source(&self, source: &str, file_name: &str, stage: &str) -> Result<DataFrame> {
        let mut df = self.read_table(file_name, stage)?;
        self.schema.normalize(source, file_name, &mut df)?;
        Ok(df)
    }

    /// UTF-8 BOM 을 붙여 저장 (스프레드시트 호환)
    pub fn write_table(&self, file_name: &str, df: &mut DataFrame) -> Result<PathBuf> {
        let path = self.config.resolve(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(&UTF8_BOM)?;
        CsvWriter::new(&mut file).finish(df)?;
        info!("💾 {} 저장: {}행 × {}열", file_name, df.height(), df.width());
        Ok(path)
    }

    /// serde 레코드 목록을 BOM 포함 CSV 로 저장
    pub fn write_records<T: Serialize>(&self, file_name: &str, records: &[T]) -> Result<PathBuf> {
        let path = self.config.resolve(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(&UTF8_BOM)?;
        let mut writer = csv::Writer::from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        info!("💾 {} 저장: {}행", file_name, records.len());
        Ok(path)
    }

    /// 상권 기준 테이블. 상권_코드 중복은 첫 행만 남긴다.
    pub fn load_trade_areas(&self, stage: &str) -> Result<Vec<TradeArea>> {
        let file_name = self.config.files.trade_areas.clone();
        let df = self.read_source("trade_areas", &file_name, stage)?;
        trade_areas_from_frame(&df, &file_name)
    }
}

fn decode_korean_text(bytes: &[u8], file_name: &str) -> String {
    let body = bytes.strip_prefix(&UTF8_BOM[..]).unwrap_or(bytes);
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (decoded, _, had_errors) = EUC_KR.decode(body);
            if had_errors {
                warn!("{}: EUC-KR 디코딩 중 잘못된 바이트가 있습니다.", file_name);
            } else {
                debug!("{}: UTF-8 이 아니어서 EUC-KR 로 읽었습니다.", file_name);
            }
            decoded.into_owned()
        }
    }
}

pub fn trade_areas_from_frame(df: &DataFrame, table: &str) -> Result<Vec<TradeArea>> {
    let codes = i64_values(df, table, TRADE_AREA_KEY)?;
    let names = str_values(df, table, TRADE_AREA_NAME)?;
    let xs = f64_values(df, table, TM_X)?;
    let ys = f64_values(df, table, TM_Y)?;
    let dongs = optional_str_values(df, DONG_NAME, df.height())?;
    let districts = optional_str_values(df, DISTRICT_NAME, df.height())?;

    let mut seen = HashSet::new();
    let mut areas = Vec::with_capacity(codes.len());
    let mut missing_code = 0usize;

    for i in 0..codes.len() {
        let Some(code) = codes[i] else {
            missing_code += 1;
            continue;
        };
        if !seen.insert(code) {
            continue;
        }
        areas.push(TradeArea {
            code,
            name: names[i].clone().unwrap_or_default(),
            dong: dongs[i].clone(),
            district: districts[i].clone(),
            x: xs[i],
            y: ys[i],
        });
    }

    if missing_code > 0 {
        warn!("{}: 상권_코드가 비어 있는 {}행 제외", table, missing_code);
    }
    if areas.len() + missing_code < codes.len() {
        warn!(
            "{}: 중복 상권_코드 {}행 제외 (첫 행 유지)",
            table,
            codes.len() - missing_code - areas.len()
        );
    }
    Ok(areas)
}

fn require_column<'a>(df: &'a DataFrame, table: &str, column: &str) -> Result<&'a Series> {
    df.column(column).map_err(|_| PipelineError::MissingColumn {
        table: table.to_string(),
        column: column.to_string(),
    })
}

pub fn i64_values(df: &DataFrame, table: &str, column: &str) -> Result<Vec<Option<i64>>> {
    let series = require_column(df, table, column)?.cast(&DataType::Int64)?;
    Ok(series.i64()?.into_iter().collect())
}

pub fn f64_values(df: &DataFrame, table: &str, column: &str) -> Result<Vec<Option<f64>>> {
    let series = require_column(df, table, column)?.cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

pub fn str_values(df: &DataFrame, table: &str, column: &str) -> Result<Vec<Option<String>>> {
    let series = require_column(df, table, column)?.cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// 없어도 되는 문자열 컬럼. 없으면 전부 None.
pub fn optional_str_values(df: &DataFrame, column: &str, height: usize) -> Result<Vec<Option<String>>> {
    if df.column(column).is_err() {
        return Ok(vec![None; height]);
    }
    str_values(df, "", column)
}
