//! 분기 × 상권 마스터 패널에 속성 테이블을 left join 으로 붙인다.
//!
//! 모든 병합은 키 타입 정규화 → 오른쪽 키 중복 제거(첫 행 유지) →
//! 겹치는 컬럼 제거 → left join → 행 수 검증 순서로 진행된다.

use log::*;
use polars::prelude::*;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{PipelineError, Result};
use crate::schema_mapping::{QUARTER_KEY, TRADE_AREA_KEY};
use crate::trade_area_data_manager::i64_values;

const MATCH_MARKER: &str = "__merge_matched";

/// 오른쪽 테이블의 단위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinGrain {
    /// 분기 × 상권 (기준_년분기_코드, 상권_코드)
    Panel,
    /// 상권 단면 (상권_코드). 모든 분기에 같은 값이 붙는다.
    CrossSection,
}

impl JoinGrain {
    pub fn keys(&self) -> Vec<&'static str> {
        match self {
            JoinGrain::Panel => vec![QUARTER_KEY, TRADE_AREA_KEY],
            JoinGrain::CrossSection => vec![TRADE_AREA_KEY],
        }
    }
}

/// 단일 병합 단계 정의
#[derive(Debug, Clone)]
pub struct MergeStep {
    pub name: String,
    pub grain: JoinGrain,
    /// 오른쪽에서 가져올 컬럼 (키 제외, 이름 변경 후 기준). None 이면 전부.
    pub columns: Option<Vec<String>>,
    pub renames: Vec<(String, String)>,
    /// 병합 후 결측을 0 으로 채울 개수형 컬럼
    pub zero_fill: Vec<String>,
    /// 이번 병합으로 추가된 컬럼 중 이 접미사로 끝나는 것도 0 으로 채운다
    pub zero_fill_suffix: Option<String>,
    /// (컬럼, 값) 이 일치하는 행만 사용
    pub filter: Option<(String, String)>,
}

impl MergeStep {
    pub fn new(name: &str, grain: JoinGrain) -> Self {
        MergeStep {
            name: name.to_string(),
            grain,
            columns: None,
            renames: Vec::new(),
            zero_fill: Vec::new(),
            zero_fill_suffix: None,
            filter: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.renames.push((from.to_string(), to.to_string()));
        self
    }

    pub fn zero_fill(mut self, columns: &[&str]) -> Self {
        self.zero_fill.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn zero_fill_added(mut self, suffix: &str) -> Self {
        self.zero_fill_suffix = Some(suffix.to_string());
        self
    }

    pub fn filter_eq(mut self, column: &str, value: &str) -> Self {
        self.filter = Some((column.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub step: String,
    pub grain: JoinGrain,
    pub rows_before: usize,
    pub rows_after: usize,
    pub right_rows: usize,
    pub duplicate_keys_dropped: usize,
    pub colliding_columns_dropped: Vec<String>,
    pub columns_added: Vec<String>,
    pub matched_rows: usize,
}

impl MergeReport {
    pub fn log(&self) {
        info!(
            "[{}] 병합 → {}행 (오른쪽 {}행, 매칭 {}/{}), 추가 컬럼 {}개",
            self.step,
            self.rows_after,
            self.right_rows,
            self.matched_rows,
            self.rows_after,
            self.columns_added.len()
        );
        if self.duplicate_keys_dropped > 0 {
            warn!(
                "[{}] 오른쪽 테이블 중복 키 {}행 제거 (첫 행 유지)",
                self.step, self.duplicate_keys_dropped
            );
        }
        if !self.colliding_columns_dropped.is_empty() {
            debug!(
                "[{}] 이미 있는 컬럼 제외: {:?}",
                self.step, self.colliding_columns_dropped
            );
        }
    }
}

/// 조인 키를 Int64 로 통일한다. 변환 중 새로 생긴 결측은 경고로 남긴다.
pub fn normalize_key_columns(df: &mut DataFrame, table: &str, keys: &[&str]) -> Result<()> {
    for key in keys {
        let original = df
            .column(key)
            .map_err(|_| PipelineError::MissingColumn {
                table: table.to_string(),
                column: key.to_string(),
            })?
            .clone();
        if original.dtype() == &DataType::Int64 {
            continue;
        }
        let nulls_before = original.null_count();
        let casted = original.cast(&DataType::Int64)?;
        let lost = casted.null_count().saturating_sub(nulls_before);
        if lost > 0 {
            warn!(
                "{}: {} 값 {}개를 정수 코드로 변환하지 못했습니다.",
                table, key, lost
            );
        }
        df.with_column(casted)?;
    }
    Ok(())
}

/// 키 기준 중복 제거 (첫 행 유지). 제거된 행 수를 함께 돌려준다.
pub fn dedup_on_keys(df: &DataFrame, table: &str, keys: &[&str]) -> Result<(DataFrame, usize)> {
    let key_values: Vec<Vec<Option<i64>>> = keys
        .iter()
        .map(|k| i64_values(df, table, k))
        .collect::<Result<_>>()?;

    let mut seen: HashSet<Vec<Option<i64>>> = HashSet::with_capacity(df.height());
    let mask: Vec<bool> = (0..df.height())
        .map(|row| seen.insert(key_values.iter().map(|col| col[row]).collect()))
        .collect();

    let dropped = mask.iter().filter(|keep| !**keep).count();
    if dropped == 0 {
        return Ok((df.clone(), 0));
    }
    let deduped = df.filter(&BooleanChunked::from_slice("keep", &mask))?;
    Ok((deduped, dropped))
}

/// 키가 아닌 컬럼 중 마스터에 이미 있는 것을 오른쪽에서 제거
pub fn drop_colliding_columns(
    master: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
) -> Result<(DataFrame, Vec<String>)> {
    let existing: HashSet<&str> = master.get_column_names().into_iter().collect();
    let mut keep = Vec::new();
    let mut dropped = Vec::new();
    for name in right.get_column_names() {
        if keys.contains(&name) || !existing.contains(name) {
            keep.push(name.to_string());
        } else {
            dropped.push(name.to_string());
        }
    }
    Ok((right.select(keep)?, dropped))
}

/// left join 후 행 수가 그대로인지 확인한다. 다르면 치명적 오류.
pub fn left_join_preserving_rows(
    master: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
    left_name: &str,
    right_name: &str,
) -> Result<DataFrame> {
    let joined = master.join(right, keys, keys, JoinArgs::new(JoinType::Left))?;
    if joined.height() != master.height() {
        error!(
            "{} ← {} 병합 후 행 수 불일치: {} → {}",
            left_name,
            right_name,
            master.height(),
            joined.height()
        );
        return Err(PipelineError::JoinIntegrity {
            left: left_name.to_string(),
            right: right_name.to_string(),
            expected: master.height(),
            actual: joined.height(),
        });
    }
    Ok(joined)
}

/// 개수형 컬럼 결측을 0 으로 채우고 정수형으로 맞춘다.
pub fn fill_zero(df: &mut DataFrame, table: &str, column: &str) -> Result<usize> {
    let values = i64_values(df, table, column)?;
    let filled = values.iter().filter(|v| v.is_none()).count();
    let series = Series::new(
        column,
        values.into_iter().map(|v| v.unwrap_or(0)).collect::<Vec<i64>>(),
    );
    df.with_column(series)?;
    Ok(filled)
}

/// 마스터 패널 + 병합 이력
pub struct PanelMerger {
    name: String,
    master: DataFrame,
    reports: Vec<MergeReport>,
}

impl PanelMerger {
    pub fn new(name: &str, mut master: DataFrame) -> Result<Self> {
        let keys = JoinGrain::Panel.keys();
        normalize_key_columns(&mut master, name, &keys)?;
        let (_, duplicates) = dedup_on_keys(&master, name, &keys)?;
        if duplicates > 0 {
            warn!(
                "{}: 마스터 패널에 (분기, 상권) 중복 {}행이 있습니다.",
                name, duplicates
            );
        }
        info!("🧱 마스터 패널 {}: {}행 × {}열", name, master.height(), master.width());
        Ok(PanelMerger {
            name: name.to_string(),
            master,
            reports: Vec::new(),
        })
    }

    pub fn master(&self) -> &DataFrame {
        &self.master
    }

    pub fn reports(&self) -> &[MergeReport] {
        &self.reports
    }

    /// 오른쪽 테이블을 정해진 단위로 병합
    pub fn merge(&mut self, right: DataFrame, grain: JoinGrain, right_name: &str) -> Result<&MergeReport> {
        let keys = grain.keys();
        let rows_before = self.master.height();
        let right_rows = right.height();

        let mut right = right;
        normalize_key_columns(&mut right, right_name, &keys)?;
        let (right, duplicate_keys_dropped) = dedup_on_keys(&right, right_name, &keys)?;
        let (mut right, colliding_columns_dropped) = drop_colliding_columns(&self.master, &right, &keys)?;

        let columns_added: Vec<String> = right
            .get_column_names()
            .into_iter()
            .filter(|c| !keys.contains(c))
            .map(|c| c.to_string())
            .collect();

        right.with_column(Series::new(MATCH_MARKER, vec![true; right.height()]))?;
        let mut joined = left_join_preserving_rows(&self.master, &right, &keys, &self.name, right_name)?;
        let matched_rows = joined.height() - joined.column(MATCH_MARKER)?.null_count();
        let _ = joined.drop_in_place(MATCH_MARKER)?;

        self.master = joined;
        self.reports.push(MergeReport {
            step: right_name.to_string(),
            grain,
            rows_before,
            rows_after: self.master.height(),
            right_rows,
            duplicate_keys_dropped,
            colliding_columns_dropped,
            columns_added,
            matched_rows,
        });
        let report = &self.reports[self.reports.len() - 1];
        report.log();
        Ok(report)
    }

    /// 필터 / 이름 변경 / 컬럼 선택 / 0 채우기를 포함한 병합 단계
    pub fn merge_step(&mut self, right: DataFrame, step: &MergeStep) -> Result<&MergeReport> {
        let mut right = right;

        if let Some((column, value)) = &step.filter {
            let before = right.height();
            let mask = right
                .column(column)
                .map_err(|_| PipelineError::MissingColumn {
                    table: step.name.clone(),
                    column: column.clone(),
                })?
                .cast(&DataType::String)?
                .equal(value.as_str())?;
            right = right.filter(&mask)?;
            info!("[{}] {} == '{}' 필터: {} → {}행", step.name, column, value, before, right.height());
        }

        for (from, to) in &step.renames {
            if right.column(from).is_ok() {
                right.rename(from, to)?;
            }
        }

        if let Some(columns) = &step.columns {
            let mut selection: Vec<String> = step.grain.keys().iter().map(|k| k.to_string()).collect();
            for column in columns {
                if right.column(column).is_err() {
                    return Err(PipelineError::MissingColumn {
                        table: step.name.clone(),
                        column: column.clone(),
                    });
                }
                selection.push(column.clone());
            }
            right = right.select(selection)?;
        }

        let added = self.merge(right, step.grain, &step.name)?.columns_added.clone();

        let mut targets = step.zero_fill.clone();
        if let Some(suffix) = &step.zero_fill_suffix {
            targets.extend(
                added
                    .into_iter()
                    .filter(|c| c.ends_with(suffix.as_str()) && !step.zero_fill.contains(c)),
            );
        }
        for column in &targets {
            let filled = fill_zero(&mut self.master, &self.name, column)?;
            debug!("[{}] {} 결측 {}개 → 0", step.name, column, filled);
        }

        let report = &self.reports[self.reports.len() - 1];
        Ok(report)
    }

    pub fn fill_zero(&mut self, column: &str) -> Result<usize> {
        fill_zero(&mut self.master, &self.name, column)
    }

    pub fn into_master(self) -> DataFrame {
        self.master
    }
}
