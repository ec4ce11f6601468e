use log::*;
use polars::prelude::*;

use crate::error::{PipelineError, Result};
use crate::quarter::Quarter;
use crate::schema_mapping::{QUARTER_KEY, TRADE_AREA_KEY, TRADE_AREA_NAME};
use crate::trade_area_data_manager::{f64_values, i64_values};

pub const TEA_SHOP_COUNT: &str = "찻집_수";

/// demand / (supply + 1) 형태의 조합지표
#[derive(Debug, Clone, PartialEq)]
pub struct RatioIndicator {
    pub name: String,
    pub demand: String,
    pub supply: String,
}

impl RatioIndicator {
    pub fn new(name: &str, demand: &str, supply: &str) -> Self {
        RatioIndicator {
            name: name.to_string(),
            demand: demand.to_string(),
            supply: supply.to_string(),
        }
    }
}

/// 찻집 공급 대비 수요 조합지표 4종
pub fn default_ratio_indicators() -> Vec<RatioIndicator> {
    vec![
        // 카페 수요 대비 찻집 공급 부족
        RatioIndicator::new("공급갭_지수", "카페음료_점포수", TEA_SHOP_COUNT),
        // 찻집당 잠재 워크인 고객
        RatioIndicator::new("유동밀도_지수", "여성_유동인구_수", TEA_SHOP_COUNT),
        // 찻집당 잠재 단골 고객
        RatioIndicator::new("상주밀도_지수", "여성_상주인구_수", TEA_SHOP_COUNT),
        // 찻집당 여가 소비력
        RatioIndicator::new("여가소비_지수", "여가_지출_총금액", TEA_SHOP_COUNT),
    ]
}

/// +1 평활 비율. 공급 결측은 0 개로 본다.
pub fn smoothed_ratio(demand: Option<f64>, supply: Option<f64>) -> Option<f64> {
    let demand = demand?;
    let denominator = supply.unwrap_or(0.0) + 1.0;
    if !demand.is_finite() || !denominator.is_finite() || denominator <= 0.0 {
        return None;
    }
    Some(demand / denominator)
}

pub fn add_ratio_indicators(df: &mut DataFrame, table: &str, indicators: &[RatioIndicator]) -> Result<()> {
    for indicator in indicators {
        let demand = f64_values(df, table, &indicator.demand)?;
        let supply = f64_values(df, table, &indicator.supply)?;
        let values: Vec<Option<f64>> = demand
            .iter()
            .zip(supply.iter())
            .map(|(d, s)| smoothed_ratio(*d, *s))
            .collect();
        let missing = values.iter().filter(|v| v.is_none()).count();
        df.with_column(Series::new(&indicator.name, values))?;
        info!(
            "📐 {} = {} / ({} + 1) 계산 (결측 {}행)",
            indicator.name, indicator.demand, indicator.supply, missing
        );
    }
    Ok(())
}

/// 직전 분기 대비 증감률 (%). 직전 값이 0/결측이거나 결과가 유한하지 않으면 None.
pub fn growth_rate(previous: Option<f64>, current: Option<f64>) -> Option<f64> {
    let previous = previous?;
    let current = current?;
    if previous == 0.0 {
        return None;
    }
    let rate = (current - previous) / previous * 100.0;
    rate.is_finite().then_some(rate)
}

/// 상권별로 묶고 분기 순으로 정렬한 뒤 직전 분기 대비 증감률을 계산한다.
///
/// 정렬 후 바로 앞 행이 같은 상권의 `Quarter::prev()` 일 때만 비교한다.
/// 각 상권의 첫 분기, 분기 공백, 같은 분기 중복 행은 모두 None.
/// 결과는 입력 행 순서 그대로 돌려준다.
pub fn quarter_over_quarter_growth(
    trade_areas: &[Option<i64>],
    quarters: &[Option<Quarter>],
    values: &[Option<f64>],
) -> Result<Vec<Option<f64>>> {
    if trade_areas.len() != quarters.len() || quarters.len() != values.len() {
        return Err(PipelineError::Schema {
            table: "growth".to_string(),
            message: format!(
                "column lengths differ: {} / {} / {}",
                trade_areas.len(),
                quarters.len(),
                values.len()
            ),
        });
    }

    let mut order: Vec<usize> = (0..values.len())
        .filter(|&i| trade_areas[i].is_some() && quarters[i].is_some())
        .collect();
    order.sort_by_key(|&i| (trade_areas[i], quarters[i], i));

    let mut growth = vec![None; values.len()];
    for pair in order.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if trade_areas[prev] != trade_areas[cur] {
            continue;
        }
        // 단순히 앞 행과 비교하지 않는다. 분기가 빠진 경우(20233 → 20241)는 증감률 없음.
        let consecutive = match (quarters[prev], quarters[cur]) {
            (Some(p), Some(c)) => c.prev() == p,
            _ => false,
        };
        if consecutive {
            growth[cur] = growth_rate(values[prev], values[cur]);
        }
    }
    Ok(growth)
}

fn quarter_values(df: &DataFrame, table: &str) -> Result<Vec<Option<Quarter>>> {
    let codes = i64_values(df, table, QUARTER_KEY)?;
    let mut invalid = 0usize;
    let quarters: Vec<Option<Quarter>> = codes
        .into_iter()
        .map(|code| {
            code.and_then(|c| match Quarter::from_code(c) {
                Ok(q) => Some(q),
                Err(_) => {
                    invalid += 1;
                    None
                }
            })
        })
        .collect();
    if invalid > 0 {
        warn!("{}: 잘못된 {} {}개는 성장률 계산에서 제외", table, QUARTER_KEY, invalid);
    }
    Ok(quarters)
}

/// `source` 컬럼의 분기 성장률을 `target` 컬럼으로 추가
pub fn add_growth_indicator(df: &mut DataFrame, table: &str, source: &str, target: &str) -> Result<()> {
    let trade_areas = i64_values(df, table, TRADE_AREA_KEY)?;
    let quarters = quarter_values(df, table)?;
    let values = f64_values(df, table, source)?;
    let growth = quarter_over_quarter_growth(&trade_areas, &quarters, &values)?;
    let defined = growth.iter().filter(|g| g.is_some()).count();
    df.with_column(Series::new(target, growth))?;
    info!("📈 {} ← {} 분기 성장률 ({}/{}행 산출)", target, source, defined, df.height());
    Ok(())
}

/// 키 + 지정 컬럼만 남긴 지표 테이블
pub fn indicator_table(df: &DataFrame, extra: &[&str], indicators: &[RatioIndicator]) -> Result<DataFrame> {
    let mut columns: Vec<String> = vec![
        QUARTER_KEY.to_string(),
        TRADE_AREA_KEY.to_string(),
        TRADE_AREA_NAME.to_string(),
    ];
    columns.extend(extra.iter().map(|c| c.to_string()));
    columns.extend(indicators.iter().map(|i| i.name.clone()));
    Ok(df.select(columns)?)
}

/// (상권, 분기) 오름차순으로 행을 재배열
pub fn sort_by_trade_area_and_quarter(df: &DataFrame, table: &str) -> Result<DataFrame> {
    let trade_areas = i64_values(df, table, TRADE_AREA_KEY)?;
    let quarters = i64_values(df, table, QUARTER_KEY)?;
    let mut order: Vec<usize> = (0..df.height()).collect();
    // 결측 키는 맨 뒤
    order.sort_by_key(|&i| {
        (
            trade_areas[i].is_none(),
            trade_areas[i],
            quarters[i].is_none(),
            quarters[i],
            i,
        )
    });
    let idx: Vec<IdxSize> = order.into_iter().map(|row| row as IdxSize).collect();
    Ok(df.take(&IdxCa::from_vec("idx", idx))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(code: i64) -> Option<Quarter> {
        Some(Quarter::from_code(code).unwrap())
    }

    #[test]
    fn zero_supply_keeps_demand() {
        assert_eq!(smoothed_ratio(Some(42.0), Some(0.0)), Some(42.0));
        assert_eq!(smoothed_ratio(Some(42.0), None), Some(42.0));
        assert_eq!(smoothed_ratio(None, Some(3.0)), None);
    }

    #[test]
    fn ratio_is_finite_and_monotone_for_non_negative_inputs() {
        let mut previous = f64::INFINITY;
        for supply in 0..50 {
            let r = smoothed_ratio(Some(1234.5), Some(supply as f64)).unwrap();
            assert!(r.is_finite() && r >= 0.0);
            assert!(r < previous);
            previous = r;
        }
        assert_eq!(smoothed_ratio(Some(0.0), Some(0.0)), Some(0.0));
    }

    #[test]
    fn growth_is_null_for_zero_or_missing_prior() {
        assert!((growth_rate(Some(100.0), Some(110.0)).unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(growth_rate(Some(0.0), Some(5.0)), None);
        assert_eq!(growth_rate(None, Some(5.0)), None);
        assert_eq!(growth_rate(Some(5.0), None), None);
    }

    #[test]
    fn growth_is_grouped_by_trade_area() {
        // A, B 가 섞여 있고 정렬도 안 된 입력
        let areas = [Some(2), Some(1), Some(2), Some(1), Some(1)];
        let quarters = [q(20233), q(20234), q(20234), q(20233), q(20241)];
        let values = [Some(50.0), Some(110.0), Some(100.0), Some(100.0), Some(99.0)];
        let growth = quarter_over_quarter_growth(&areas, &quarters, &values).unwrap();

        // B 의 첫 분기는 A 의 마지막 분기와 비교하지 않는다
        assert_eq!(growth[0], None);
        assert_eq!(growth[3], None);
        assert!((growth[1].unwrap() - 10.0).abs() < 1e-9);
        assert!((growth[2].unwrap() - 100.0).abs() < 1e-9);
        // 20234 → 20241 연도 경계
        assert!((growth[4].unwrap() - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn gaps_and_duplicates_yield_null() {
        let areas = [Some(1), Some(1), Some(1)];
        let quarters = [q(20231), q(20233), q(20233)];
        let values = [Some(10.0), Some(20.0), Some(30.0)];
        let growth = quarter_over_quarter_growth(&areas, &quarters, &values).unwrap();
        assert_eq!(growth, vec![None, None, None]);
    }

    #[test]
    fn adds_indicator_columns_to_frame() {
        let mut df = DataFrame::new(vec![
            Series::new(QUARTER_KEY, &[20233i64, 20234]),
            Series::new(TRADE_AREA_KEY, &[1i64, 1]),
            Series::new(TRADE_AREA_NAME, &["가", "가"]),
            Series::new(TEA_SHOP_COUNT, &[0i64, 1]),
            Series::new("카페음료_점포수", &[6i64, 6]),
            Series::new("여성_유동인구_수", &[Some(100.0f64), None]),
            Series::new("여성_상주인구_수", &[10.0f64, 10.0]),
            Series::new("여가_지출_총금액", &[0.0f64, 4.0]),
            Series::new("총_유동인구_수", &[200.0f64, 250.0]),
        ])
        .unwrap();
        let indicators = default_ratio_indicators();
        add_ratio_indicators(&mut df, "panel", &indicators).unwrap();
        add_growth_indicator(&mut df, "panel", "총_유동인구_수", "유동인구_성장률").unwrap();

        let gap = f64_values(&df, "panel", "공급갭_지수").unwrap();
        assert_eq!(gap, vec![Some(6.0), Some(3.0)]);
        let walk_in = f64_values(&df, "panel", "유동밀도_지수").unwrap();
        assert_eq!(walk_in, vec![Some(100.0), None]);
        let growth = f64_values(&df, "panel", "유동인구_성장률").unwrap();
        assert_eq!(growth[0], None);
        assert!((growth[1].unwrap() - 25.0).abs() < 1e-9);

        let table = indicator_table(&df, &[TEA_SHOP_COUNT], &indicators).unwrap();
        assert_eq!(table.width(), 8);
    }

    #[test]
    fn sorts_by_trade_area_then_quarter() {
        let df = DataFrame::new(vec![
            Series::new(QUARTER_KEY, &[20241i64, 20234, 20234]),
            Series::new(TRADE_AREA_KEY, &[1i64, 2, 1]),
        ])
        .unwrap();
        let sorted = sort_by_trade_area_and_quarter(&df, "trend").unwrap();
        assert_eq!(
            i64_values(&sorted, "trend", QUARTER_KEY).unwrap(),
            vec![Some(20234), Some(20241), Some(20234)]
        );
        assert_eq!(
            i64_values(&sorted, "trend", TRADE_AREA_KEY).unwrap(),
            vec![Some(1), Some(1), Some(2)]
        );
    }
}
