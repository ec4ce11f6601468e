//! 단계별 실행. 각 단계는 data_dir 의 파일을 읽어 새 파일을 쓰고 끝난다.

use chrono::Local;
use log::*;
use polars::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::config_manager::PipelineConfig;
use crate::coordinate_transformer::CoordinateTransformer;
use crate::error::{PipelineError, Result};
use crate::indicator_calculator::{
    add_growth_indicator, add_ratio_indicators, default_ratio_indicators, indicator_table,
    sort_by_trade_area_and_quarter, TEA_SHOP_COUNT,
};
use crate::panel_merger::{JoinGrain, MergeStep, PanelMerger};
use crate::schema_mapping::{SchemaMapping, QUARTER_KEY, TRADE_AREA_KEY, TRADE_AREA_NAME};
use crate::search_keyword_builder::{build_search_queries, extract_station_names, QuerySource, SearchQuery};
use crate::station_cache::{CacheStatus, StationCache, TableStationLocator};
use crate::trade_area_data_manager::{
    i64_values, optional_str_values, str_values, TradeAreaDataManager, DONG_NAME,
};
use crate::trade_area_mapper::{
    PoiMappingOutcome, StationMappingOutcome, TradeAreaMapper, NEAREST_STATION,
};

/// 파이프라인 밖에서 준비되는 입력 (공공데이터 수집, 크롤링 등)
pub const EXTERNAL_INPUT: &str = "external collection";

pub const RESERVE_STORE_COUNT: &str = "스타벅스_리저브_수";
pub const CAFE_STORE_COUNT: &str = "카페음료_점포수";
pub const CAFE_OPEN_RATE: &str = "카페_개업률";
pub const FLOATING_POP_GROWTH: &str = "유동인구_성장률";
const SERVICE_CATEGORY: &str = "서비스_업종_코드_명";
const TOTAL_FLOATING_POP: &str = "총_유동인구_수";
const COUNT_SUFFIX: &str = "_수";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MapStations,
    BuildSearchKeywords,
    MapTeaShops,
    MapReserveStores,
    AssembleDemand,
    MergeSupply,
    BuildTrendIndex,
    MergeTrend,
}

impl Stage {
    /// 의존 순서대로
    pub const ALL: [Stage; 8] = [
        Stage::MapStations,
        Stage::BuildSearchKeywords,
        Stage::MapTeaShops,
        Stage::MapReserveStores,
        Stage::AssembleDemand,
        Stage::MergeSupply,
        Stage::BuildTrendIndex,
        Stage::MergeTrend,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::MapStations => "map-stations",
            Stage::BuildSearchKeywords => "search-keywords",
            Stage::MapTeaShops => "map-tea-shops",
            Stage::MapReserveStores => "map-reserve-stores",
            Stage::AssembleDemand => "demand",
            Stage::MergeSupply => "supply",
            Stage::BuildTrendIndex => "trend-index",
            Stage::MergeTrend => "trend-merge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = Stage::ALL.iter().map(Stage::name).collect();
                PipelineError::Config(format!("unknown stage '{}' (known: {})", s, known.join(", ")))
            })
    }
}

pub struct Pipeline {
    data: TradeAreaDataManager,
    mapper: TradeAreaMapper,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let schema = SchemaMapping::load(config.paths.schema_mapping.as_deref())?;
        Ok(Pipeline::with_schema(config, schema))
    }

    pub fn with_schema(config: PipelineConfig, schema: SchemaMapping) -> Self {
        let transformer = CoordinateTransformer::new(config.bounds.geo, config.bounds.tm);
        let mapper = TradeAreaMapper::new(transformer, &config.matching);
        Pipeline {
            data: TradeAreaDataManager::new(config, schema),
            mapper,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        self.data.config()
    }

    pub fn run(&self, stage: Stage) -> Result<()> {
        info!("▶ [{}] 시작 (data_dir: {})", stage, self.config().paths.data_dir.display());
        let started = Instant::now();
        match stage {
            Stage::MapStations => {
                self.map_stations()?;
            }
            Stage::BuildSearchKeywords => {
                self.build_search_keywords()?;
            }
            Stage::MapTeaShops => {
                self.map_tea_shops()?;
            }
            Stage::MapReserveStores => {
                self.map_reserve_stores()?;
            }
            Stage::AssembleDemand => {
                self.assemble_demand_panel()?;
            }
            Stage::MergeSupply => {
                self.merge_supply()?;
            }
            Stage::BuildTrendIndex => {
                self.build_trend_index()?;
            }
            Stage::MergeTrend => {
                self.merge_trend()?;
            }
        }
        info!("✅ [{}] 완료 ({:.1}s)", stage, started.elapsed().as_secs_f64());
        Ok(())
    }

    /// 앞 단계가 실패하면 거기서 멈춘다.
    pub fn run_stages(&self, stages: &[Stage]) -> Result<()> {
        for stage in stages {
            if let Err(e) = self.run(*stage) {
                error!("❌ [{}] 실패: {}", stage, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// 상권 센트로이드 → 최근접 지하철역
    pub fn map_stations(&self) -> Result<StationMappingOutcome> {
        let files = &self.config().files;
        let areas = self.data.load_trade_areas(EXTERNAL_INPUT)?;

        let station_names = extract_station_names(areas.iter().map(|a| a.name.as_str()));
        info!("🚇 상권명에서 역명 {}개 추출", station_names.len());
        if station_names.is_empty() {
            return Err(PipelineError::StationLookup(format!(
                "{} 의 상권명에서 역명을 찾지 못했습니다",
                files.trade_areas
            )));
        }

        let cache = StationCache::new(
            self.config().resolve(&files.station_cache),
            self.config().station_cache.max_age_days,
        );
        let now = Local::now();
        let stations = match cache.status(&station_names, now)? {
            CacheStatus::Fresh => {
                let cached = cache.load()?;
                info!("📦 캐시 로드: {}개 역 좌표 ← {}", cached.len(), cache.cache_path().display());
                cached
            }
            _ => {
                let lookup_path = self
                    .config()
                    .require_input(&files.station_lookup, EXTERNAL_INPUT)?;
                let locator = TableStationLocator::from_csv(&lookup_path)?;
                cache.load_or_collect_at(&station_names, &locator, now)?
            }
        };

        let mut outcome = self.mapper.map_trade_areas_to_stations(&areas, &stations)?;
        self.data.write_table(&files.station_map, &mut outcome.mapped)?;
        Ok(outcome)
    }

    /// 행정동 / 최근접역 / 랜드마크 × 찻집 키워드 검색어
    pub fn build_search_keywords(&self) -> Result<Vec<SearchQuery>> {
        let files = &self.config().files;
        let df = self
            .data
            .read_table(&files.station_map, Stage::MapStations.name())?;
        let sources = query_sources_from_frame(&df, &files.station_map)?;
        let queries = build_search_queries(&sources);
        self.data.write_records(&files.search_keywords, &queries)?;
        Ok(queries)
    }

    pub fn map_tea_shops(&self) -> Result<PoiMappingOutcome> {
        let files = &self.config().files;
        self.map_points(&files.tea_shops, &files.tea_shops_mapped, &files.tea_shop_count, TEA_SHOP_COUNT)
    }

    pub fn map_reserve_stores(&self) -> Result<PoiMappingOutcome> {
        let files = &self.config().files;
        self.map_points(
            &files.reserve_stores,
            &files.reserve_mapped,
            &files.reserve_count,
            RESERVE_STORE_COUNT,
        )
    }

    fn map_points(
        &self,
        input: &str,
        mapped_output: &str,
        count_output: &str,
        count_column: &str,
    ) -> Result<PoiMappingOutcome> {
        let areas = self.data.load_trade_areas(EXTERNAL_INPUT)?;
        let points = self.data.read_source("points_of_interest", input, EXTERNAL_INPUT)?;
        info!("📍 {}: {}개 지점 / 상권 {}개", input, points.height(), areas.len());

        let mut outcome = self
            .mapper
            .map_points_to_trade_areas(&points, input, &areas, count_column)?;
        if outcome.dropped_rows > 0 {
            warn!("{}: 좌표 문제로 {}행 제외", input, outcome.dropped_rows);
        }
        self.data.write_table(mapped_output, &mut outcome.mapped)?;
        self.data.write_table(count_output, &mut outcome.counts)?;
        Ok(outcome)
    }

    /// 매출 패널에 소득·유동·상주·직장 인구·아파트·집객시설을 차례로 붙인다.
    pub fn assemble_demand_panel(&self) -> Result<DataFrame> {
        let files = &self.config().files;
        let sales = self.data.read_source("sales", &files.sales, EXTERNAL_INPUT)?;
        let mut merger = PanelMerger::new(&files.sales, sales)?;

        // 인구/소득은 결측 유지, 아파트·집객시설 개수는 0 으로 채운다
        let sources = [
            ("income", &files.income, false),
            ("floating_pop", &files.floating_pop, false),
            ("living_pop", &files.living_pop, false),
            ("working_pop", &files.working_pop, false),
            ("apt", &files.apt, true),
            ("facilities", &files.facilities, true),
        ];
        for (source, file_name, counts) in sources {
            let right = self.data.read_source(source, file_name, EXTERNAL_INPUT)?;
            let mut step = MergeStep::new(file_name, JoinGrain::Panel);
            if counts {
                step = step.zero_fill_added(COUNT_SUFFIX);
            }
            merger.merge_step(right, &step)?;
        }

        let unmatched: Vec<&str> = merger
            .reports()
            .iter()
            .filter(|r| r.matched_rows == 0)
            .map(|r| r.step.as_str())
            .collect();
        if !unmatched.is_empty() {
            warn!("수요 패널: 한 행도 매칭되지 않은 테이블 {:?}", unmatched);
        }

        let mut panel = merger.into_master();
        self.data.write_table(&files.demand_merge, &mut panel)?;
        Ok(panel)
    }

    /// 수요 패널 + 카페 점포수 / 찻집 수 / 리저브 수 + 조합지표
    pub fn merge_supply(&self) -> Result<DataFrame> {
        let config = self.config();
        let files = &config.files;
        let demand = self
            .data
            .read_source("demand_panel", &files.demand_merge, Stage::AssembleDemand.name())?;
        let mut merger = PanelMerger::new(&files.demand_merge, demand)?;

        let competitor = self.data.read_source("competitor", &files.competitor, EXTERNAL_INPUT)?;
        let step = self
            .competitor_step(&competitor, &files.competitor)
            .rename("점포_수", CAFE_STORE_COUNT)
            .columns(&[CAFE_STORE_COUNT])
            .zero_fill(&[CAFE_STORE_COUNT]);
        merger.merge_step(competitor, &step)?;

        let tea = self
            .data
            .read_source("poi_count", &files.tea_shop_count, Stage::MapTeaShops.name())?;
        let step = MergeStep::new(&files.tea_shop_count, JoinGrain::CrossSection)
            .columns(&[TEA_SHOP_COUNT])
            .zero_fill(&[TEA_SHOP_COUNT]);
        merger.merge_step(tea, &step)?;

        let reserve = self
            .data
            .read_source("poi_count", &files.reserve_count, Stage::MapReserveStores.name())?;
        let step = MergeStep::new(&files.reserve_count, JoinGrain::CrossSection)
            .columns(&[RESERVE_STORE_COUNT])
            .zero_fill(&[RESERVE_STORE_COUNT]);
        merger.merge_step(reserve, &step)?;

        let mut panel = merger.into_master();
        let indicators = default_ratio_indicators();
        add_ratio_indicators(&mut panel, &files.demand_supply_merge, &indicators)?;
        self.data.write_table(&files.demand_supply_merge, &mut panel)?;

        let mut composite = indicator_table(&panel, &[TEA_SHOP_COUNT], &indicators)?;
        self.data.write_table(&files.composite_indicators, &mut composite)?;
        Ok(panel)
    }

    /// 검색지수 + 카페 개업률 + 유동인구 성장률
    pub fn build_trend_index(&self) -> Result<DataFrame> {
        let files = &self.config().files;
        let trend = self
            .data
            .read_source("search_trend", &files.search_trend, EXTERNAL_INPUT)?;
        let mut merger = PanelMerger::new(&files.search_trend, trend)?;

        let competitor = self.data.read_source("competitor", &files.competitor, EXTERNAL_INPUT)?;
        let step = self
            .competitor_step(&competitor, &files.competitor)
            .rename("개업_율", CAFE_OPEN_RATE)
            .columns(&[CAFE_OPEN_RATE]);
        merger.merge_step(competitor, &step)?;

        let mut supply = self.data.read_source(
            "demand_panel",
            &files.demand_supply_merge,
            Stage::MergeSupply.name(),
        )?;
        add_growth_indicator(&mut supply, &files.demand_supply_merge, TOTAL_FLOATING_POP, FLOATING_POP_GROWTH)?;
        let growth = supply.select([QUARTER_KEY, TRADE_AREA_KEY, FLOATING_POP_GROWTH])?;
        merger.merge(growth, JoinGrain::Panel, FLOATING_POP_GROWTH)?;

        let mut index = sort_by_trade_area_and_quarter(&merger.into_master(), &files.trend_index)?;
        self.data.write_table(&files.trend_index, &mut index)?;
        Ok(index)
    }

    pub fn merge_trend(&self) -> Result<DataFrame> {
        let files = &self.config().files;
        let supply = self.data.read_source(
            "demand_panel",
            &files.demand_supply_merge,
            Stage::MergeSupply.name(),
        )?;
        let trend = self
            .data
            .read_source("trend_index", &files.trend_index, Stage::BuildTrendIndex.name())?;

        let mut merger = PanelMerger::new(&files.demand_supply_merge, supply)?;
        merger.merge(trend, JoinGrain::Panel, &files.trend_index)?;

        let mut panel = merger.into_master();
        self.data.write_table(&files.trend_merge, &mut panel)?;
        Ok(panel)
    }

    /// 업종 컬럼이 있으면 카페 업종만 남긴다. 없으면 이미 걸러진 파일로 본다.
    fn competitor_step(&self, competitor: &DataFrame, file_name: &str) -> MergeStep {
        let step = MergeStep::new(file_name, JoinGrain::Panel);
        if competitor.column(SERVICE_CATEGORY).is_ok() {
            step.filter_eq(SERVICE_CATEGORY, &self.config().supply.competitor_category)
        } else {
            debug!("{}: {} 컬럼 없음, 업종 필터 생략", file_name, SERVICE_CATEGORY);
            step
        }
    }
}

/// 상권→역 매핑 결과에서 검색어 생성용 행을 뽑는다.
fn query_sources_from_frame(df: &DataFrame, table: &str) -> Result<Vec<QuerySource>> {
    let codes = i64_values(df, table, TRADE_AREA_KEY)?;
    let names = str_values(df, table, TRADE_AREA_NAME)?;
    let dongs = optional_str_values(df, DONG_NAME, df.height())?;
    let stations = optional_str_values(df, NEAREST_STATION, df.height())?;

    Ok(codes
        .into_iter()
        .zip(names)
        .zip(dongs.into_iter().zip(stations))
        .filter_map(|((code, name), (dong, station))| {
            Some(QuerySource {
                trade_area_code: code?,
                trade_area_name: name.unwrap_or_default(),
                dong,
                nearest_station: station,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>().unwrap(), stage);
        }
        assert!(matches!("nope".parse::<Stage>(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn query_sources_skip_rows_without_code() {
        let df = df!(
            TRADE_AREA_KEY => [Some(1i64), None],
            TRADE_AREA_NAME => ["서울숲길", "x"],
            DONG_NAME => [Some("성수1가1동"), None],
            NEAREST_STATION => [Some("성수역"), None]
        )
        .unwrap();
        let sources = query_sources_from_frame(&df, "station_map").unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].dong.as_deref(), Some("성수1가1동"));
        assert_eq!(sources[0].nearest_station.as_deref(), Some("성수역"));
    }
}
