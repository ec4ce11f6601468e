use polars::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

use trade_area_pipeline_lib::coordinate_transformer::CoordinateTransformer;
use trade_area_pipeline_lib::schema_mapping::SchemaMapping;
use trade_area_pipeline_lib::trade_area_data_manager::{f64_values, i64_values, str_values, TradeAreaDataManager};
use trade_area_pipeline_lib::{Pipeline, PipelineConfig, PipelineError, Stage};

// (코드, 상권명, 행정동, lon, lat)
const AREAS: [(i64, &str, &str, f64, f64); 3] = [
    (3110001, "성수역 3번", "성수1가1동", 127.0557, 37.5446),
    (3110002, "강남역", "역삼1동", 127.0276, 37.4979),
    (3110003, "서촌(세종마을)", "청운효자동", 126.9700, 37.5790),
];

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

fn seed_inputs(dir: &Path) {
    let transformer = CoordinateTransformer::default();
    let mut to_map = String::from("상권_코드,상권_코드_명,행정동_코드_명,자치구_코드_명,엑스좌표_값,와이좌표_값\n");
    for (code, name, dong, lon, lat) in AREAS {
        let tm = transformer.wgs84_to_tm(lon, lat).unwrap();
        to_map.push_str(&format!("{},{},{},테스트구,{},{}\n", code, name, dong, tm.x, tm.y));
    }
    // 같은 상권 코드 중복 행은 무시된다
    to_map.push_str("3110002,강남역 중복,역삼1동,테스트구,0,0\n");
    write(dir, "to_map.csv", &to_map);

    write(
        dir,
        "station_lookup.csv",
        "역명,역_lon,역_lat\n성수,127.0560,37.5445\n강남역,127.0276,37.4980\n",
    );
    write(
        dir,
        "tea_shops_list.csv",
        "상호명,lon,lat\n성수찻집,127.0561,37.5441\n성수티룸,127.0549,37.5452\n강남다원,127.0281,37.4985\n좌표없음,,\n",
    );
    write(dir, "starbucks_reserve.csv", "매장명,lon,lat\n성수리저브,127.0552,37.5448\n");

    write(
        dir,
        "y_final.csv",
        "STDR_YYQU_CD,TRDAR_CD,TRDAR_CD_NM,THSMON_SELNG_AMT\n\
         20233,3110001,성수역 3번,1000\n\
         20234,3110001,성수역 3번,1200\n\
         20233,3110002,강남역,3000\n\
         20234,3110002,강남역,3100\n\
         20233,3110003,서촌(세종마을),500\n\
         20234,3110003,서촌(세종마을),450\n",
    );
    write(
        dir,
        "income.csv",
        "STDR_YYQU_CD,TRDAR_CD,TRDAR_CD_NM,LSR_EXPNDTR_TOTAMT\n\
         20233,3110001,성수역 3번,300\n\
         20233,3110001,성수역 3번,999\n\
         20234,3110001,성수역 3번,330\n\
         20233,3110002,강남역,800\n\
         20234,3110002,강남역,820\n\
         20233,3110003,서촌(세종마을),90\n\
         20234,3110003,서촌(세종마을),80\n",
    );
    write(
        dir,
        "floating_pop.csv",
        "STDR_YYQU_CD,TRDAR_CD,TOT_FLPOP_CO,FML_FLPOP_CO\n\
         20233,3110001,1000,600\n\
         20234,3110001,1100,650\n\
         20233,3110002,5000,2600\n\
         20234,3110002,4000,2100\n\
         20234,3110003,200,120\n",
    );
    write(
        dir,
        "living_pop.csv",
        "STDR_YYQU_CD,TRDAR_CD,TOT_REPOP_CO,FML_REPOP_CO\n\
         20233,3110001,400,210\n\
         20234,3110001,410,215\n\
         20233,3110002,900,450\n\
         20234,3110002,910,460\n\
         20233,3110003,300,160\n\
         20234,3110003,305,161\n",
    );
    write(
        dir,
        "working_pop.csv",
        "STDR_YYQU_CD,TRDAR_CD,TOT_WRC_POPLTN_CO\n20233,3110001,700\n20234,3110002,2000\n",
    );
    write(dir, "apt.csv", "STDR_YYQU_CD,TRDAR_CD,APT_HSMP_CO\n20233,3110001,2\n");
    write(dir, "facilities.csv", "STDR_YYQU_CD,TRDAR_CD,VIATR_FCLTY_CO\n20234,3110003,5\n");
    write(
        dir,
        "competitor.csv",
        "STDR_YYQU_CD,TRDAR_CD,SVC_INDUTY_CD_NM,STOR_CO,OPBIZ_RT\n\
         20233,3110001,커피-음료,11,2.5\n\
         20233,3110001,한식음식점,40,1.0\n\
         20234,3110001,커피-음료,14,3.0\n\
         20233,3110002,커피-음료,30,1.5\n\
         20234,3110002,커피-음료,29,0.0\n\
         20234,3110003,커피-음료,2,0.0\n",
    );
    write(
        dir,
        "search_trend_index.csv",
        "기준_년분기_코드,상권_코드,카페_검색지수,검색량_성장률\n\
         20234,3110002,70.0,5.0\n\
         20233,3110002,66.0,\n\
         20234,3110001,55.0,10.0\n\
         20233,3110001,50.0,\n",
    );
}

fn config_for(dir: &Path) -> PipelineConfig {
    PipelineConfig::default().with_data_dir(dir)
}

fn read_output(dir: &Path, file_name: &str) -> DataFrame {
    let manager = TradeAreaDataManager::new(config_for(dir), SchemaMapping::default());
    manager.read_table(file_name, "test").unwrap()
}

/// (상권, 분기) 행의 값. 행 순서에 의존하지 않는다.
fn value_at(df: &DataFrame, code: i64, quarter: i64, column: &str) -> Option<f64> {
    let codes = i64_values(df, "output", "상권_코드").unwrap();
    let quarters = i64_values(df, "output", "기준_년분기_코드").unwrap();
    let values = f64_values(df, "output", column).unwrap();
    let rows: Vec<usize> = (0..df.height())
        .filter(|&i| codes[i] == Some(code) && quarters[i] == Some(quarter))
        .collect();
    assert_eq!(rows.len(), 1, "({}, {}) 행이 정확히 하나여야 함", code, quarter);
    values[rows[0]]
}

#[test]
fn all_stages_produce_linked_outputs() {
    let dir = tempdir().unwrap();
    seed_inputs(dir.path());

    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
    pipeline.run_stages(&Stage::ALL).unwrap();

    // 상권 → 최근접 역
    let stations = read_output(dir.path(), "to_map_with_station.csv");
    assert_eq!(stations.height(), 3);
    let names = str_values(&stations, "stations", "최근접_역명").unwrap();
    assert_eq!(names[0].as_deref(), Some("성수역"));
    assert_eq!(names[1].as_deref(), Some("강남역"));
    assert!(dir.path().join("station_coords.csv").exists());
    assert!(dir.path().join("station_coords.meta.json").exists());

    // 검색어
    let keywords = read_output(dir.path(), "search_keywords.csv");
    let kinds = str_values(&keywords, "keywords", "검색어_유형").unwrap();
    assert!(kinds.iter().any(|k| k.as_deref() == Some("랜드마크")));
    assert!(kinds.iter().any(|k| k.as_deref() == Some("지하철역")));

    // 찻집 매핑: 좌표 없는 행은 빠지고 모든 상권이 집계에 나온다
    let mapped = read_output(dir.path(), "tea_shops_mapped.csv");
    assert_eq!(mapped.height(), 3);
    let counts = read_output(dir.path(), "tea_shop_count.csv");
    assert_eq!(counts.height(), 3);
    let tea = i64_values(&counts, "counts", "찻집_수").unwrap();
    assert_eq!(tea, vec![Some(2), Some(1), Some(0)]);

    // 수요 패널은 매출 행 수를 유지한다 (income 의 중복 키는 첫 행)
    let demand = read_output(dir.path(), "y_demand_merge.csv");
    assert_eq!(demand.height(), 6);
    assert_eq!(value_at(&demand, 3110001, 20233, "여가_지출_총금액"), Some(300.0));
    assert_eq!(value_at(&demand, 3110003, 20233, "총_유동인구_수"), None);
    // 아파트·집객시설 개수는 매칭이 없으면 0, 인구는 결측 유지
    assert_eq!(value_at(&demand, 3110001, 20233, "아파트_단지_수"), Some(2.0));
    assert_eq!(value_at(&demand, 3110002, 20233, "아파트_단지_수"), Some(0.0));
    assert_eq!(value_at(&demand, 3110003, 20234, "집객시설_수"), Some(5.0));
    assert_eq!(value_at(&demand, 3110001, 20233, "집객시설_수"), Some(0.0));
    assert_eq!(value_at(&demand, 3110003, 20233, "총_직장_인구_수"), None);

    // 공급 + 조합지표
    let supply = read_output(dir.path(), "y_demand_supply_merge.csv");
    assert_eq!(supply.height(), 6);
    assert_eq!(value_at(&supply, 3110001, 20233, "카페음료_점포수"), Some(11.0));
    assert_eq!(value_at(&supply, 3110003, 20234, "찻집_수"), Some(0.0));
    assert_eq!(value_at(&supply, 3110001, 20234, "스타벅스_리저브_수"), Some(1.0));
    let gap = value_at(&supply, 3110001, 20233, "공급갭_지수").unwrap();
    assert!((gap - 11.0 / 3.0).abs() < 1e-9);
    // 찻집이 없으면 분모는 1
    assert_eq!(value_at(&supply, 3110003, 20234, "공급갭_지수"), Some(2.0));
    // 커피-음료 행이 없는 분기는 점포 0 개
    assert_eq!(value_at(&supply, 3110003, 20233, "카페음료_점포수"), Some(0.0));
    assert_eq!(value_at(&supply, 3110003, 20233, "공급갭_지수"), Some(0.0));

    let composite = read_output(dir.path(), "composite_indicators.csv");
    assert_eq!(composite.height(), 6);
    assert_eq!(composite.width(), 8);

    // 트렌드 지수: 상권, 분기 순 정렬 + 성장률
    let trend = read_output(dir.path(), "trend_index.csv");
    let codes = i64_values(&trend, "trend", "상권_코드").unwrap();
    let quarters = i64_values(&trend, "trend", "기준_년분기_코드").unwrap();
    assert_eq!(codes, vec![Some(3110001), Some(3110001), Some(3110002), Some(3110002)]);
    assert_eq!(quarters, vec![Some(20233), Some(20234), Some(20233), Some(20234)]);
    assert_eq!(value_at(&trend, 3110001, 20233, "유동인구_성장률"), None);
    let growth = value_at(&trend, 3110001, 20234, "유동인구_성장률").unwrap();
    assert!((growth - 10.0).abs() < 1e-9);
    let decline = value_at(&trend, 3110002, 20234, "유동인구_성장률").unwrap();
    assert!((decline + 20.0).abs() < 1e-9);
    assert_eq!(value_at(&trend, 3110001, 20234, "카페_개업률"), Some(3.0));

    let merged = read_output(dir.path(), "y_demand_supply_trend_merge.csv");
    assert_eq!(merged.height(), 6);
    assert_eq!(value_at(&merged, 3110002, 20233, "카페_검색지수"), Some(66.0));
    assert_eq!(value_at(&merged, 3110003, 20234, "카페_검색지수"), None);
}

#[test]
fn station_cache_is_reused_without_lookup_file() {
    let dir = tempdir().unwrap();
    seed_inputs(dir.path());
    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
    pipeline.run(Stage::MapStations).unwrap();

    fs::remove_file(dir.path().join("station_lookup.csv")).unwrap();
    let outcome = pipeline.map_stations().unwrap();
    assert_eq!(outcome.mapped.height(), 3);
}

#[test]
fn missing_upstream_output_names_the_producing_stage() {
    let dir = tempdir().unwrap();
    seed_inputs(dir.path());
    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();

    match pipeline.merge_supply() {
        Err(PipelineError::MissingFile { path, stage }) => {
            assert!(path.ends_with("y_demand_merge.csv"));
            assert_eq!(stage, Stage::AssembleDemand.name());
        }
        other => panic!("unexpected: {:?}", other.map(|df| df.height())),
    }
}

#[test]
fn schema_drift_fails_before_joining() {
    let dir = tempdir().unwrap();
    seed_inputs(dir.path());
    write(dir.path(), "income.csv", "QUARTER,AREA,LSR_EXPNDTR_TOTAMT\n20233,3110001,300\n");

    let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
    let err = pipeline.assemble_demand_panel().unwrap_err();
    assert!(matches!(err, PipelineError::Schema { .. }));
    assert!(!dir.path().join("y_demand_merge.csv").exists());
}
