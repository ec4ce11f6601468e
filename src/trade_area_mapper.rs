//! 좌표 → 상권 / 상권 → 지하철역 최근접 매핑. 모든 거리는 TM 미터 기준.

use log::*;
use polars::prelude::*;
use std::collections::HashMap;

use crate::config_manager::MatchingConfig;
use crate::coordinate_transformer::{CoordinateTransformer, GeoPoint};
use crate::error::{CoordinateError, Result};
use crate::schema_mapping::{TRADE_AREA_KEY, TRADE_AREA_NAME};
use crate::search_keyword_builder::QuerySource;
use crate::spatial_matcher::{DistanceDiagnostics, PlanarPoint, SpatialMatcher};
use crate::station_cache::StationCoordinate;
use crate::trade_area_data_manager::{f64_values, TradeArea, DISTRICT_NAME, DONG_NAME};

pub const NEAREST_DISTANCE: &str = "nearest_dist_m";
pub const NEAREST_STATION: &str = "최근접_역명";
pub const NEAREST_STATION_DISTANCE: &str = "최근접_역_거리m";

pub struct PoiMappingOutcome {
    /// 원본 컬럼 + tm_x, tm_y, 상권_코드, 상권_코드_명, nearest_dist_m
    pub mapped: DataFrame,
    /// 모든 상권 1행씩 (매칭 없으면 0)
    pub counts: DataFrame,
    pub diagnostics: DistanceDiagnostics,
    pub dropped_rows: usize,
}

pub struct StationMappingOutcome {
    pub mapped: DataFrame,
    pub query_sources: Vec<QuerySource>,
    pub diagnostics: DistanceDiagnostics,
}

pub struct TradeAreaMapper {
    transformer: CoordinateTransformer,
    near_threshold_m: f64,
    far_threshold_m: f64,
}

impl TradeAreaMapper {
    pub fn new(transformer: CoordinateTransformer, matching: &MatchingConfig) -> Self {
        TradeAreaMapper {
            transformer,
            near_threshold_m: matching.near_threshold_m,
            far_threshold_m: matching.far_threshold_m,
        }
    }

    /// 상권 센트로이드 중 범위 안에 있는 것만 참조점으로 쓴다.
    fn centroids(&self, areas: &[TradeArea]) -> Vec<Option<(PlanarPoint, GeoPoint)>> {
        let mut invalid = 0usize;
        let centroids = areas
            .iter()
            .map(|area| {
                let result = match (area.x, area.y) {
                    (Some(x), Some(y)) => self.transformer.tm_to_wgs84(x, y).map(|geo| (PlanarPoint::new(x, y), geo)),
                    _ => Err(CoordinateError::Missing),
                };
                match result {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        invalid += 1;
                        debug!("상권 {} ({}) 좌표 제외: {}", area.code, area.name, e);
                        None
                    }
                }
            })
            .collect();
        if invalid > 0 {
            warn!("상권 좌표 {}개가 비어 있거나 범위를 벗어나 참조점에서 제외", invalid);
        }
        centroids
    }

    /// WGS84 좌표를 가진 점(찻집 등)을 가장 가까운 상권 센트로이드에 붙이고
    /// 상권별 개수를 센다.
    pub fn map_points_to_trade_areas(
        &self,
        points: &DataFrame,
        table: &str,
        areas: &[TradeArea],
        count_column: &str,
    ) -> Result<PoiMappingOutcome> {
        let centroids = self.centroids(areas);
        let (reference_areas, reference_points): (Vec<usize>, Vec<PlanarPoint>) = centroids
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|(p, _)| (i, p)))
            .unzip();
        let matcher = SpatialMatcher::new(&reference_points, self.near_threshold_m, self.far_threshold_m)?;
        info!(
            "{} 매칭 기준: 상권 센트로이드 {}/{}개",
            table,
            matcher.reference_count(),
            areas.len()
        );

        let lons = f64_values(points, table, "lon")?;
        let lats = f64_values(points, table, "lat")?;
        let projected = self.transformer.wgs84_to_tm_batch(&lons, &lats)?;

        let mut keep = Vec::with_capacity(projected.len());
        let mut queries = Vec::new();
        let mut dropped_rows = 0usize;
        for (row, result) in projected.iter().enumerate() {
            match result {
                Ok(tm) => {
                    keep.push(true);
                    queries.push(PlanarPoint::new(tm.x, tm.y));
                }
                Err(e) => {
                    keep.push(false);
                    dropped_rows += 1;
                    warn!("{} {}행 제외: {}", table, row + 1, e);
                }
            }
        }

        let mut mapped = if dropped_rows > 0 {
            points.filter(&BooleanChunked::from_slice("keep", &keep))?
        } else {
            points.clone()
        };

        let (matches, diagnostics) = matcher.match_points(&queries);
        diagnostics.log(table);

        let mut codes = Vec::with_capacity(matches.len());
        let mut names = Vec::with_capacity(matches.len());
        let mut distances = Vec::with_capacity(matches.len());
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for m in &matches {
            let area = &areas[reference_areas[m.reference_index]];
            codes.push(area.code);
            names.push(area.name.clone());
            distances.push(m.distance_m);
            *counts.entry(area.code).or_insert(0) += 1;
        }

        mapped.with_column(Series::new("tm_x", queries.iter().map(|p| p.x).collect::<Vec<f64>>()))?;
        mapped.with_column(Series::new("tm_y", queries.iter().map(|p| p.y).collect::<Vec<f64>>()))?;
        mapped.with_column(Series::new(TRADE_AREA_KEY, codes))?;
        mapped.with_column(Series::new(TRADE_AREA_NAME, names))?;
        mapped.with_column(Series::new(NEAREST_DISTANCE, distances))?;

        info!(
            "{} 상권별 집계: {}개 상권 중 {}개에 1건 이상 (총 {}건)",
            count_column,
            areas.len(),
            counts.len(),
            matches.len()
        );
        let counts = count_table(areas, &counts, count_column)?;

        Ok(PoiMappingOutcome {
            mapped,
            counts,
            diagnostics,
            dropped_rows,
        })
    }

    /// 상권 센트로이드별 최근접 지하철역
    pub fn map_trade_areas_to_stations(
        &self,
        areas: &[TradeArea],
        stations: &[StationCoordinate],
    ) -> Result<StationMappingOutcome> {
        let mut station_refs = Vec::with_capacity(stations.len());
        let mut station_points = Vec::with_capacity(stations.len());
        for station in stations {
            match self.transformer.wgs84_to_tm(station.lon, station.lat) {
                Ok(tm) => {
                    station_refs.push(station);
                    station_points.push(PlanarPoint::new(tm.x, tm.y));
                }
                Err(e) => warn!("역 {} 좌표 제외: {}", station.name, e),
            }
        }
        let matcher = SpatialMatcher::new(&station_points, self.near_threshold_m, self.far_threshold_m)?;
        info!("역 매칭 기준: {}/{}개 역", matcher.reference_count(), stations.len());

        let centroids = self.centroids(areas);
        let mut lons = Vec::with_capacity(areas.len());
        let mut lats = Vec::with_capacity(areas.len());
        let mut nearest_names: Vec<Option<String>> = Vec::with_capacity(areas.len());
        let mut nearest_distances: Vec<Option<i64>> = Vec::with_capacity(areas.len());
        let mut distances = Vec::new();

        for centroid in &centroids {
            match centroid {
                Some((point, geo)) => {
                    lons.push(Some(geo.lon));
                    lats.push(Some(geo.lat));
                    let (matches, _) = matcher.match_points(std::slice::from_ref(point));
                    match matches.first() {
                        Some(m) => {
                            nearest_names.push(Some(station_refs[m.reference_index].name.clone()));
                            nearest_distances.push(Some(m.distance_m.round() as i64));
                            distances.push(m.distance_m);
                        }
                        None => {
                            nearest_names.push(None);
                            nearest_distances.push(None);
                        }
                    }
                }
                None => {
                    lons.push(None);
                    lats.push(None);
                    nearest_names.push(None);
                    nearest_distances.push(None);
                }
            }
        }

        let diagnostics =
            DistanceDiagnostics::from_distances(&distances, self.near_threshold_m, self.far_threshold_m);
        diagnostics.log("상권→최근접역");

        let query_sources = areas
            .iter()
            .zip(nearest_names.iter())
            .map(|(area, station)| QuerySource {
                trade_area_code: area.code,
                trade_area_name: area.name.clone(),
                dong: area.dong.clone(),
                nearest_station: station.clone(),
            })
            .collect();

        let mapped = DataFrame::new(vec![
            Series::new(TRADE_AREA_KEY, areas.iter().map(|a| a.code).collect::<Vec<i64>>()),
            Series::new(TRADE_AREA_NAME, areas.iter().map(|a| a.name.clone()).collect::<Vec<String>>()),
            Series::new(DONG_NAME, areas.iter().map(|a| a.dong.clone()).collect::<Vec<Option<String>>>()),
            Series::new(DISTRICT_NAME, areas.iter().map(|a| a.district.clone()).collect::<Vec<Option<String>>>()),
            Series::new("lon", lons),
            Series::new("lat", lats),
            Series::new(NEAREST_STATION, nearest_names),
            Series::new(NEAREST_STATION_DISTANCE, nearest_distances),
        ])?;

        Ok(StationMappingOutcome {
            mapped,
            query_sources,
            diagnostics,
        })
    }
}

/// 기준 상권 전체에 대한 개수 테이블 (없으면 0)
pub fn count_table(areas: &[TradeArea], counts: &HashMap<i64, i64>, count_column: &str) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Series::new(TRADE_AREA_KEY, areas.iter().map(|a| a.code).collect::<Vec<i64>>()),
        Series::new(TRADE_AREA_NAME, areas.iter().map(|a| a.name.clone()).collect::<Vec<String>>()),
        Series::new(
            count_column,
            areas
                .iter()
                .map(|a| counts.get(&a.code).copied().unwrap_or(0))
                .collect::<Vec<i64>>(),
        ),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(code: i64, name: &str, lon: f64, lat: f64, transformer: &CoordinateTransformer) -> TradeArea {
        let tm = transformer.wgs84_to_tm(lon, lat).unwrap();
        TradeArea {
            code,
            name: name.to_string(),
            dong: Some(format!("{}동", name)),
            district: Some("성동구".to_string()),
            x: Some(tm.x),
            y: Some(tm.y),
        }
    }

    fn mapper() -> (TradeAreaMapper, Vec<TradeArea>) {
        let transformer = CoordinateTransformer::default();
        let areas = vec![
            area(3110001, "성수", 127.0557, 37.5446, &transformer),
            area(3110002, "강남", 127.0276, 37.4979, &transformer),
            area(3110003, "광화문", 126.9769, 37.5714, &transformer),
        ];
        let matching = MatchingConfig {
            near_threshold_m: 500.0,
            far_threshold_m: 1000.0,
        };
        (TradeAreaMapper::new(transformer, &matching), areas)
    }

    #[test]
    fn points_map_to_nearest_centroid_and_counts_cover_every_area() {
        let (mapper, areas) = mapper();
        let points = df!(
            "상호명" => ["a", "b", "c", "d"],
            "lon" => [Some(127.0560), Some(127.0550), Some(127.0280), None],
            "lat" => [Some(37.5440), Some(37.5450), Some(37.4982), Some(37.5)]
        )
        .unwrap();

        let outcome = mapper
            .map_points_to_trade_areas(&points, "tea_shops", &areas, "찻집_수")
            .unwrap();

        assert_eq!(outcome.dropped_rows, 1);
        assert_eq!(outcome.mapped.height(), 3);
        let codes: Vec<Option<i64>> = outcome.mapped.column(TRADE_AREA_KEY).unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(codes, vec![Some(3110001), Some(3110001), Some(3110002)]);
        let distances = outcome.mapped.column(NEAREST_DISTANCE).unwrap().f64().unwrap();
        assert!(distances.into_iter().flatten().all(|d| d < 200.0));

        assert_eq!(outcome.counts.height(), 3);
        let counts: Vec<Option<i64>> = outcome.counts.column("찻집_수").unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(counts, vec![Some(2), Some(1), Some(0)]);
        assert_eq!(outcome.diagnostics.count, 3);
        assert_eq!(outcome.diagnostics.within_near, 3);
    }

    #[test]
    fn areas_without_coordinates_still_get_zero_counts() {
        let (mapper, mut areas) = mapper();
        areas[2].x = None;
        let points = df!("lon" => [126.9770], "lat" => [37.5713]).unwrap();

        let outcome = mapper
            .map_points_to_trade_areas(&points, "reserve", &areas, "스타벅스_리저브_수")
            .unwrap();
        let counts: Vec<Option<i64>> = outcome
            .counts
            .column("스타벅스_리저브_수")
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        // 광화문 좌표가 없으니 가장 가까운 다른 상권으로 간다
        assert_eq!(counts.iter().flatten().sum::<i64>(), 1);
        assert_eq!(counts[2], Some(0));
        assert!(outcome.diagnostics.beyond_far >= 1);
    }

    #[test]
    fn trade_areas_get_nearest_station_in_meters() {
        let (mapper, areas) = mapper();
        let stations = vec![
            StationCoordinate { name: "성수역".into(), lon: 127.0557, lat: 37.5446 },
            StationCoordinate { name: "강남역".into(), lon: 127.0276, lat: 37.4979 },
            StationCoordinate { name: "잘못된역".into(), lon: 0.0, lat: 0.0 },
        ];

        let outcome = mapper.map_trade_areas_to_stations(&areas, &stations).unwrap();
        let mapped = &outcome.mapped;
        assert_eq!(mapped.height(), 3);

        let names: Vec<Option<&str>> = mapped.column(NEAREST_STATION).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(names, vec![Some("성수역"), Some("강남역"), Some("성수역")]);
        let distances: Vec<Option<i64>> = mapped
            .column(NEAREST_STATION_DISTANCE)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(distances[0], Some(0));
        assert_eq!(distances[1], Some(0));
        assert!(distances[2].unwrap() > 5000);

        let lon = mapped.column("lon").unwrap().f64().unwrap().get(0).unwrap();
        assert!((lon - 127.0557).abs() < 1e-6);
        assert_eq!(outcome.query_sources[1].nearest_station.as_deref(), Some("강남역"));
    }

    #[test]
    fn no_valid_stations_is_an_error() {
        let (mapper, areas) = mapper();
        let stations = vec![StationCoordinate { name: "잘못된역".into(), lon: 0.0, lat: 0.0 }];
        assert!(mapper.map_trade_areas_to_stations(&areas, &stations).is_err());
    }
}
