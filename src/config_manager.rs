use anyhow::{anyhow, Result};
use configparser::ini::Ini;
use log::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinate_transformer::{GeoBounds, TmBounds};
use crate::error::PipelineError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub files: FileNames,
    pub matching: MatchingConfig,
    pub bounds: BoundsConfig,
    pub station_cache: StationCacheConfig,
    pub supply: SupplyConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    /// 비어 있으면 내장 스키마 매핑 사용
    pub schema_mapping: Option<PathBuf>,
}

/// data_dir 기준 상대 파일명
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileNames {
    pub trade_areas: String,
    pub station_lookup: String,
    pub station_cache: String,
    pub station_map: String,
    pub search_keywords: String,
    pub tea_shops: String,
    pub tea_shops_mapped: String,
    pub tea_shop_count: String,
    pub reserve_stores: String,
    pub reserve_mapped: String,
    pub reserve_count: String,
    pub sales: String,
    pub income: String,
    pub floating_pop: String,
    pub living_pop: String,
    pub working_pop: String,
    pub apt: String,
    pub facilities: String,
    pub demand_merge: String,
    pub competitor: String,
    pub demand_supply_merge: String,
    pub composite_indicators: String,
    pub search_trend: String,
    pub trend_index: String,
    pub trend_merge: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchingConfig {
    pub near_threshold_m: f64,
    pub far_threshold_m: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoundsConfig {
    pub geo: GeoBounds,
    pub tm: TmBounds,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StationCacheConfig {
    /// 0 이면 기간 만료 검사 안 함
    pub max_age_days: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupplyConfig {
    pub competitor_category: String,
}

impl Default for FileNames {
    fn default() -> Self {
        FileNames {
            trade_areas: String::from("to_map.csv"),
            station_lookup: String::from("station_lookup.csv"),
            station_cache: String::from("station_coords.csv"),
            station_map: String::from("to_map_with_station.csv"),
            search_keywords: String::from("search_keywords.csv"),
            tea_shops: String::from("tea_shops_list.csv"),
            tea_shops_mapped: String::from("tea_shops_mapped.csv"),
            tea_shop_count: String::from("tea_shop_count.csv"),
            reserve_stores: String::from("starbucks_reserve.csv"),
            reserve_mapped: String::from("starbucks_reserve_mapped.csv"),
            reserve_count: String::from("starbucks_reserve_count.csv"),
            sales: String::from("y_final.csv"),
            income: String::from("income.csv"),
            floating_pop: String::from("floating_pop.csv"),
            living_pop: String::from("living_pop.csv"),
            working_pop: String::from("working_pop.csv"),
            apt: String::from("apt.csv"),
            facilities: String::from("facilities.csv"),
            demand_merge: String::from("y_demand_merge.csv"),
            competitor: String::from("competitor.csv"),
            demand_supply_merge: String::from("y_demand_supply_merge.csv"),
            composite_indicators: String::from("composite_indicators.csv"),
            search_trend: String::from("search_trend_index.csv"),
            trend_index: String::from("trend_index.csv"),
            trend_merge: String::from("y_demand_supply_trend_merge.csv"),
        }
    }
}

impl FileNames {
    fn entries(&self) -> Vec<(&'static str, &String)> {
        vec![
            ("trade_areas", &self.trade_areas),
            ("station_lookup", &self.station_lookup),
            ("station_cache", &self.station_cache),
            ("station_map", &self.station_map),
            ("search_keywords", &self.search_keywords),
            ("tea_shops", &self.tea_shops),
            ("tea_shops_mapped", &self.tea_shops_mapped),
            ("tea_shop_count", &self.tea_shop_count),
            ("reserve_stores", &self.reserve_stores),
            ("reserve_mapped", &self.reserve_mapped),
            ("reserve_count", &self.reserve_count),
            ("sales", &self.sales),
            ("income", &self.income),
            ("floating_pop", &self.floating_pop),
            ("living_pop", &self.living_pop),
            ("working_pop", &self.working_pop),
            ("apt", &self.apt),
            ("facilities", &self.facilities),
            ("demand_merge", &self.demand_merge),
            ("competitor", &self.competitor),
            ("demand_supply_merge", &self.demand_supply_merge),
            ("composite_indicators", &self.composite_indicators),
            ("search_trend", &self.search_trend),
            ("trend_index", &self.trend_index),
            ("trend_merge", &self.trend_merge),
        ]
    }

    fn entries_mut(&mut self) -> Vec<(&'static str, &mut String)> {
        vec![
            ("trade_areas", &mut self.trade_areas),
            ("station_lookup", &mut self.station_lookup),
            ("station_cache", &mut self.station_cache),
            ("station_map", &mut self.station_map),
            ("search_keywords", &mut self.search_keywords),
            ("tea_shops", &mut self.tea_shops),
            ("tea_shops_mapped", &mut self.tea_shops_mapped),
            ("tea_shop_count", &mut self.tea_shop_count),
            ("reserve_stores", &mut self.reserve_stores),
            ("reserve_mapped", &mut self.reserve_mapped),
            ("reserve_count", &mut self.reserve_count),
            ("sales", &mut self.sales),
            ("income", &mut self.income),
            ("floating_pop", &mut self.floating_pop),
            ("living_pop", &mut self.living_pop),
            ("working_pop", &mut self.working_pop),
            ("apt", &mut self.apt),
            ("facilities", &mut self.facilities),
            ("demand_merge", &mut self.demand_merge),
            ("competitor", &mut self.competitor),
            ("demand_supply_merge", &mut self.demand_supply_merge),
            ("composite_indicators", &mut self.composite_indicators),
            ("search_trend", &mut self.search_trend),
            ("trend_index", &mut self.trend_index),
            ("trend_merge", &mut self.trend_merge),
        ]
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            paths: PathsConfig {
                data_dir: PathBuf::from("data"),
                schema_mapping: None,
            },
            files: FileNames::default(),
            matching: MatchingConfig {
                near_threshold_m: 500.0,
                far_threshold_m: 1000.0,
            },
            bounds: BoundsConfig {
                geo: GeoBounds::seoul_metropolitan(),
                tm: TmBounds::seoul_metropolitan(),
            },
            station_cache: StationCacheConfig { max_age_days: 0 },
            supply: SupplyConfig {
                competitor_category: String::from("커피-음료"),
            },
        }
    }
}

impl PipelineConfig {
    /// 작업 디렉토리에 의존하지 않고 항상 data_dir 기준으로 경로를 만든다.
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.paths.data_dir.join(file_name)
    }

    /// 입력 파일이 없으면 해당 파일을 만들어야 하는 단계를 포함한 에러를 돌려준다.
    pub fn require_input(&self, file_name: &str, stage: &str) -> Result<PathBuf, PipelineError> {
        let path = self.resolve(file_name);
        if !path.is_file() {
            return Err(PipelineError::MissingFile {
                path,
                stage: stage.to_string(),
            });
        }
        Ok(path)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.paths.data_dir = data_dir.into();
        self
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    pub config: PipelineConfig,
}

impl ConfigManager {
    pub fn new(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        let mut manager = ConfigManager {
            config_path,
            config: PipelineConfig::default(),
        };

        if manager.config_path.exists() {
            manager.load()?;
        } else {
            manager.create_default()?;
            manager.save()?;
        }

        Ok(manager)
    }

    pub fn load(&mut self) -> Result<()> {
        let config_str = fs::read_to_string(&self.config_path)?;
        let mut config_ini = Ini::new();
        config_ini
            .read(config_str)
            .map_err(|e| anyhow!("Failed to read config string: {}", e))?;

        let mut config = PipelineConfig::default();

        if let Some(data_dir) = config_ini.get("paths", "data_dir") {
            config.paths.data_dir = PathBuf::from(data_dir);
        }
        if let Some(mapping) = config_ini.get("paths", "schema_mapping") {
            let mapping = mapping.trim();
            if !mapping.is_empty() {
                config.paths.schema_mapping = Some(PathBuf::from(mapping));
            }
        }

        for (key, value) in config.files.entries_mut() {
            if let Some(name) = config_ini.get("files", key) {
                *value = name;
            }
        }

        config.matching.near_threshold_m =
            read_f64(&config_ini, "matching", "near_threshold_m", config.matching.near_threshold_m)?;
        config.matching.far_threshold_m =
            read_f64(&config_ini, "matching", "far_threshold_m", config.matching.far_threshold_m)?;

        let geo = &mut config.bounds.geo;
        geo.min_lon = read_f64(&config_ini, "bounds", "min_lon", geo.min_lon)?;
        geo.max_lon = read_f64(&config_ini, "bounds", "max_lon", geo.max_lon)?;
        geo.min_lat = read_f64(&config_ini, "bounds", "min_lat", geo.min_lat)?;
        geo.max_lat = read_f64(&config_ini, "bounds", "max_lat", geo.max_lat)?;
        let tm = &mut config.bounds.tm;
        tm.min_x = read_f64(&config_ini, "bounds", "min_x", tm.min_x)?;
        tm.max_x = read_f64(&config_ini, "bounds", "max_x", tm.max_x)?;
        tm.min_y = read_f64(&config_ini, "bounds", "min_y", tm.min_y)?;
        tm.max_y = read_f64(&config_ini, "bounds", "max_y", tm.max_y)?;

        if let Some(days) = config_ini.get("station_cache", "max_age_days") {
            config.station_cache.max_age_days = days
                .trim()
                .parse::<i64>()
                .map_err(|e| anyhow!("Invalid station_cache.max_age_days '{}': {}", days, e))?;
        }

        if let Some(category) = config_ini.get("supply", "competitor_category") {
            config.supply.competitor_category = category;
        }

        self.config = config;
        self.validate()?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let mut config_ini = Ini::new();

        config_ini.set(
            "paths",
            "data_dir",
            Some(self.config.paths.data_dir.display().to_string()),
        );
        config_ini.set(
            "paths",
            "schema_mapping",
            Some(
                self.config
                    .paths
                    .schema_mapping
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        );

        for (key, value) in self.config.files.entries() {
            config_ini.set("files", key, Some(value.clone()));
        }

        let matching = &self.config.matching;
        config_ini.set("matching", "near_threshold_m", Some(matching.near_threshold_m.to_string()));
        config_ini.set("matching", "far_threshold_m", Some(matching.far_threshold_m.to_string()));

        let geo = &self.config.bounds.geo;
        let tm = &self.config.bounds.tm;
        config_ini.set("bounds", "min_lon", Some(geo.min_lon.to_string()));
        config_ini.set("bounds", "max_lon", Some(geo.max_lon.to_string()));
        config_ini.set("bounds", "min_lat", Some(geo.min_lat.to_string()));
        config_ini.set("bounds", "max_lat", Some(geo.max_lat.to_string()));
        config_ini.set("bounds", "min_x", Some(tm.min_x.to_string()));
        config_ini.set("bounds", "max_x", Some(tm.max_x.to_string()));
        config_ini.set("bounds", "min_y", Some(tm.min_y.to_string()));
        config_ini.set("bounds", "max_y", Some(tm.max_y.to_string()));

        config_ini.set(
            "station_cache",
            "max_age_days",
            Some(self.config.station_cache.max_age_days.to_string()),
        );
        config_ini.set(
            "supply",
            "competitor_category",
            Some(self.config.supply.competitor_category.clone()),
        );

        config_ini
            .write(&self.config_path)
            .map_err(|e| anyhow!("Failed to write config to file: {}", e))?;
        Ok(())
    }

    pub fn create_default(&mut self) -> Result<()> {
        self.config = PipelineConfig::default();
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }
        info!(
            "{} 파일이 생성되었습니다. data_dir 값을 확인/수정한 후 다시 실행하세요.",
            self.config_path.display()
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let matching = &self.config.matching;
        if matching.near_threshold_m <= 0.0 || matching.far_threshold_m < matching.near_threshold_m {
            return Err(anyhow!(
                "near_threshold_m({})와 far_threshold_m({}) 값이 올바르지 않습니다.",
                matching.near_threshold_m,
                matching.far_threshold_m
            ));
        }
        let geo = &self.config.bounds.geo;
        let tm = &self.config.bounds.tm;
        if geo.min_lon >= geo.max_lon || geo.min_lat >= geo.max_lat || tm.min_x >= tm.max_x || tm.min_y >= tm.max_y {
            return Err(anyhow!("{}의 [bounds] 범위가 비어 있습니다.", self.config_path.display()));
        }
        if !self.config.paths.data_dir.exists() {
            warn!(
                "data_dir {} 가 존재하지 않습니다.",
                self.config.paths.data_dir.display()
            );
        }
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

fn read_f64(ini: &Ini, section: &str, key: &str, default: f64) -> Result<f64> {
    match ini.get(section, key) {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|e| anyhow!("Invalid {}.{} '{}': {}", section, key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_file_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.ini");
        let manager = ConfigManager::new(&path).unwrap();
        assert!(path.exists());
        assert_eq!(manager.config.files.sales, "y_final.csv");
        assert_eq!(manager.config.matching.far_threshold_m, 1000.0);
    }

    #[test]
    fn loads_overrides_and_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.ini");
        fs::write(
            &path,
            "[paths]\ndata_dir = /srv/aicha\n\n[files]\nsales = sales_panel.csv\n\n[matching]\nfar_threshold_m = 1500\n\n[station_cache]\nmax_age_days = 30\n",
        )
        .unwrap();

        let manager = ConfigManager::new(&path).unwrap();
        let config = &manager.config;
        assert_eq!(config.paths.data_dir, PathBuf::from("/srv/aicha"));
        assert_eq!(config.files.sales, "sales_panel.csv");
        assert_eq!(config.files.income, "income.csv");
        assert_eq!(config.matching.far_threshold_m, 1500.0);
        assert_eq!(config.matching.near_threshold_m, 500.0);
        assert_eq!(config.station_cache.max_age_days, 30);
        assert_eq!(config.resolve("x.csv"), PathBuf::from("/srv/aicha/x.csv"));
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.ini");
        let mut manager = ConfigManager::new(&path).unwrap();
        manager.config.files.competitor = String::from("comp_v2.csv");
        manager.config.paths.schema_mapping = Some(PathBuf::from("mapping.json"));
        manager.save().unwrap();

        let reloaded = ConfigManager::new(&path).unwrap();
        assert_eq!(reloaded.config.files.competitor, "comp_v2.csv");
        assert_eq!(reloaded.config.paths.schema_mapping, Some(PathBuf::from("mapping.json")));
        assert_eq!(reloaded.config.supply.competitor_category, "커피-음료");
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.ini");
        fs::write(&path, "[matching]\nnear_threshold_m = 2000\nfar_threshold_m = 1000\n").unwrap();
        assert!(ConfigManager::new(&path).is_err());
    }

    #[test]
    fn require_input_names_the_stage() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::default().with_data_dir(dir.path());
        match config.require_input("tea_shop_count.csv", "map-tea-shops") {
            Err(PipelineError::MissingFile { path, stage }) => {
                assert!(path.ends_with("tea_shop_count.csv"));
                assert_eq!(stage, "map-tea-shops");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
