use chrono::{DateTime, Duration, Local};
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationCoordinate {
    #[serde(rename = "역명")]
    pub name: String,
    #[serde(rename = "역_lon")]
    pub lon: f64,
    #[serde(rename = "역_lat")]
    pub lat: f64,
}

/// 역명 → WGS84 좌표 조회
pub trait StationLocator {
    fn locate(&self, station_name: &str) -> Result<Option<StationCoordinate>>;
}

/// 역 좌표 목록 CSV (역명, 역_lon, 역_lat) 기반 조회
pub struct TableStationLocator {
    stations: HashMap<String, StationCoordinate>,
}

impl TableStationLocator {
    pub fn new(stations: Vec<StationCoordinate>) -> Self {
        let stations = stations.into_iter().map(|s| (s.name.clone(), s)).collect();
        TableStationLocator { stations }
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let stations = read_station_csv(path)?;
        info!("🚇 역 좌표 목록 로드: {} ({}개)", path.display(), stations.len());
        Ok(TableStationLocator::new(stations))
    }
}

impl StationLocator for TableStationLocator {
    fn locate(&self, station_name: &str) -> Result<Option<StationCoordinate>> {
        if let Some(found) = self.stations.get(station_name) {
            return Ok(Some(found.clone()));
        }
        // 목록이 "강남" 처럼 '역' 없이 적혀 있는 경우
        let bare = station_name.trim_end_matches('역');
        Ok(self.stations.get(bare).map(|s| StationCoordinate {
            name: station_name.to_string(),
            lon: s.lon,
            lat: s.lat,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMeta {
    created_at: DateTime<Local>,
    station_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheStatus {
    Fresh,
    Missing,
    Stale(String),
}

/// 역 좌표 캐시. 있으면 읽고, 없거나 무효면 한 번 수집해서 기록한다.
///
/// 무효 조건: 요청한 역명 집합이 기록된 것과 다름, 또는 max_age 초과.
/// 메타 파일이 없는 예전 캐시는 유효한 것으로 본다.
pub struct StationCache {
    cache_path: PathBuf,
    meta_path: PathBuf,
    max_age: Option<Duration>,
}

impl StationCache {
    pub fn new(cache_path: PathBuf, max_age_days: i64) -> Self {
        let meta_path = cache_path.with_extension("meta.json");
        let max_age = (max_age_days > 0).then(|| Duration::days(max_age_days));
        StationCache {
            cache_path,
            meta_path,
            max_age,
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    fn load_meta(&self) -> Result<Option<CacheMeta>> {
        if !self.meta_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.meta_path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn status(&self, station_names: &[String], now: DateTime<Local>) -> Result<CacheStatus> {
        if !self.cache_path.exists() {
            return Ok(CacheStatus::Missing);
        }
        let Some(meta) = self.load_meta()? else {
            return Ok(CacheStatus::Fresh);
        };

        if let Some(max_age) = self.max_age {
            let age = now.signed_duration_since(meta.created_at);
            if age > max_age {
                return Ok(CacheStatus::Stale(format!(
                    "생성 후 {}일 경과 (최대 {}일)",
                    age.num_days(),
                    max_age.num_days()
                )));
            }
        }

        let requested: BTreeSet<&str> = station_names.iter().map(String::as_str).collect();
        let recorded: BTreeSet<&str> = meta.station_names.iter().map(String::as_str).collect();
        if requested != recorded {
            let added = requested.difference(&recorded).count();
            let removed = recorded.difference(&requested).count();
            return Ok(CacheStatus::Stale(format!(
                "역명 목록 변경 (추가 {}개, 제거 {}개)",
                added, removed
            )));
        }
        Ok(CacheStatus::Fresh)
    }

    pub fn load(&self) -> Result<Vec<StationCoordinate>> {
        read_station_csv(&self.cache_path)
    }

    pub fn store(
        &self,
        stations: &[StationCoordinate],
        station_names: &[String],
        now: DateTime<Local>,
    ) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.cache_path)?;
        file.write_all(&UTF8_BOM)?;
        let mut writer = csv::Writer::from_writer(file);
        for station in stations {
            writer.serialize(station)?;
        }
        writer.flush()?;

        let mut names: Vec<String> = station_names.to_vec();
        names.sort();
        names.dedup();
        let meta = CacheMeta {
            created_at: now,
            station_names: names,
        };
        fs::write(&self.meta_path, serde_json::to_string_pretty(&meta)?)?;
        Ok(())
    }

    pub fn load_or_collect(
        &self,
        station_names: &[String],
        locator: &dyn StationLocator,
    ) -> Result<Vec<StationCoordinate>> {
        self.load_or_collect_at(station_names, locator, Local::now())
    }

    pub fn load_or_collect_at(
        &self,
        station_names: &[String],
        locator: &dyn StationLocator,
        now: DateTime<Local>,
    ) -> Result<Vec<StationCoordinate>> {
        match self.status(station_names, now)? {
            CacheStatus::Fresh => {
                let cached = self.load()?;
                info!(
                    "📦 캐시 로드: {}개 역 좌표 (재수집 생략) ← {}",
                    cached.len(),
                    self.cache_path.display()
                );
                return Ok(cached);
            }
            CacheStatus::Missing => {
                info!("🚇 역 좌표 캐시 없음: {}개 역 좌표 수집", station_names.len());
            }
            CacheStatus::Stale(reason) => {
                warn!("역 좌표 캐시 무효 ({}): 다시 수집합니다.", reason);
            }
        }

        let mut stations = Vec::with_capacity(station_names.len());
        for (i, name) in station_names.iter().enumerate() {
            match locator.locate(name) {
                Ok(Some(station)) => stations.push(station),
                Ok(None) => warn!("좌표 없음: {}", name),
                Err(e) => warn!("역 좌표 조회 오류 ({}): {}", name, e),
            }
            if (i + 1) % 50 == 0 {
                debug!("{}/{} 완료...", i + 1, station_names.len());
            }
        }

        if stations.is_empty() {
            return Err(PipelineError::StationLookup(format!(
                "{}개 역명 중 좌표를 찾은 역이 없습니다",
                station_names.len()
            )));
        }

        self.store(&stations, station_names, now)?;
        info!(
            "✅ {}개 역 좌표 수집 완료 → {}",
            stations.len(),
            self.cache_path.display()
        );
        Ok(stations)
    }
}

fn read_station_csv(path: &Path) -> Result<Vec<StationCoordinate>> {
    let bytes = fs::read(path)?;
    let body = bytes.strip_prefix(&UTF8_BOM[..]).unwrap_or(&bytes[..]);
    let mut reader = csv::Reader::from_reader(body);
    let mut stations = Vec::new();
    for record in reader.deserialize() {
        let station: StationCoordinate = record?;
        stations.push(station);
    }
    Ok(stations)
}
