//! 상권명에서 역명·랜드마크를 뽑아 찻집 검색어 조합을 만든다.

use log::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

pub const TEA_KEYWORDS: [&str; 5] = ["찻집", "티룸", "티하우스", "티카페", "다원"];

// 포함 시 유효 랜드마크 (찻집 검색 맥락에서 의미 있는 장소)
const LANDMARK_INCLUDE: [&str; 19] = [
    "단길", "거리", "마을", "길", "시장", "광장", "공원", "궁", "성곽", "미술관", "박물관", "기념관",
    "수목원", "생태", "호수", "숲", "터미널", "대학교", "캠퍼스",
];

// 포함 시 제외 (검색어로 의미 없는 시설/기관/위치 표현)
const LANDMARK_EXCLUDE: [&str; 26] = [
    "초등학교", "중학교", "고등학교", "어린이공원", "아파트", "맨션", "래미안", "힐스테이트", "자이",
    "푸르지오", "주민센터", "체육센터", "구청", "동사무소", "파출소", "지구대", "경찰서", "소방서",
    "세무서", "은행", "주차장", "우체국", "옆", "앞길", "부근", "근처",
];

lazy_static::lazy_static! {
    static ref STATION_NAME_REGEX: Regex = Regex::new(r"^(.+역)\s*\d*번?$").unwrap();
    static ref BRACKET_REGEX: Regex = Regex::new(r"[(（](.+?)[)）]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryKind {
    #[serde(rename = "행정동")]
    AdministrativeDong,
    #[serde(rename = "지하철역")]
    Station,
    #[serde(rename = "랜드마크")]
    Landmark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(rename = "검색어")]
    pub query: String,
    #[serde(rename = "검색어_유형")]
    pub kind: QueryKind,
    #[serde(rename = "기준_지역")]
    pub base_area: String,
    #[serde(rename = "키워드")]
    pub keyword: String,
    #[serde(rename = "대표_상권코드")]
    pub trade_area_code: i64,
}

/// 검색어 생성에 쓰는 상권 한 줄 (최근접 역 매핑 이후)
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySource {
    pub trade_area_code: i64,
    pub trade_area_name: String,
    pub dong: Option<String>,
    pub nearest_station: Option<String>,
}

/// "강남역 2번" → "강남역". 역명 형태가 아니면 None.
pub fn station_name_of(trade_area_name: &str) -> Option<String> {
    let name = trade_area_name.trim();
    if !name.contains('역') {
        return None;
    }
    STATION_NAME_REGEX
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// 상권명 목록에서 유니크 역명 (정렬)
pub fn extract_station_names<'a>(trade_area_names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let stations: BTreeSet<String> = trade_area_names
        .into_iter()
        .filter_map(station_name_of)
        .collect();
    stations.into_iter().collect()
}

/// 상권명 하나에서 랜드마크 후보
///
/// 괄호 안 내용과 괄호를 뺀 본 이름을 각각 후보로 보고,
/// 제외 키워드가 없고 포함 키워드가 있는 것만 남긴다.
pub fn landmarks_of(trade_area_name: &str) -> Vec<String> {
    let name = trade_area_name.trim();
    if station_name_of(name).is_some() {
        return Vec::new();
    }

    let main = BRACKET_REGEX.replace_all(name, "").trim().to_string();
    let mut candidates = vec![main];
    candidates.extend(
        BRACKET_REGEX
            .captures_iter(name)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string()),
    );

    candidates
        .into_iter()
        .filter(|c| !c.is_empty())
        .filter(|c| !LANDMARK_EXCLUDE.iter().any(|ex| c.contains(ex)))
        .filter(|c| LANDMARK_INCLUDE.iter().any(|inc| c.contains(inc)))
        .collect()
}

pub fn extract_landmarks(sources: &[QuerySource]) -> HashMap<i64, Vec<String>> {
    sources
        .iter()
        .filter_map(|s| {
            let landmarks = landmarks_of(&s.trade_area_name);
            (!landmarks.is_empty()).then_some((s.trade_area_code, landmarks))
        })
        .collect()
}

/// 행정동 / 최근접역 / 랜드마크 × 키워드 조합. 같은 검색어는 처음 한 번만.
pub fn build_search_queries(sources: &[QuerySource]) -> Vec<SearchQuery> {
    let landmark_map = extract_landmarks(sources);
    let total_landmarks: usize = landmark_map.values().map(Vec::len).sum();
    info!(
        "랜드마크 추출: {}개 상권, 총 {}개 후보",
        landmark_map.len(),
        total_landmarks
    );

    let mut queries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |kind: QueryKind, base: &str, keyword: &str, code: i64| {
        let base = base.trim();
        if base.is_empty() {
            return;
        }
        let query = format!("{} {}", base, keyword);
        if seen.insert(query.clone()) {
            queries.push(SearchQuery {
                query,
                kind,
                base_area: base.to_string(),
                keyword: keyword.to_string(),
                trade_area_code: code,
            });
        }
    };

    for source in sources {
        let landmarks = landmark_map.get(&source.trade_area_code);
        for keyword in TEA_KEYWORDS {
            if let Some(dong) = &source.dong {
                push(QueryKind::AdministrativeDong, dong.as_str(), keyword, source.trade_area_code);
            }
            if let Some(station) = &source.nearest_station {
                push(QueryKind::Station, station.as_str(), keyword, source.trade_area_code);
            }
            for landmark in landmarks.into_iter().flatten() {
                push(QueryKind::Landmark, landmark.as_str(), keyword, source.trade_area_code);
            }
        }
    }

    let count = |kind: QueryKind| queries.iter().filter(|q| q.kind == kind).count();
    info!(
        "검색어 생성: 행정동 {}개 / 지하철역 {}개 / 랜드마크 {}개 (총 {}개, 중복 제거)",
        count(QueryKind::AdministrativeDong),
        count(QueryKind::Station),
        count(QueryKind::Landmark),
        queries.len()
    );
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_names_strip_exit_numbers() {
        assert_eq!(station_name_of("강남역 2번"), Some("강남역".to_string()));
        assert_eq!(station_name_of("  성수역3번 "), Some("성수역".to_string()));
        assert_eq!(station_name_of("역삼역"), Some("역삼역".to_string()));
        assert_eq!(station_name_of("경리단길"), None);
        assert_eq!(station_name_of("역삼동 먹자골목"), None);

        let names = extract_station_names(["강남역 2번", "강남역 10번", "성수역", "망원시장"]);
        assert_eq!(names, vec!["강남역".to_string(), "성수역".to_string()]);
    }

    #[test]
    fn landmarks_use_brackets_and_keyword_lists() {
        assert_eq!(landmarks_of("경리단길"), vec!["경리단길".to_string()]);
        assert_eq!(
            landmarks_of("황학동(벼룩시장)"),
            vec!["벼룩시장".to_string()]
        );
        assert_eq!(
            landmarks_of("서울숲（성수동카페거리）"),
            vec!["서울숲".to_string(), "성수동카페거리".to_string()]
        );
        assert!(landmarks_of("래미안아파트 앞길").is_empty());
        assert!(landmarks_of("강남역 2번").is_empty());
        assert!(landmarks_of("어린이공원").is_empty());
    }

    #[test]
    fn queries_are_deduplicated_across_trade_areas() {
        let sources = vec![
            QuerySource {
                trade_area_code: 1,
                trade_area_name: "성수역".into(),
                dong: Some("성수1가1동".into()),
                nearest_station: Some("성수역".into()),
            },
            QuerySource {
                trade_area_code: 2,
                trade_area_name: "서울숲길".into(),
                dong: Some("성수1가1동".into()),
                nearest_station: Some("성수역".into()),
            },
        ];
        let queries = build_search_queries(&sources);

        assert_eq!(queries.len(), TEA_KEYWORDS.len() * 3);
        let landmark: Vec<&SearchQuery> = queries
            .iter()
            .filter(|q| q.kind == QueryKind::Landmark)
            .collect();
        assert_eq!(landmark.len(), TEA_KEYWORDS.len());
        assert!(landmark.iter().all(|q| q.trade_area_code == 2));
        assert_eq!(queries[0].query, "성수1가1동 찻집");
        assert_eq!(queries[0].trade_area_code, 1);
        let unique: HashSet<&str> = queries.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(unique.len(), queries.len());
    }
}
