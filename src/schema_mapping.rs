//! 공공데이터 필드명 → 한글 표준 컬럼명 매핑
//!
//! 한 번 로드해서 모든 입력 테이블에 같은 규칙으로 적용한다.
//! JSON 파일로 덮어쓸 수 있으며, 형식은 `SchemaMapping` 직렬화 형태와 같다.

use log::*;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

pub const SCHEMA_MAPPING_VERSION: u32 = 1;

pub const QUARTER_KEY: &str = "기준_년분기_코드";
pub const TRADE_AREA_KEY: &str = "상권_코드";
pub const TRADE_AREA_NAME: &str = "상권_코드_명";

const DEFAULT_RENAMES: &[(&str, &str)] = &[
    ("ADSTRD_CD", "행정동_코드"),
    ("AE_132_SQMT_HSHLD_CO", "아파트_면적_132_제곱미터_세대_수"),
    ("AE_165_SQMT_HSHLD_CO", "아파트_면적_165_제곱미터_세대_수"),
    ("AE_66_SQMT_BELO_HSHLD_CO", "아파트_면적_66_제곱미터_미만_세대_수"),
    ("AE_66_SQMT_HSHLD_CO", "아파트_면적_66_제곱미터_세대_수"),
    ("AE_99_SQMT_HSHLD_CO", "아파트_면적_99_제곱미터_세대_수"),
    ("AGRDE_10_FLPOP_CO", "연령대_10_유동인구_수"),
    ("AGRDE_10_REPOP_CO", "연령대_10_상주인구_수"),
    ("AGRDE_10_SELNG_AMT", "연령대_10_매출_금액"),
    ("AGRDE_10_SELNG_CO", "연령대_10_매출_건수"),
    ("AGRDE_10_WRC_POPLTN_CO", "연령대_10_직장_인구_수"),
    ("AGRDE_20_FLPOP_CO", "연령대_20_유동인구_수"),
    ("AGRDE_20_REPOP_CO", "연령대_20_상주인구_수"),
    ("AGRDE_20_SELNG_AMT", "연령대_20_매출_금액"),
    ("AGRDE_20_SELNG_CO", "연령대_20_매출_건수"),
    ("AGRDE_20_WRC_POPLTN_CO", "연령대_20_직장_인구_수"),
    ("AGRDE_30_FLPOP_CO", "연령대_30_유동인구_수"),
    ("AGRDE_30_REPOP_CO", "연령대_30_상주인구_수"),
    ("AGRDE_30_SELNG_AMT", "연령대_30_매출_금액"),
    ("AGRDE_30_SELNG_CO", "연령대_30_매출_건수"),
    ("AGRDE_30_WRC_POPLTN_CO", "연령대_30_직장_인구_수"),
    ("AGRDE_40_FLPOP_CO", "연령대_40_유동인구_수"),
    ("AGRDE_40_REPOP_CO", "연령대_40_상주인구_수"),
    ("AGRDE_40_SELNG_AMT", "연령대_40_매출_금액"),
    ("AGRDE_40_SELNG_CO", "연령대_40_매출_건수"),
    ("AGRDE_40_WRC_POPLTN_CO", "연령대_40_직장_인구_수"),
    ("AGRDE_50_FLPOP_CO", "연령대_50_유동인구_수"),
    ("AGRDE_50_REPOP_CO", "연령대_50_상주인구_수"),
    ("AGRDE_50_SELNG_AMT", "연령대_50_매출_금액"),
    ("AGRDE_50_SELNG_CO", "연령대_50_매출_건수"),
    ("AGRDE_50_WRC_POPLTN_CO", "연령대_50_직장_인구_수"),
    ("AGRDE_60_ABOVE_FLPOP_CO", "연령대_60_이상_유동인구_수"),
    ("AGRDE_60_ABOVE_REPOP_CO", "연령대_60_이상_상주인구_수"),
    ("AGRDE_60_ABOVE_SELNG_AMT", "연령대_60_이상_매출_금액"),
    ("AGRDE_60_ABOVE_SELNG_CO", "연령대_60_이상_매출_건수"),
    ("AGRDE_60_ABOVE_WRC_POPLTN_CO", "연령대_60_이상_직장_인구_수"),
    ("APT_HSHLD_CO", "아파트_가구_수"),
    ("APT_HSMP_CO", "아파트_단지_수"),
    ("ARPRT_CO", "공항_수"),
    ("AVRG_AE", "아파트_평균_면적"),
    ("AVRG_MKTC", "아파트_평균_시가"),
    ("BANK_CO", "은행_수"),
    ("BUS_STTN_CO", "버스_정거장_수"),
    ("BUS_TRMINL_CO", "버스_터미널_수"),
    ("CLSBIZ_RT", "폐업_률"),
    ("CLSBIZ_STOR_CO", "폐업_점포_수"),
    ("CLTHS_FTWR_EXPNDTR_TOTAMT", "의류_신발_지출_총금액"),
    ("CLTUR_EXPNDTR_TOTAMT", "문화_지출_총금액"),
    ("DRTS_CO", "백화점_수"),
    ("EDC_EXPNDTR_TOTAMT", "교육_지출_총금액"),
    ("ELESCH_CO", "초등학교_수"),
    ("EXPNDTR_TOTAMT", "지출_총금액"),
    ("FAG_10_REPOP_CO", "여성연령대_10_상주인구_수"),
    ("FAG_10_WRC_POPLTN_CO", "여성연령대_10_직장_인구_수"),
    ("FAG_20_REPOP_CO", "여성연령대_20_상주인구_수"),
    ("FAG_20_WRC_POPLTN_CO", "여성연령대_20_직장_인구_수"),
    ("FAG_30_REPOP_CO", "여성연령대_30_상주인구_수"),
    ("FAG_30_WRC_POPLTN_CO", "여성연령대_30_직장_인구_수"),
    ("FAG_40_REPOP_CO", "여성연령대_40_상주인구_수"),
    ("FAG_40_WRC_POPLTN_CO", "여성연령대_40_직장_인구_수"),
    ("FAG_50_REPOP_CO", "여성연령대_50_상주인구_수"),
    ("FAG_50_WRC_POPLTN_CO", "여성연령대_50_직장_인구_수"),
    ("FAG_60_ABOVE_REPOP_CO", "여성연령대_60_이상_상주인구_수"),
    ("FAG_60_ABOVE_WRC_POPLTN_CO", "여성연령대_60_이상_직장_인구_수"),
    ("FDSTFFS_EXPNDTR_TOTAMT", "식료품_지출_총금액"),
    ("FML_FLPOP_CO", "여성_유동인구_수"),
    ("FML_REPOP_CO", "여성_상주인구_수"),
    ("FML_SELNG_AMT", "여성_매출_금액"),
    ("FML_SELNG_CO", "여성_매출_건수"),
    ("FML_WRC_POPLTN_CO", "여성_직장_인구_수"),
    ("FRC_STOR_CO", "프랜차이즈_점포_수"),
    ("FRI_FLPOP_CO", "금요일_유동인구_수"),
    ("FRI_SELNG_AMT", "금요일_매출_금액"),
    ("FRI_SELNG_CO", "금요일_매출_건수"),
    ("GEHSPT_CO", "종합병원_수"),
    ("GNRL_HSPTL_CO", "일반_병원_수"),
    ("HGSCHL_CO", "고등학교_수"),
    ("INCOME_SCTN_CD", "소득_구간_코드"),
    ("KNDRGR_CO", "유치원_수"),
    ("LSR_EXPNDTR_TOTAMT", "여가_지출_총금액"),
    ("LVSPL_EXPNDTR_TOTAMT", "생활용품_지출_총금액"),
    ("MAG_10_REPOP_CO", "남성연령대_10_상주인구_수"),
    ("MAG_10_WRC_POPLTN_CO", "남성연령대_10_직장_인구_수"),
    ("MAG_20_REPOP_CO", "남성연령대_20_상주인구_수"),
    ("MAG_20_WRC_POPLTN_CO", "남성연령대_20_직장_인구_수"),
    ("MAG_30_REPOP_CO", "남성연령대_30_상주인구_수"),
    ("MAG_30_WRC_POPLTN_CO", "남성연령대_30_직장_인구_수"),
    ("MAG_40_REPOP_CO", "남성연령대_40_상주인구_수"),
    ("MAG_40_WRC_POPLTN_CO", "남성연령대_40_직장_인구_수"),
    ("MAG_50_REPOP_CO", "남성연령대_50_상주인구_수"),
    ("MAG_50_WRC_POPLTN_CO", "남성연령대_50_직장_인구_수"),
    ("MAG_60_ABOVE_REPOP_CO", "남성연령대_60_이상_상주인구_수"),
    ("MAG_60_ABOVE_WRC_POPLTN_CO", "남성연령대_60_이상_직장_인구_수"),
    ("MCP_EXPNDTR_TOTAMT", "의료비_지출_총금액"),
    ("MDWK_SELNG_AMT", "주중_매출_금액"),
    ("MDWK_SELNG_CO", "주중_매출_건수"),
    ("ML_FLPOP_CO", "남성_유동인구_수"),
    ("ML_REPOP_CO", "남성_상주인구_수"),
    ("ML_SELNG_AMT", "남성_매출_금액"),
    ("ML_SELNG_CO", "남성_매출_건수"),
    ("ML_WRC_POPLTN_CO", "남성_직장_인구_수"),
    ("MON_FLPOP_CO", "월요일_유동인구_수"),
    ("MON_SELNG_AMT", "월요일_매출_금액"),
    ("MON_SELNG_CO", "월요일_매출_건수"),
    ("MSKUL_CO", "중학교_수"),
    ("MT_AVRG_INCOME_AMT", "월_평균_소득_금액"),
    ("NON_APT_HSHLD_CO", "비_아파트_가구_수"),
    ("OPBIZ_RT", "개업_율"),
    ("OPBIZ_STOR_CO", "개업_점포_수"),
    ("PARMACY_CO", "약국_수"),
    ("PBLOFC_CO", "관공서_수"),
    ("PC_1_HDMIL_BELO_HSHLD_CO", "아파트_가격_1_억_미만_세대_수"),
    ("PC_1_HDMIL_HSHLD_CO", "아파트_가격_1_억_세대_수"),
    ("PC_2_HDMIL_HSHLD_CO", "아파트_가격_2_억_세대_수"),
    ("PC_3_HDMIL_HSHLD_CO", "아파트_가격_3_억_세대_수"),
    ("PC_4_HDMIL_HSHLD_CO", "아파트_가격_4_억_세대_수"),
    ("PC_5_HDMIL_HSHLD_CO", "아파트_가격_5_억_세대_수"),
    ("PC_6_HDMIL_ABOVE_HSHLD_CO", "아파트_가격_6_억_이상_세대_수"),
    ("PLESR_EXPNDTR_TOTAMT", "유흥_지출_총금액"),
    ("RLROAD_STATN_CO", "철도_역_수"),
    ("SALES_PER_STORE", "점포당_평균_매출"),
    ("SAT_FLPOP_CO", "토요일_유동인구_수"),
    ("SAT_SELNG_AMT", "토요일_매출_금액"),
    ("SAT_SELNG_CO", "토요일_매출_건수"),
    ("SIGNGU_CD", "자치구_코드"),
    ("SIMILR_INDUTY_STOR_CO", "유사_업종_점포_수"),
    ("STAYNG_FCLTY_CO", "숙박_시설_수"),
    ("STDR_YYQU_CD", "기준_년분기_코드"),
    ("STOR_CO", "점포_수"),
    ("STORE_CO", "점포_수"),
    ("SUBWAY_STATN_CO", "지하철_역_수"),
    ("SUN_FLPOP_CO", "일요일_유동인구_수"),
    ("SUN_SELNG_AMT", "일요일_매출_금액"),
    ("SUN_SELNG_CO", "일요일_매출_건수"),
    ("SUPMK_CO", "슈퍼마켓_수"),
    ("SVC_INDUTY_CD", "서비스_업종_코드"),
    ("SVC_INDUTY_CD_NM", "서비스_업종_코드_명"),
    ("THEAT_CO", "극장_수"),
    ("THSMON_SELNG_AMT", "당월_매출_금액"),
    ("THSMON_SELNG_CO", "당월_매출_건수"),
    ("THUR_FLPOP_CO", "목요일_유동인구_수"),
    ("THUR_SELNG_AMT", "목요일_매출_금액"),
    ("THUR_SELNG_CO", "목요일_매출_건수"),
    ("TMZON_00_06_FLPOP_CO", "시간대_00_06_유동인구_수"),
    ("TMZON_00_06_SELNG_AMT", "시간대_00~06_매출_금액"),
    ("TMZON_00_06_SELNG_CO", "시간대_00~06_매출_건수"),
    ("TMZON_06_11_FLPOP_CO", "시간대_06_11_유동인구_수"),
    ("TMZON_06_11_SELNG_AMT", "시간대_06~11_매출_금액"),
    ("TMZON_06_11_SELNG_CO", "시간대_06~11_매출_건수"),
    ("TMZON_11_14_FLPOP_CO", "시간대_11_14_유동인구_수"),
    ("TMZON_11_14_SELNG_AMT", "시간대_11~14_매출_금액"),
    ("TMZON_11_14_SELNG_CO", "시간대_11~14_매출_건수"),
    ("TMZON_14_17_FLPOP_CO", "시간대_14_17_유동인구_수"),
    ("TMZON_14_17_SELNG_AMT", "시간대_14~17_매출_금액"),
    ("TMZON_14_17_SELNG_CO", "시간대_14~17_매출_건수"),
    ("TMZON_17_21_FLPOP_CO", "시간대_17_21_유동인구_수"),
    ("TMZON_17_21_SELNG_AMT", "시간대_17~21_매출_금액"),
    ("TMZON_17_21_SELNG_CO", "시간대_17~21_매출_건수"),
    ("TMZON_21_24_FLPOP_CO", "시간대_21_24_유동인구_수"),
    ("TMZON_21_24_SELNG_AMT", "시간대_21~24_매출_금액"),
    ("TMZON_21_24_SELNG_CO", "시간대_21~24_매출_건수"),
    ("TOT_FLPOP_CO", "총_유동인구_수"),
    ("TOT_HSHLD_CO", "총_가구_수"),
    ("TOT_REPOP_CO", "총_상주인구_수"),
    ("TOT_WRC_POPLTN_CO", "총_직장_인구_수"),
    ("TRDAR_CD", "상권_코드"),
    ("TRDAR_CD_NM", "상권_코드_명"),
    ("TRDAR_SE_CD", "상권_구분_코드"),
    ("TRDAR_SE_CD_NM", "상권_구분_코드_명"),
    ("TRNSPORT_EXPNDTR_TOTAMT", "교통_지출_총금액"),
    ("TUES_FLPOP_CO", "화요일_유동인구_수"),
    ("TUES_SELNG_AMT", "화요일_매출_금액"),
    ("TUES_SELNG_CO", "화요일_매출_건수"),
    ("UNIV_CO", "대학교_수"),
    ("VIATR_FCLTY_CO", "집객시설_수"),
    ("WED_FLPOP_CO", "수요일_유동인구_수"),
    ("WED_SELNG_AMT", "수요일_매출_금액"),
    ("WED_SELNG_CO", "수요일_매출_건수"),
    ("WKEND_SELNG_AMT", "주말_매출_금액"),
    ("WKEND_SELNG_CO", "주말_매출_건수"),
    ("XCNTS_VALUE", "엑스좌표_값"),
    ("YDNTS_VALUE", "와이좌표_값"),
    ("ADSTRD_CD_NM", "행정동_코드_명"),
    ("SIGNGU_CD_NM", "자치구_코드_명"),
];

lazy_static::lazy_static! {
    static ref DEFAULT_REQUIRED: Vec<(&'static str, Vec<&'static str>)> = vec![
        ("trade_areas", vec![TRADE_AREA_KEY, TRADE_AREA_NAME, "엑스좌표_값", "와이좌표_값"]),
        ("sales", vec![QUARTER_KEY, TRADE_AREA_KEY, TRADE_AREA_NAME]),
        ("income", vec![QUARTER_KEY, TRADE_AREA_KEY]),
        ("floating_pop", vec![QUARTER_KEY, TRADE_AREA_KEY]),
        ("living_pop", vec![QUARTER_KEY, TRADE_AREA_KEY]),
        ("working_pop", vec![QUARTER_KEY, TRADE_AREA_KEY]),
        ("apt", vec![QUARTER_KEY, TRADE_AREA_KEY]),
        ("facilities", vec![QUARTER_KEY, TRADE_AREA_KEY]),
        ("competitor", vec![QUARTER_KEY, TRADE_AREA_KEY, "점포_수", "개업_율"]),
        ("points_of_interest", vec!["lon", "lat"]),
        ("poi_count", vec![TRADE_AREA_KEY]),
        ("demand_panel", vec![QUARTER_KEY, TRADE_AREA_KEY, TRADE_AREA_NAME]),
        ("search_trend", vec![QUARTER_KEY, TRADE_AREA_KEY, "카페_검색지수", "검색량_성장률"]),
        ("trend_index", vec![QUARTER_KEY, TRADE_AREA_KEY]),
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRename {
    pub external: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMapping {
    pub version: u32,
    /// 순서대로 적용. 같은 표준명을 가리키는 외부명이 둘 이상이면 앞의 것이 우선.
    pub renames: Vec<FieldRename>,
    /// 입력 종류별 필수 표준 컬럼
    pub required: BTreeMap<String, Vec<String>>,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        SchemaMapping {
            version: SCHEMA_MAPPING_VERSION,
            renames: DEFAULT_RENAMES
                .iter()
                .map(|(external, canonical)| FieldRename {
                    external: external.to_string(),
                    canonical: canonical.to_string(),
                })
                .collect(),
            required: DEFAULT_REQUIRED
                .iter()
                .map(|(source, cols)| {
                    (source.to_string(), cols.iter().map(|c| c.to_string()).collect())
                })
                .collect(),
        }
    }
}

impl SchemaMapping {
    /// JSON 파일이 지정되면 그것을, 아니면 내장 매핑을 사용
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(SchemaMapping::default());
        };
        let content = fs::read_to_string(path)?;
        let mapping: SchemaMapping = serde_json::from_str(&content)?;
        if mapping.version != SCHEMA_MAPPING_VERSION {
            return Err(PipelineError::Schema {
                table: path.display().to_string(),
                message: format!(
                    "unsupported schema mapping version {} (expected {})",
                    mapping.version, SCHEMA_MAPPING_VERSION
                ),
            });
        }
        info!(
            "스키마 매핑 로드: {} (필드 {}개, 입력 {}종)",
            path.display(),
            mapping.renames.len(),
            mapping.required.len()
        );
        Ok(mapping)
    }

    /// 외부 필드명을 표준명으로 바꾼다. 표준명이 이미 있으면 건드리지 않는다.
    pub fn apply(&self, table: &str, df: &mut DataFrame) -> Result<Vec<FieldRename>> {
        let mut present: HashSet<String> = df
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();
        let mut applied = Vec::new();

        for rename in &self.renames {
            if !present.contains(&rename.external) {
                continue;
            }
            if present.contains(&rename.canonical) {
                warn!(
                    "[{}] {} → {} 변환 생략: {} 컬럼이 이미 존재합니다.",
                    table, rename.external, rename.canonical, rename.canonical
                );
                continue;
            }
            df.rename(&rename.external, &rename.canonical)?;
            present.remove(&rename.external);
            present.insert(rename.canonical.clone());
            applied.push(rename.clone());
        }

        if !applied.is_empty() {
            debug!("[{}] 컬럼명 {}개 변환", table, applied.len());
        }
        Ok(applied)
    }

    /// 필수 컬럼 검사. 상위 데이터 형식이 바뀌었을 때 조인 전에 바로 실패시킨다.
    pub fn validate(&self, source: &str, table: &str, df: &DataFrame) -> Result<()> {
        let Some(required) = self.required.get(source) else {
            return Ok(());
        };
        let present: HashSet<&str> = df.get_column_names().into_iter().collect();
        let missing: Vec<&str> = required
            .iter()
            .map(String::as_str)
            .filter(|c| !present.contains(c))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Schema {
                table: table.to_string(),
                message: format!("missing required columns for '{}': {}", source, missing.join(", ")),
            })
        }
    }

    pub fn normalize(&self, source: &str, table: &str, df: &mut DataFrame) -> Result<()> {
        self.apply(table, df)?;
        self.validate(source, table, df)
    }
}
