use anyhow::{Context, Result};
use clap::Parser;
use log::*;
use std::path::PathBuf;

use trade_area_pipeline_lib::{ConfigManager, Pipeline, Stage};

/// 서울 상권 데이터 공간 조인 / 패널 병합 파이프라인
#[derive(Parser, Debug)]
#[command(name = "trade-area-pipeline", version, about)]
struct Cli {
    /// 설정 파일 (없으면 기본값으로 생성)
    #[arg(short, long, default_value = "pipeline.ini")]
    config: PathBuf,

    /// 실행할 단계: all, map-stations, search-keywords, map-tea-shops,
    /// map-reserve-stores, demand, supply, trend-index, trend-merge
    #[arg(value_name = "STAGE", default_value = "all")]
    stages: Vec<String>,
}

fn resolve_stages(names: &[String]) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    for name in names {
        if name == "all" {
            stages.extend(Stage::ALL);
        } else {
            stages.push(name.parse::<Stage>()?);
        }
    }
    Ok(stages)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG 가 있으면 그 설정이 우선
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let stages = resolve_stages(&cli.stages)?;

    let config_manager = ConfigManager::new(&cli.config)
        .with_context(|| format!("설정 파일을 읽을 수 없습니다: {}", cli.config.display()))?;
    config_manager.validate()?;

    let pipeline = Pipeline::new(config_manager.config.clone()).context("파이프라인 초기화 실패")?;
    let names: Vec<&str> = stages.iter().map(Stage::name).collect();
    info!("실행 단계: {}", names.join(" → "));

    pipeline
        .run_stages(&stages)
        .with_context(|| format!("설정: {}", config_manager.config_path().display()))?;
    Ok(())
}
