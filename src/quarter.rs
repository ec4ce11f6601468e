use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// 기준_년분기_코드 (YYYYQ) 를 (연도, 분기) 로 풀어 놓은 값.
///
/// 정렬 순서는 연도 → 분기 순이며, 다음/이전 분기는 연도 경계를 넘어간다
/// (20234 → 20241). 패킹된 정수에 직접 더하기/빼기를 하지 않는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quarter {
    pub year: i32,
    pub quarter: u8,
}

impl Quarter {
    pub fn new(year: i32, quarter: u8) -> Result<Self, PipelineError> {
        if !(1..=4).contains(&quarter) || year < 0 {
            return Err(PipelineError::InvalidQuarter(year as i64 * 10 + quarter as i64));
        }
        Ok(Quarter { year, quarter })
    }

    pub fn from_code(code: i64) -> Result<Self, PipelineError> {
        if code < 10 {
            return Err(PipelineError::InvalidQuarter(code));
        }
        let quarter = (code % 10) as u8;
        let year = i32::try_from(code / 10).map_err(|_| PipelineError::InvalidQuarter(code))?;
        Quarter::new(year, quarter).map_err(|_| PipelineError::InvalidQuarter(code))
    }

    pub fn code(&self) -> i64 {
        self.year as i64 * 10 + self.quarter as i64
    }

    pub fn next(&self) -> Self {
        if self.quarter == 4 {
            Quarter { year: self.year + 1, quarter: 1 }
        } else {
            Quarter { year: self.year, quarter: self.quarter + 1 }
        }
    }

    pub fn prev(&self) -> Self {
        if self.quarter == 1 {
            Quarter { year: self.year - 1, quarter: 4 }
        } else {
            Quarter { year: self.year, quarter: self.quarter - 1 }
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for Quarter {
    type Err = PipelineError;

    /// "20233" 과 "2023Q3" 두 형식을 모두 받는다.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some((year, quarter)) = trimmed.split_once(['Q', 'q']) {
            let year: i32 = year
                .parse()
                .map_err(|_| PipelineError::InvalidQuarter(-1))?;
            let quarter: u8 = quarter
                .parse()
                .map_err(|_| PipelineError::InvalidQuarter(year as i64 * 10))?;
            return Quarter::new(year, quarter);
        }
        let code: i64 = trimmed
            .parse()
            .map_err(|_| PipelineError::InvalidQuarter(-1))?;
        Quarter::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_rollover_forward_and_back() {
        let q4 = Quarter::from_code(20234).unwrap();
        assert_eq!(q4.next().code(), 20241);
        assert_eq!(Quarter::from_code(20241).unwrap().prev().code(), 20234);
        assert_eq!(Quarter::from_code(20232).unwrap().next().code(), 20233);
    }

    #[test]
    fn ordering_follows_year_then_quarter() {
        let a = Quarter::from_code(20234).unwrap();
        let b = Quarter::from_code(20241).unwrap();
        assert!(a < b);
        assert_eq!(a.next(), b);
    }

    #[test]
    fn rejects_invalid_codes() {
        assert!(Quarter::from_code(20235).is_err());
        assert!(Quarter::from_code(20230).is_err());
        assert!(Quarter::from_code(3).is_err());
    }

    #[test]
    fn parses_both_formats() {
        assert_eq!("20233".parse::<Quarter>().unwrap(), Quarter { year: 2023, quarter: 3 });
        assert_eq!("2023Q3".parse::<Quarter>().unwrap().to_string(), "2023Q3");
        assert!("abc".parse::<Quarter>().is_err());
    }
}
