//! EPSG:5181 (Korea 2000 / Central Belt) ↔ EPSG:4326 (WGS84) 좌표 변환
//!
//! 타원체는 GRS80 (WGS84 와 실용상 동일), 원점 38°N 127°E, 축척 1.0,
//! 가산값 X=200000, Y=500000. 정/역변환 모두 Krüger 6차 급수를 사용한다.

use serde::{Deserialize, Serialize};

use crate::error::CoordinateError;

const GRS80_A: f64 = 6_378_137.0;
const GRS80_F: f64 = 1.0 / 298.257_222_101;

/// 경위도 (도)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

/// TM 평면 좌표 (미터)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TmPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TmBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl GeoBounds {
    pub fn seoul_metropolitan() -> Self {
        GeoBounds {
            min_lon: 125.5,
            max_lon: 128.5,
            min_lat: 36.5,
            max_lat: 38.8,
        }
    }

    fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl TmBounds {
    pub fn seoul_metropolitan() -> Self {
        TmBounds {
            min_x: 100_000.0,
            max_x: 300_000.0,
            min_y: 350_000.0,
            max_y: 600_000.0,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// 횡축 메르카토르 투영 (Krüger 급수)
#[derive(Debug, Clone)]
pub struct TransverseMercator {
    e: f64,
    lon0: f64,
    k0: f64,
    false_easting: f64,
    false_northing: f64,
    rectifying_radius: f64,
    alpha: [f64; 6],
    beta: [f64; 6],
    xi0: f64,
}

impl TransverseMercator {
    pub fn new(
        a: f64,
        f: f64,
        lat0_deg: f64,
        lon0_deg: f64,
        k0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let n = f / (2.0 - f);
        let e = (f * (2.0 - f)).sqrt();
        let (n2, n3, n4, n5, n6) = (n * n, n.powi(3), n.powi(4), n.powi(5), n.powi(6));

        let rectifying_radius = a / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0 + n6 / 256.0);

        let alpha = [
            n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3 + 41.0 / 180.0 * n4 - 127.0 / 288.0 * n5
                + 7891.0 / 37800.0 * n6,
            13.0 / 48.0 * n2 - 3.0 / 5.0 * n3 + 557.0 / 1440.0 * n4 + 281.0 / 630.0 * n5
                - 1983433.0 / 1935360.0 * n6,
            61.0 / 240.0 * n3 - 103.0 / 140.0 * n4 + 15061.0 / 26880.0 * n5
                + 167603.0 / 181440.0 * n6,
            49561.0 / 161280.0 * n4 - 179.0 / 168.0 * n5 + 6601661.0 / 7257600.0 * n6,
            34729.0 / 80640.0 * n5 - 3418889.0 / 1995840.0 * n6,
            212378941.0 / 319334400.0 * n6,
        ];
        let beta = [
            n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3 - 1.0 / 360.0 * n4 - 81.0 / 512.0 * n5
                + 96199.0 / 604800.0 * n6,
            1.0 / 48.0 * n2 + 1.0 / 15.0 * n3 - 437.0 / 1440.0 * n4 + 46.0 / 105.0 * n5
                - 1118711.0 / 3870720.0 * n6,
            17.0 / 480.0 * n3 - 37.0 / 840.0 * n4 - 209.0 / 4480.0 * n5 + 5569.0 / 90720.0 * n6,
            4397.0 / 161280.0 * n4 - 11.0 / 504.0 * n5 - 830251.0 / 7257600.0 * n6,
            4583.0 / 161280.0 * n5 - 108847.0 / 3991680.0 * n6,
            20648693.0 / 638668800.0 * n6,
        ];

        let mut tm = TransverseMercator {
            e,
            lon0: lon0_deg.to_radians(),
            k0,
            false_easting,
            false_northing,
            rectifying_radius,
            alpha,
            beta,
            xi0: 0.0,
        };
        let (xi0, _) = tm.xi_eta(lat0_deg.to_radians(), 0.0);
        tm.xi0 = xi0;
        tm
    }

    /// EPSG:5181 중부원점 (GRS80, 38N 127E, 200000/500000)
    pub fn korea_central_belt() -> Self {
        TransverseMercator::new(GRS80_A, GRS80_F, 38.0, 127.0, 1.0, 200_000.0, 500_000.0)
    }

    fn xi_eta(&self, phi: f64, dlon: f64) -> (f64, f64) {
        let e = self.e;
        let sin_phi = phi.sin();
        let t = (sin_phi.atanh() - e * (e * sin_phi).atanh()).sinh();
        let xi_p = t.atan2(dlon.cos());
        let eta_p = (dlon.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }
        (xi, eta)
    }

    pub fn forward(&self, lon: f64, lat: f64) -> TmPoint {
        let (xi, eta) = self.xi_eta(lat.to_radians(), lon.to_radians() - self.lon0);
        let scale = self.k0 * self.rectifying_radius;
        TmPoint {
            x: self.false_easting + scale * eta,
            y: self.false_northing + scale * (xi - self.xi0),
        }
    }

    pub fn inverse(&self, x: f64, y: f64) -> GeoPoint {
        let scale = self.k0 * self.rectifying_radius;
        let xi = (y - self.false_northing) / scale + self.xi0;
        let eta = (x - self.false_easting) / scale;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let lambda = self.lon0 + eta_p.sinh().atan2(xi_p.cos());

        // 등각위도 → 측지위도 (고정점 반복)
        let psi = chi.tan().asinh();
        let e = self.e;
        let mut phi = chi;
        for _ in 0..30 {
            let next = (psi + e * (e * phi.sin()).atanh()).sinh().atan();
            let converged = (next - phi).abs() < 1e-15;
            phi = next;
            if converged {
                break;
            }
        }

        GeoPoint {
            lon: lambda.to_degrees(),
            lat: phi.to_degrees(),
        }
    }
}

/// 서울 권역 범위 검사를 포함한 좌표 변환기
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    projection: TransverseMercator,
    geo_bounds: GeoBounds,
    tm_bounds: TmBounds,
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        CoordinateTransformer::new(GeoBounds::seoul_metropolitan(), TmBounds::seoul_metropolitan())
    }
}

impl CoordinateTransformer {
    pub fn new(geo_bounds: GeoBounds, tm_bounds: TmBounds) -> Self {
        CoordinateTransformer {
            projection: TransverseMercator::korea_central_belt(),
            geo_bounds,
            tm_bounds,
        }
    }

    pub fn wgs84_to_tm(&self, lon: f64, lat: f64) -> Result<TmPoint, CoordinateError> {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(CoordinateError::NonFinite { x: lon, y: lat });
        }
        if !self.geo_bounds.contains(lon, lat) {
            return Err(CoordinateError::OutOfBounds { x: lon, y: lat });
        }
        Ok(self.projection.forward(lon, lat))
    }

    pub fn tm_to_wgs84(&self, x: f64, y: f64) -> Result<GeoPoint, CoordinateError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(CoordinateError::NonFinite { x, y });
        }
        if !self.tm_bounds.contains(x, y) {
            return Err(CoordinateError::OutOfBounds { x, y });
        }
        Ok(self.projection.inverse(x, y))
    }

    /// 병렬 배열 변환. 길이가 다르면 전체 실패, 그 외에는 행마다 결과를 돌려준다.
    pub fn wgs84_to_tm_batch(
        &self,
        lons: &[Option<f64>],
        lats: &[Option<f64>],
    ) -> Result<Vec<Result<TmPoint, CoordinateError>>, CoordinateError> {
        zip_checked(lons, lats, |lon, lat| self.wgs84_to_tm(lon, lat))
    }

    pub fn tm_to_wgs84_batch(
        &self,
        xs: &[Option<f64>],
        ys: &[Option<f64>],
    ) -> Result<Vec<Result<GeoPoint, CoordinateError>>, CoordinateError> {
        zip_checked(xs, ys, |x, y| self.tm_to_wgs84(x, y))
    }
}

fn zip_checked<T>(
    xs: &[Option<f64>],
    ys: &[Option<f64>],
    convert: impl Fn(f64, f64) -> Result<T, CoordinateError>,
) -> Result<Vec<Result<T, CoordinateError>>, CoordinateError> {
    if xs.len() != ys.len() {
        return Err(CoordinateError::LengthMismatch {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    Ok(xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => convert(*x, *y),
            _ => Err(CoordinateError::Missing),
        })
        .collect())
}
