use log::*;
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// 동일 평면 좌표계 (TM 미터) 위의 점
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        PlanarPoint { x, y }
    }

    fn coord(&self, axis: usize) -> f64 {
        if axis == 0 {
            self.x
        } else {
            self.y
        }
    }

    fn distance_sq(&self, other: &PlanarPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearestMatch {
    pub reference_index: usize,
    pub distance_m: f64,
}

#[derive(Debug, Clone)]
struct KdNode {
    point: PlanarPoint,
    index: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// 2차원 k-d 트리. 중앙값 분할로 O(N log N) 구축.
#[derive(Debug, Clone)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl KdTree {
    pub fn build(points: &[PlanarPoint]) -> Result<Self> {
        if points.is_empty() {
            return Err(PipelineError::EmptyReference(
                "k-d tree needs at least one reference point".to_string(),
            ));
        }
        let mut items: Vec<(usize, PlanarPoint)> = points.iter().copied().enumerate().collect();
        let mut tree = KdTree {
            nodes: Vec::with_capacity(points.len()),
            root: None,
        };
        tree.root = tree.build_recursive(&mut items, 0);
        Ok(tree)
    }

    fn build_recursive(&mut self, items: &mut [(usize, PlanarPoint)], depth: usize) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        let axis = depth % 2;
        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| {
            a.1.coord(axis)
                .total_cmp(&b.1.coord(axis))
                .then(a.0.cmp(&b.0))
        });
        let (index, point) = items[mid];

        let node_id = self.nodes.len();
        self.nodes.push(KdNode {
            point,
            index,
            axis,
            left: None,
            right: None,
        });

        let (left_items, rest) = items.split_at_mut(mid);
        let right_items = &mut rest[1..];
        let left = self.build_recursive(left_items, depth + 1);
        let right = self.build_recursive(right_items, depth + 1);
        self.nodes[node_id].left = left;
        self.nodes[node_id].right = right;
        Some(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 최근접 참조점. 동일 거리일 때는 먼저 발견된 점을 유지한다.
    pub fn nearest(&self, query: &PlanarPoint) -> Option<NearestMatch> {
        let root = self.root?;
        let mut best: Option<(usize, f64)> = None;
        self.search(root, query, &mut best);
        best.map(|(index, dist_sq)| NearestMatch {
            reference_index: index,
            distance_m: dist_sq.sqrt(),
        })
    }

    fn search(&self, node_id: usize, query: &PlanarPoint, best: &mut Option<(usize, f64)>) {
        let node = &self.nodes[node_id];
        let dist_sq = node.point.distance_sq(query);
        let closer = match best {
            Some((_, best_sq)) => dist_sq < *best_sq,
            None => true,
        };
        if closer {
            *best = Some((node.index, dist_sq));
        }

        let diff = query.coord(node.axis) - node.point.coord(node.axis);
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(near) = near {
            self.search(near, query, best);
        }
        if let Some(far) = far {
            let prune = matches!(best, Some((_, best_sq)) if diff * diff > *best_sq);
            if !prune {
                self.search(far, query, best);
            }
        }
    }
}

/// 최근접 거리 분포 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceDiagnostics {
    pub count: usize,
    pub mean_m: f64,
    pub median_m: f64,
    pub p75_m: f64,
    pub max_m: f64,
    pub near_threshold_m: f64,
    pub far_threshold_m: f64,
    pub within_near: usize,
    pub beyond_far: usize,
}

impl DistanceDiagnostics {
    pub fn from_distances(distances: &[f64], near_threshold_m: f64, far_threshold_m: f64) -> Self {
        let mut sorted: Vec<f64> = distances.iter().copied().filter(|d| d.is_finite()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let mean_m = if count == 0 {
            0.0
        } else {
            sorted.iter().sum::<f64>() / count as f64
        };

        DistanceDiagnostics {
            count,
            mean_m,
            median_m: percentile(&sorted, 50.0),
            p75_m: percentile(&sorted, 75.0),
            max_m: sorted.last().copied().unwrap_or(0.0),
            near_threshold_m,
            far_threshold_m,
            within_near: sorted.iter().filter(|d| **d <= near_threshold_m).count(),
            beyond_far: sorted.iter().filter(|d| **d > far_threshold_m).count(),
        }
    }

    pub fn within_near_ratio(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.within_near as f64 / self.count as f64
        }
    }

    pub fn log(&self, label: &str) {
        info!(
            "[{}] 거리 분포: 평균={:.0}m 중앙값={:.0}m 75%={:.0}m 최대={:.0}m ({}건)",
            label, self.mean_m, self.median_m, self.p75_m, self.max_m, self.count
        );
        info!(
            "[{}] {:.0}m 이내: {:.1}%",
            label,
            self.near_threshold_m,
            self.within_near_ratio() * 100.0
        );
        if self.beyond_far > 0 {
            warn!(
                "[{}] {:.0}m 초과: {}건 (참조점 밀도가 낮은 지역 확인 필요)",
                label, self.far_threshold_m, self.beyond_far
            );
        }
    }
}

/// 정렬된 값에 대한 선형 보간 백분위수
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = pct / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

/// 참조점 집합 위의 최근접 매칭기
pub struct SpatialMatcher {
    tree: KdTree,
    near_threshold_m: f64,
    far_threshold_m: f64,
}

impl SpatialMatcher {
    pub fn new(reference: &[PlanarPoint], near_threshold_m: f64, far_threshold_m: f64) -> Result<Self> {
        let tree = KdTree::build(reference)?;
        debug!("k-d 트리 구축 완료: 참조점 {}개", tree.len());
        Ok(SpatialMatcher {
            tree,
            near_threshold_m,
            far_threshold_m,
        })
    }

    pub fn reference_count(&self) -> usize {
        self.tree.len()
    }

    pub fn match_points(&self, queries: &[PlanarPoint]) -> (Vec<NearestMatch>, DistanceDiagnostics) {
        let matches: Vec<NearestMatch> = queries
            .iter()
            .filter_map(|q| self.tree.nearest(q))
            .collect();
        let distances: Vec<f64> = matches.iter().map(|m| m.distance_m).collect();
        let diagnostics =
            DistanceDiagnostics::from_distances(&distances, self.near_threshold_m, self.far_threshold_m);
        (matches, diagnostics)
    }
}
