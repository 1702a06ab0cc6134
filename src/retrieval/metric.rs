//! 距离度量与排序
//!
//! similarity = 1 - distance；排序按距离升序，距离相同保持插入顺序（稳定排序）。

use std::cmp::Ordering;

use serde::Deserialize;

/// 向量索引的距离度量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// 1 - cos(a, b)
    #[default]
    Cosine,
    /// -(a · b)，与 pgvector `<#>` 一致
    InnerProduct,
    /// 欧氏距离
    L2,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }

    pub fn similarity(&self, distance: f32) -> f32 {
        1.0 - distance
    }

    /// 解析配置值：cosine / inner_product / l2
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Some(DistanceMetric::Cosine),
            "inner_product" | "ip" => Some(DistanceMetric::InnerProduct),
            "l2" | "euclidean" => Some(DistanceMetric::L2),
            _ => None,
        }
    }
}

/// 对按插入顺序给出的候选计算距离，取前 k 个（距离升序，并列保持原顺序）
pub fn rank_by_distance<'a, T, I>(
    query: &[f32],
    candidates: I,
    metric: DistanceMetric,
    k: usize,
) -> Vec<(&'a T, f32)>
where
    I: IntoIterator<Item = (&'a T, &'a [f32])>,
{
    let mut scored: Vec<(&T, f32)> = candidates
        .into_iter()
        .map(|(item, v)| (item, metric.distance(query, v)))
        .filter(|(_, d)| d.is_finite())
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}
