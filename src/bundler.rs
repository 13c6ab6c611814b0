//! Zoom-dependent edge visibility.
//!
//! Bundling only decides which edge ids the renderer draws. Hidden edges
//! stay in the snapshot.
//!
//! | Band | Visible                                                                 |
//! |------|-------------------------------------------------------------------------|
//! | far  | best edge per unordered pair of depth-1 clusters                        |
//! | mid  | far ∪ best edge per pair of depth-2 clusters ∪ `contains` down to depth 2 |
//! | near | every edge                                                              |
//!
//! Each band includes the one before it, so `far ⊆ mid ⊆ near`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use crate::types::{EdgeType, GraphEdge, Snapshot, SnapshotIndex};

/// Zoom at or above which the mid band starts.
pub const MID_ZOOM: f64 = 0.45;
/// Zoom at or above which the near band starts.
pub const NEAR_ZOOM: f64 = 0.9;

/// Renderer zoom band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomBand {
    /// Zoomed out.
    Far,
    /// Intermediate.
    Mid,
    /// Zoomed in.
    Near,
}

impl ZoomBand {
    /// Map a renderer zoom level to a band.
    pub fn from_zoom(zoom: f64) -> Self {
        if zoom < MID_ZOOM {
            Self::Far
        } else if zoom < NEAR_ZOOM {
            Self::Mid
        } else {
            Self::Near
        }
    }

    /// Parse a band name.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "far" => Some(Self::Far),
            "mid" => Some(Self::Mid),
            "near" => Some(Self::Near),
            _ => None,
        }
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Far => "far",
            Self::Mid => "mid",
            Self::Near => "near",
        }
    }
}

impl fmt::Display for ZoomBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bundle output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleResult {
    /// Band the result was computed for.
    pub zoom_band: ZoomBand,
    /// Visible edge ids, sorted.
    pub visible_edge_ids: Vec<String>,
    /// Number of edges hidden at this band.
    pub hidden_count: usize,
    /// Wall-clock bundling time. Not part of equality.
    pub build_ms: u64,
}

impl PartialEq for BundleResult {
    fn eq(&self, other: &Self) -> bool {
        self.zoom_band == other.zoom_band
            && self.visible_edge_ids == other.visible_edge_ids
            && self.hidden_count == other.hidden_count
    }
}

impl BundleResult {
    /// Whether an edge is drawn.
    pub fn is_visible(&self, edge_id: &str) -> bool {
        self.visible_edge_ids
            .binary_search_by(|id| id.as_str().cmp(edge_id))
            .is_ok()
    }
}

/// Pure edge bundler.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeBundler;

fn edge_strength(edge: &GraphEdge) -> f64 {
    edge.weight.or(edge.confidence).unwrap_or(0.0)
}

/// Whether `a` beats `b` as a cluster representative.
fn is_better(a: &GraphEdge, b: &GraphEdge) -> bool {
    edge_strength(a)
        .total_cmp(&edge_strength(b))
        .then_with(|| a.support_count.unwrap_or(0).cmp(&b.support_count.unwrap_or(0)))
        .then_with(|| b.id.cmp(&a.id))
        .is_gt()
}

impl EdgeBundler {
    /// Create a bundler.
    pub fn new() -> Self {
        Self
    }

    /// Compute the visible edge set for a band.
    pub fn bundle(&self, snapshot: &Snapshot, band: ZoomBand) -> BundleResult {
        let start = Instant::now();
        let index = snapshot.index();

        let visible: BTreeSet<&str> = match band {
            ZoomBand::Near => snapshot.edges.iter().map(|e| e.id.as_str()).collect(),
            ZoomBand::Far => representatives(&index, &snapshot.edges, 1),
            ZoomBand::Mid => {
                let mut visible = representatives(&index, &snapshot.edges, 1);
                visible.extend(representatives(&index, &snapshot.edges, 2));
                visible.extend(
                    snapshot
                        .edges
                        .iter()
                        .filter(|e| e.edge_type == EdgeType::Contains && index.depth(&e.target) <= 2)
                        .map(|e| e.id.as_str()),
                );
                visible
            }
        };

        let visible_edge_ids: Vec<String> = visible.into_iter().map(str::to_string).collect();
        let hidden_count = snapshot.edges.len().saturating_sub(visible_edge_ids.len());
        let build_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            scope_key = %snapshot.scope_key,
            band = %band,
            visible = visible_edge_ids.len(),
            hidden = hidden_count,
            "Edges bundled"
        );

        BundleResult {
            zoom_band: band,
            visible_edge_ids,
            hidden_count,
            build_ms,
        }
    }
}

/// Best edge per unordered pair of clusters at `depth`.
fn representatives<'a>(
    index: &SnapshotIndex<'a>,
    edges: &'a [GraphEdge],
    depth: usize,
) -> BTreeSet<&'a str> {
    let mut best: BTreeMap<(&str, &str), &GraphEdge> = BTreeMap::new();
    for edge in edges {
        let a = index.ancestor_at_depth(&edge.source, depth).unwrap_or(edge.source.as_str());
        let b = index.ancestor_at_depth(&edge.target, depth).unwrap_or(edge.target.as_str());
        let key = if a <= b { (a, b) } else { (b, a) };
        match best.get(&key) {
            Some(current) if !is_better(edge, current) => {}
            _ => {
                best.insert(key, edge);
            }
        }
    }
    best.into_values().map(|e| e.id.as_str()).collect()
}
