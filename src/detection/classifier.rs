//! Post-detection relabelling.
//!
//! Classification is a pure per-defect function: it depends only on the
//! defect's own kind, severity and area, never on its neighbours, so the
//! result is independent of list order and applying it twice changes
//! nothing. Defects are never removed or merged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detection::{Defect, DefectKind};

/// Hot spots above this severity become critical.
pub const CRITICAL_HOT_SPOT_SEVERITY: f64 = 3.0;
/// Gradient anomalies above this severity become crack suspects.
pub const CRACK_SUSPECT_SEVERITY: f64 = 2.0;
/// Cold spots covering more pixels than this become void suspects.
pub const VOID_SUSPECT_AREA: usize = 10;

/// Refined kind for a defect with the given attributes.
pub fn reclassify(kind: DefectKind, severity: f64, area: usize) -> DefectKind {
    match kind {
        DefectKind::HotSpot if severity > CRITICAL_HOT_SPOT_SEVERITY => DefectKind::CriticalHotSpot,
        DefectKind::GradientAnomaly if severity > CRACK_SUSPECT_SEVERITY => DefectKind::CrackSuspect,
        DefectKind::ColdSpot if area > VOID_SUSPECT_AREA => DefectKind::VoidSuspect,
        other => other,
    }
}

/// Relabel every defect in place.
pub fn reclassify_all(defects: &mut [Defect]) {
    for defect in defects {
        defect.kind = reclassify(defect.kind, defect.severity, defect.area);
    }
}

/// Per-kind counts of a classified defect set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectSummary {
    /// Number of defects
    pub total: usize,
    /// Count per kind
    pub by_kind: BTreeMap<DefectKind, usize>,
    /// Highest severity seen
    pub max_severity: Option<f64>,
}

impl DefectSummary {
    /// Summarise `defects`.
    pub fn from_defects(defects: &[Defect]) -> Self {
        let mut by_kind = BTreeMap::new();
        for defect in defects {
            *by_kind.entry(defect.kind).or_insert(0) += 1;
        }
        let max_severity = defects.iter().map(|d| d.severity).reduce(f64::max);
        Self {
            total: defects.len(),
            by_kind,
            max_severity,
        }
    }

    /// Count of one kind.
    pub fn count(&self, kind: DefectKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Holds the most recently classified defect set.
#[derive(Debug, Clone, Default)]
pub struct DefectClassifier {
    last: Vec<Defect>,
}

impl DefectClassifier {
    /// Classifier with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Relabel `defects` and retain them as the latest result.
    pub fn classify(&mut self, mut defects: Vec<Defect>) -> &[Defect] {
        reclassify_all(&mut defects);
        self.last = defects;
        &self.last
    }

    /// Defects from the last classification, in detection order.
    pub fn last_defects(&self) -> &[Defect] {
        &self.last
    }

    /// Summary of the last classification.
    pub fn summary(&self) -> DefectSummary {
        DefectSummary::from_defects(&self.last)
    }
}
