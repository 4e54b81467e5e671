//! Classificação por thresholds – normal ou atenção, por sinal vital.
//!
//! A classificação é sempre recalculada a partir da [`Reading`] armazenada,
//! nunca guardada junto dela: mudar os thresholds reclassifica o histórico.

use crate::config::AlertThresholds;
use crate::types::{Reading, VitalKind};
use serde::{Deserialize, Serialize};

/// Estado de um sinal vital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VitalStatus {
    Normal,
    Warning,
}

/// Um sinal vital fora da faixa.
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: VitalKind,
    pub metric: String,
    pub label: String,
    pub value: f32,
    pub unit: String,
}

/// Classifica um valor isolado.
pub fn classify(kind: VitalKind, value: f32, thresholds: &AlertThresholds) -> VitalStatus {
    let warning = match kind {
        VitalKind::Heart => value < thresholds.heart_min || value > thresholds.heart_max,
        VitalKind::Oxygen => value < thresholds.oxygen_min,
        VitalKind::Temperature => {
            value < thresholds.temperature_min || value > thresholds.temperature_max
        }
    };

    if warning {
        VitalStatus::Warning
    } else {
        VitalStatus::Normal
    }
}

/// Avalia uma leitura e retorna um alerta por sinal em atenção.
pub fn evaluate_alerts(reading: &Reading, thresholds: &AlertThresholds) -> Vec<Alert> {
    VitalKind::ALL
        .into_iter()
        .filter(|&kind| classify(kind, reading.value(kind), thresholds) == VitalStatus::Warning)
        .map(|kind| Alert {
            kind,
            metric: kind.metric().into(),
            label: kind.label().into(),
            value: reading.value(kind),
            unit: kind.unit().into(),
        })
        .collect()
}

impl Reading {
    /// Estado de um sinal desta leitura.
    pub fn status(&self, kind: VitalKind, thresholds: &AlertThresholds) -> VitalStatus {
        classify(kind, self.value(kind), thresholds)
    }

    /// `true` se algum sinal estiver em atenção.
    pub fn has_warnings(&self, thresholds: &AlertThresholds) -> bool {
        VitalKind::ALL
            .into_iter()
            .any(|kind| self.status(kind, thresholds) == VitalStatus::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> AlertThresholds {
        AlertThresholds::default()
    }

    #[test]
    fn heart_boundaries() {
        assert_eq!(classify(VitalKind::Heart, 59.0, &t()), VitalStatus::Warning);
        assert_eq!(classify(VitalKind::Heart, 60.0, &t()), VitalStatus::Normal);
        assert_eq!(classify(VitalKind::Heart, 100.0, &t()), VitalStatus::Normal);
        assert_eq!(classify(VitalKind::Heart, 101.0, &t()), VitalStatus::Warning);
    }

    #[test]
    fn oxygen_boundaries() {
        assert_eq!(classify(VitalKind::Oxygen, 94.0, &t()), VitalStatus::Warning);
        assert_eq!(classify(VitalKind::Oxygen, 95.0, &t()), VitalStatus::Normal);
        assert_eq!(classify(VitalKind::Oxygen, 100.0, &t()), VitalStatus::Normal);
    }

    #[test]
    fn temperature_boundaries() {
        assert_eq!(classify(VitalKind::Temperature, 35.9, &t()), VitalStatus::Warning);
        assert_eq!(classify(VitalKind::Temperature, 36.0, &t()), VitalStatus::Normal);
        assert_eq!(classify(VitalKind::Temperature, 37.5, &t()), VitalStatus::Normal);
        assert_eq!(classify(VitalKind::Temperature, 37.6, &t()), VitalStatus::Warning);
    }

    #[test]
    fn no_alerts_for_normal_reading() {
        let reading = Reading::new(72, 98, 36.0, 0);
        assert!(evaluate_alerts(&reading, &t()).is_empty());
        assert!(!reading.has_warnings(&t()));
    }

    #[test]
    fn alerts_name_each_vital_in_warning() {
        let reading = Reading::new(120, 90, 36.5, 0);
        let alerts = evaluate_alerts(&reading, &t());
        let metrics: Vec<_> = alerts.iter().map(|a| a.metric.as_str()).collect();
        assert_eq!(metrics, ["heart", "oxygen"]);
        assert_eq!(alerts[0].value, 120.0);
        assert_eq!(alerts[1].unit, "%");
    }

    #[test]
    fn changed_thresholds_apply_to_stored_readings() {
        let reading = Reading::new(105, 98, 36.5, 0);
        assert!(reading.has_warnings(&t()));

        let relaxed = AlertThresholds {
            heart_max: 110.0,
            ..AlertThresholds::default()
        };
        assert_eq!(reading.status(VitalKind::Heart, &relaxed), VitalStatus::Normal);
    }
}
