use serde::{Deserialize, Serialize};
use vnacore::acquisition::TrackingRow;
use vnacore::markers::MarkerRegistry;
use vnacore::sweep::format_frequency;
use vnacore::Dataset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerReadout {
    pub label: String,
    pub frequency: u64,
    pub gain_db: f64,
    pub phase_deg: f64,
    pub group_delay_ns: f64,
    pub return_loss_db: Option<f64>,
}

/// What the console shows for the current dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresentationModel {
    pub title: String,
    pub points: usize,
    pub min_frequency: Option<u64>,
    pub max_frequency: Option<u64>,
    /// Strongest transmission sample as `(frequency, dB)`.
    pub strongest: Option<(u64, f64)>,
    pub markers: Vec<MarkerReadout>,
    pub last_tracked: Option<TrackingRow>,
    pub tracked_rows: usize,
}

impl PresentationModel {
    pub fn from_dataset(dataset: &Dataset, markers: &mut MarkerRegistry, tracking: &[TrackingRow]) -> Self {
        let live = dataset.snapshot();
        markers.update(&live.s21);
        let readouts = markers
            .iter()
            .filter_map(|marker| {
                let values = marker.values(&live.s11, &live.s21)?;
                Some(MarkerReadout {
                    label: marker.label().to_string(),
                    frequency: values.frequency,
                    gain_db: values.gain_db,
                    phase_deg: values.phase_deg,
                    group_delay_ns: values.group_delay * 1e9,
                    return_loss_db: values.return_loss_db,
                })
            })
            .collect();
        let strongest = live
            .s21
            .iter()
            .map(|dp| (dp.frequency, dp.gain_db()))
            .filter(|(_, db)| db.is_finite())
            .fold(None, |best: Option<(u64, f64)>, candidate| match best {
                Some((_, db)) if db >= candidate.1 => best,
                _ => Some(candidate),
            });

        Self {
            title: dataset.title(),
            points: live.len(),
            min_frequency: live.frequencies().min(),
            max_frequency: live.frequencies().max(),
            strongest,
            markers: readouts,
            last_tracked: tracking.last().copied(),
            tracked_rows: tracking.len(),
        }
    }

    pub fn summary(&self) -> String {
        let span = match (self.min_frequency, self.max_frequency) {
            (Some(lo), Some(hi)) => format!("{} - {}", format_frequency(lo), format_frequency(hi)),
            _ => "no data".to_string(),
        };
        let mut line = format!("{}: {}", self.title, span);
        if let Some((frequency, db)) = self.strongest {
            line.push_str(&format!(", peak {:.2} dB at {}", db, format_frequency(frequency)));
        }
        if self.tracked_rows > 0 {
            line.push_str(&format!(", {} tracked passes", self.tracked_rows));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, RwLock};
    use vnacore::rf::Datapoint;
    use vnacore::SweepResult;

    #[test]
    fn model_reports_strongest_sample_and_markers() {
        let s21 = vec![
            Datapoint::new(1_000_000, 0.1, 0.0),
            Datapoint::new(2_000_000, 0.8, 0.0),
            Datapoint::new(3_000_000, 0.3, 0.0),
        ];
        let result = SweepResult::from_channels(s21.clone(), s21, "dut");
        let dataset = Dataset::new(Arc::new(RwLock::new(result)));
        let mut markers = MarkerRegistry::new();
        markers.add(2_900_000);

        let model = PresentationModel::from_dataset(&dataset, &mut markers, &[]);
        assert_eq!(model.points, 3);
        assert_eq!(model.strongest.map(|(f, _)| f), Some(2_000_000));
        assert_eq!(model.markers.len(), 1);
        assert_eq!(model.markers[0].frequency, 3_000_000);
        assert_eq!(
            model.summary(),
            "dut (3 points): 1MHz - 3MHz, peak -1.94 dB at 2MHz"
        );
    }

    #[test]
    fn empty_dataset_has_no_span() {
        let dataset = Dataset::default();
        let model = PresentationModel::from_dataset(&dataset, &mut MarkerRegistry::new(), &[]);
        assert_eq!(model.points, 0);
        assert!(model.strongest.is_none());
        assert!(model.summary().ends_with("no data"));
    }
}
