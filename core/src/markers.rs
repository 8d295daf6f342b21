use log::debug;

use crate::rf::{group_delay, Datapoint};

/// Readout of a marker against the current transmission trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerValues {
    pub frequency: u64,
    pub gain_db: f64,
    pub phase_deg: f64,
    /// Seconds.
    pub group_delay: f64,
    /// Reflection magnitude in dB at the same index, if available.
    pub return_loss_db: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    label: String,
    pub frequency: u64,
    location: Option<usize>,
}

impl Marker {
    fn new(label: String, frequency: u64) -> Self {
        Self {
            label,
            frequency,
            location: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn location(&self) -> Option<usize> {
        self.location
    }

    /// Index of the sample nearest to the marker frequency.
    pub fn find_location(&mut self, data: &[Datapoint]) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (index, dp) in data.iter().enumerate() {
            let distance = dp.frequency.abs_diff(self.frequency);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }
        self.location = best.map(|(index, _)| index);
        self.location
    }

    pub fn values(&self, s11: &[Datapoint], s21: &[Datapoint]) -> Option<MarkerValues> {
        let index = self.location?;
        let dp = s21.get(index)?;
        Some(MarkerValues {
            frequency: dp.frequency,
            gain_db: dp.gain_db(),
            phase_deg: dp.phase_deg(),
            group_delay: group_delay(s21, index),
            return_loss_db: s11.get(index).map(|dp| -dp.gain_db()),
        })
    }
}

/// Markers owned by the application context.
#[derive(Debug, Default)]
pub struct MarkerRegistry {
    markers: Vec<Marker>,
    created: usize,
}

impl MarkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a marker and returns its label. Labels are never reused.
    pub fn add(&mut self, frequency: u64) -> String {
        self.created += 1;
        let label = format!("Marker {}", self.created);
        debug!("Adding {} at {} Hz", label, frequency);
        self.markers.push(Marker::new(label.clone(), frequency));
        label
    }

    pub fn remove(&mut self, label: &str) -> bool {
        let before = self.markers.len();
        self.markers.retain(|marker| marker.label != label);
        before != self.markers.len()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.markers.iter().map(Marker::label).collect()
    }

    pub fn get(&self, label: &str) -> Option<&Marker> {
        self.markers.iter().find(|marker| marker.label == label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Marker> {
        self.markers.iter_mut().find(|marker| marker.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.iter()
    }

    /// Relocates every marker on a freshly acquired trace.
    pub fn update(&mut self, data: &[Datapoint]) {
        for marker in &mut self.markers {
            marker.find_location(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn trace() -> Vec<Datapoint> {
        vec![
            Datapoint::new(1_000_000, 0.1, 0.0),
            Datapoint::new(2_000_000, 0.0, 0.5),
            Datapoint::new(3_000_000, -0.2, 0.0),
        ]
    }

    #[test]
    fn registry_labels_are_unique() {
        let mut registry = MarkerRegistry::new();
        let first = registry.add(1_000_000);
        let second = registry.add(2_000_000);
        assert_eq!(registry.labels(), vec!["Marker 1", "Marker 2"]);
        assert!(registry.remove(&first));
        assert!(!registry.remove(&first));
        let third = registry.add(3_000_000);
        assert_eq!(third, "Marker 3");
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&second).is_some());
    }

    #[test]
    fn nearest_location_and_values() {
        let data = trace();
        let mut registry = MarkerRegistry::new();
        let label = registry.add(2_300_000);
        registry.update(&data);
        let marker = registry.get(&label).unwrap();
        assert_eq!(marker.location(), Some(1));

        let values = marker.values(&data, &data).unwrap();
        assert_eq!(values.frequency, 2_000_000);
        assert_abs_diff_eq!(values.phase_deg, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(values.gain_db, -6.0206, epsilon = 1e-4);
    }

    #[test]
    fn marker_on_empty_trace_has_no_values() {
        let mut registry = MarkerRegistry::new();
        let label = registry.add(5);
        let marker = registry.get_mut(&label).unwrap();
        assert_eq!(marker.find_location(&[]), None);
        assert!(marker.values(&[], &[]).is_none());
    }
}
