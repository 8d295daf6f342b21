use log::debug;
use serde::{Deserialize, Serialize};

use crate::prelude::{AcquisitionResult, SweepError};

/// Geometry of one requested sweep: the span and how it is split into
/// instrument-sized segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPlan", into = "RawPlan")]
pub struct SweepPlan {
    start: u64,
    end: u64,
    points_per_segment: usize,
    segments: usize,
    logarithmic: bool,
}

#[derive(Serialize, Deserialize)]
struct RawPlan {
    start: u64,
    end: u64,
    points_per_segment: usize,
    segments: usize,
    #[serde(default)]
    logarithmic: bool,
}

impl TryFrom<RawPlan> for SweepPlan {
    type Error = SweepError;

    fn try_from(raw: RawPlan) -> Result<Self, Self::Error> {
        SweepPlan::new(
            raw.start,
            raw.end,
            raw.points_per_segment,
            raw.segments,
            raw.logarithmic,
        )
    }
}

impl From<SweepPlan> for RawPlan {
    fn from(plan: SweepPlan) -> Self {
        RawPlan {
            start: plan.start,
            end: plan.end,
            points_per_segment: plan.points_per_segment,
            segments: plan.segments,
            logarithmic: plan.logarithmic,
        }
    }
}

impl SweepPlan {
    pub fn new(
        start: u64,
        end: u64,
        points_per_segment: usize,
        segments: usize,
        logarithmic: bool,
    ) -> AcquisitionResult<Self> {
        if points_per_segment == 0 || segments == 0 {
            return Err(SweepError::InvalidPlan(format!(
                "{} points x {} segments",
                points_per_segment, segments
            )));
        }
        if start >= end {
            return Err(SweepError::InvalidPlan(format!(
                "start {} Hz is not below end {} Hz",
                start, end
            )));
        }
        let step = Self::raw_stepsize(end - start, points_per_segment, segments);
        if step < 1.0 {
            return Err(SweepError::InvalidPlan(format!(
                "step size {:.3} Hz is below 1 Hz",
                step
            )));
        }
        Ok(Self {
            start,
            end,
            points_per_segment,
            segments,
            logarithmic,
        })
    }

    pub fn from_center_span(
        center: u64,
        span: u64,
        points_per_segment: usize,
        segments: usize,
        logarithmic: bool,
    ) -> AcquisitionResult<Self> {
        let half = span as f64 / 2.0;
        let start = (center as f64 - half).round();
        if start < 0.0 {
            return Err(SweepError::InvalidPlan(format!(
                "span {} Hz around {} Hz reaches below 0 Hz",
                span, center
            )));
        }
        let end = (center as f64 + half).round();
        Self::new(
            start as u64,
            end as u64,
            points_per_segment,
            segments,
            logarithmic,
        )
    }

    fn raw_stepsize(span: u64, points_per_segment: usize, segments: usize) -> f64 {
        let total = points_per_segment * segments;
        if total < 2 {
            return span as f64;
        }
        span as f64 / (total - 1) as f64
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn points_per_segment(&self) -> usize {
        self.points_per_segment
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn logarithmic(&self) -> bool {
        self.logarithmic
    }

    pub fn with_logarithmic(mut self, logarithmic: bool) -> Self {
        self.logarithmic = logarithmic;
        self
    }

    pub fn span(&self) -> u64 {
        self.end - self.start
    }

    pub fn center(&self) -> u64 {
        self.start + self.span() / 2
    }

    pub fn total_points(&self) -> usize {
        self.points_per_segment * self.segments
    }

    /// Frequency step between neighbouring points, rounded to whole Hz.
    pub fn stepsize(&self) -> u64 {
        Self::raw_stepsize(self.span(), self.points_per_segment, self.segments).round() as u64
    }

    fn exp_factor(&self, index: usize) -> f64 {
        let n = self.segments as f64;
        1.0 - (n + 1.0 - index as f64).ln() / (n + 1.0).ln()
    }

    /// Start and end frequency of segment `index`.
    pub fn segment_range(&self, index: usize) -> (u64, u64) {
        let (start, end) = if self.logarithmic {
            let span = self.span() as f64;
            let start = (self.start as f64 + span * self.exp_factor(index)).round() as u64;
            let end = (self.start as f64 + span * self.exp_factor(index + 1)).round() as u64;
            (start, end)
        } else {
            let step = self.stepsize();
            let start = self.start + (index * self.points_per_segment) as u64 * step;
            let end = start + (self.points_per_segment as u64 - 1) * step;
            (start, end)
        };
        debug!("segment_range({}) -> ({}, {})", index, start, end);
        (start, end)
    }

    /// Every sampled frequency of the plan, segment by segment.
    pub fn all_frequencies(&self) -> Frequencies {
        Frequencies {
            plan: *self,
            segment: 0,
            point: 0,
            current: None,
        }
    }
}

/// Lazy iterator over the frequency grid of a `SweepPlan`.
///
/// Each segment contributes `points_per_segment` values evenly spaced between
/// its start and end, both edges included.
#[derive(Debug, Clone)]
pub struct Frequencies {
    plan: SweepPlan,
    segment: usize,
    point: usize,
    current: Option<(u64, f64)>,
}

impl Iterator for Frequencies {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.segment >= self.plan.segments {
            return None;
        }
        let (plan, segment) = (self.plan, self.segment);
        let (start, step) = *self.current.get_or_insert_with(|| {
            let (start, end) = plan.segment_range(segment);
            let points = plan.points_per_segment;
            let step = if points > 1 {
                (end as f64 - start as f64) / (points - 1) as f64
            } else {
                0.0
            };
            (start, step)
        });
        let value = (start as f64 + step * self.point as f64).round() as u64;

        self.point += 1;
        if self.point >= self.plan.points_per_segment {
            self.point = 0;
            self.segment += 1;
            self.current = None;
        }
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .plan
            .total_points()
            .saturating_sub(self.segment * self.plan.points_per_segment + self.point);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frequencies {}
