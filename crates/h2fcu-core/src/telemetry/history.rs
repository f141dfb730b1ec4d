//! Chart history window

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::MachineState;

/// One plotted sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    /// Seconds since the oldest retained point
    pub relative_time_seconds: f64,
    /// Epoch milliseconds
    pub absolute_timestamp: i64,
    /// Stack voltage, V
    pub voltage: f64,
    /// Stack current, A
    pub current: f64,
    /// Stack temperature, °C
    pub temperature: f64,
}

/// Sliding window of chart points, oldest first
#[derive(Debug, Clone)]
pub struct ChartHistory {
    window_ms: i64,
    points: VecDeque<ChartPoint>,
}

impl ChartHistory {
    /// Empty history keeping points for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            points: VecDeque::new(),
        }
    }

    /// Append a sample taken at `now_ms`, evict anything older than the
    /// window and rebase relative times on the oldest survivor.
    pub fn push(&mut self, state: &MachineState, now_ms: i64) {
        self.points.push_back(ChartPoint {
            relative_time_seconds: 0.0,
            absolute_timestamp: now_ms,
            voltage: state.power.stack_voltage,
            current: state.power.stack_current,
            temperature: state.sensors.stack_temp,
        });

        while let Some(oldest) = self.points.front() {
            if now_ms - oldest.absolute_timestamp > self.window_ms {
                self.points.pop_front();
            } else {
                break;
            }
        }

        if let Some(base) = self.points.front().map(|p| p.absolute_timestamp) {
            for point in self.points.iter_mut() {
                point.relative_time_seconds = (point.absolute_timestamp - base) as f64 / 1000.0;
            }
        }
    }

    /// Points, oldest first
    pub fn points(&self) -> impl Iterator<Item = &ChartPoint> {
        self.points.iter()
    }

    /// Owned copy, oldest first
    pub fn to_vec(&self) -> Vec<ChartPoint> {
        self.points.iter().copied().collect()
    }

    /// Points held
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no point is held
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Drop every point
    pub fn clear(&mut self) {
        self.points.clear();
    }
}
