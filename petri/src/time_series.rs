//! Per-dish colony count time series.
//!
//! Frame/dish units may finish in any order. The aggregator collects their
//! outcomes and only orders them when the series are built, so the result
//! depends on frame timestamps alone.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::colony_counting::ColonyObservation;

/// Result of one successfully processed (frame, dish) unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    /// Position of the frame in the sorted input
    pub sequence: usize,
    pub timestamp: NaiveDateTime,
    pub dish_id: usize,
    pub count: usize,
    pub observations: Option<Vec<ColonyObservation>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: NaiveDateTime,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<ColonyObservation>>,
}

/// Colony counts of one dish, strictly ordered by timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishSeries {
    pub dish_id: usize,
    pub points: Vec<SeriesPoint>,
}

impl DishSeries {
    pub fn counts(&self) -> Vec<usize> {
        self.points.iter().map(|p| p.count).collect()
    }
}

#[derive(Debug, Default)]
pub struct SeriesAggregator {
    outcomes: BTreeMap<usize, Vec<UnitOutcome>>,
}

impl SeriesAggregator {
    /// Every listed dish gets a series, even if no unit for it succeeds.
    pub fn new(dish_ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            outcomes: dish_ids.into_iter().map(|id| (id, Vec::new())).collect(),
        }
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        match self.outcomes.get_mut(&outcome.dish_id) {
            Some(list) => list.push(outcome),
            None => warn!(
                "Ignoring result for unknown dish {} (frame {})",
                outcome.dish_id, outcome.sequence
            ),
        }
    }

    /// Sort each dish's outcomes by timestamp and build the series, in dish id order.
    pub fn finish(self) -> Vec<DishSeries> {
        self.outcomes
            .into_iter()
            .map(|(dish_id, mut outcomes)| {
                outcomes.sort_by(|a, b| {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then(a.sequence.cmp(&b.sequence))
                });

                let mut points: Vec<SeriesPoint> = Vec::with_capacity(outcomes.len());
                for outcome in outcomes {
                    if let Some(last) = points.last() {
                        if last.timestamp >= outcome.timestamp {
                            warn!(
                                "Dish {dish_id}: dropping second result for {}",
                                outcome.timestamp
                            );
                            continue;
                        }
                    }
                    points.push(SeriesPoint {
                        timestamp: outcome.timestamp,
                        count: outcome.count,
                        observations: outcome.observations,
                    });
                }
                DishSeries { dish_id, points }
            })
            .collect()
    }
}

/// Fold unit outcomes into one series per dish.
pub fn aggregate(
    dish_ids: impl IntoIterator<Item = usize>,
    outcomes: impl IntoIterator<Item = UnitOutcome>,
) -> Vec<DishSeries> {
    let mut aggregator = SeriesAggregator::new(dish_ids);
    for outcome in outcomes {
        aggregator.record(outcome);
    }
    aggregator.finish()
}
