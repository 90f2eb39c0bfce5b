//! Seeded train/validation/test partitioning.
use crate::datasets::Sample;
use crate::error::{LabError, LabWarning, Result};
use crate::rng::seed_shuffle;
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Smallest share any split may be given, in percent.
pub const DEFAULT_MIN_SPLIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    #[serde(rename = "val")]
    Validation,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Validation, Split::Test];
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        };
        f.write_str(name)
    }
}

/// Integer split percentages summing to 100, each at least `floor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitPercentages {
    train: u32,
    val: u32,
    test: u32,
    #[serde(skip)]
    floor: u32,
}

/// One pie-chart slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SplitShare {
    pub split: Split,
    pub percent: u32,
    pub fraction: f64,
}

impl SplitPercentages {
    /// Clamp `train` and `val` into a valid triple; test takes the rest.
    pub fn new(train: u32, val: u32, floor: u32) -> Result<Self> {
        if floor == 0 || floor * 3 > 100 {
            return Err(LabError::InvalidConfiguration(format!(
                "split floor must be between 1 and 33 percent, got {floor}"
            )));
        }
        let train = train.clamp(floor, 100 - 2 * floor);
        let mut val = val.min(100 - train);
        if 100 - train - val < floor {
            val = 100 - train - floor;
        }
        val = val.max(floor);
        Ok(Self {
            train,
            val,
            test: 100 - train - val,
            floor,
        })
    }

    /// Move the train slider; validation gives way so test keeps its floor.
    pub fn with_train(self, value: u32) -> Self {
        let floor = self.floor;
        let train = value.clamp(floor, 100 - 2 * floor);
        let remaining = 100 - train;
        let mut val = self.val;
        if remaining.saturating_sub(val) < floor {
            val = remaining - floor;
        }
        val = val.max(floor);
        Self {
            train,
            val,
            test: 100 - train - val,
            floor,
        }
    }

    /// Move the validation slider; train gives way so test keeps its floor.
    pub fn with_val(self, value: u32) -> Self {
        let floor = self.floor;
        let val = value.clamp(floor, 100 - 2 * floor);
        let mut train = self.train;
        if train + val > 100 - floor {
            train = 100 - floor - val;
        }
        train = train.max(floor);
        Self {
            train,
            val,
            test: 100 - train - val,
            floor,
        }
    }

    pub fn train(&self) -> u32 {
        self.train
    }

    pub fn val(&self) -> u32 {
        self.val
    }

    pub fn test(&self) -> u32 {
        self.test
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn percent(&self, split: Split) -> u32 {
        match split {
            Split::Train => self.train,
            Split::Validation => self.val,
            Split::Test => self.test,
        }
    }

    /// Pie-chart-ready shares in train, validation, test order.
    pub fn proportions(&self) -> [SplitShare; 3] {
        Split::ALL.map(|split| {
            let percent = self.percent(split);
            SplitShare {
                split,
                percent,
                fraction: percent as f64 / 100.0,
            }
        })
    }
}

/// Sample counts per split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl SplitSummary {
    pub fn total(&self) -> usize {
        self.train + self.validation + self.test
    }
}

/// Disjoint, exhaustive train/validation/test assignment of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<L> {
    pub train: Vec<Sample<L>>,
    pub validation: Vec<Sample<L>>,
    pub test: Vec<Sample<L>>,
}

impl<L> Partition<L> {
    pub fn get(&self, split: Split) -> &[Sample<L>] {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.validation,
            Split::Test => &self.test,
        }
    }

    pub fn summary(&self) -> SplitSummary {
        SplitSummary {
            train: self.train.len(),
            validation: self.validation.len(),
            test: self.test.len(),
        }
    }

    /// Empty validation/test splits degrade results instead of failing.
    pub fn warnings(&self) -> Vec<LabWarning> {
        [Split::Validation, Split::Test]
            .into_iter()
            .filter(|&s| self.get(s).is_empty())
            .map(LabWarning::EmptySplit)
            .collect()
    }
}

/// Shuffle `samples` with `seed` and slice it by `percentages`.
///
/// Train and validation counts are rounded from the percentages; test takes
/// whatever remains, so it may fall below the percentage floor on small data.
pub fn partition<L: Clone>(samples: &[Sample<L>], seed: u64, percentages: SplitPercentages) -> Partition<L> {
    let shuffled = seed_shuffle(samples, seed);
    let total = shuffled.len();
    let rounded = |pct: u32| (pct as f64 / 100.0 * total as f64).round() as usize;
    let train_count = rounded(percentages.train).min(total);
    let val_count = rounded(percentages.val).min(total - train_count);

    let mut rest = shuffled;
    let mut tail = rest.split_off(train_count);
    let test = tail.split_off(val_count);
    let partition = Partition {
        train: rest,
        validation: tail,
        test,
    };
    for warning in partition.warnings() {
        warn!(%warning, total, "partition produced an empty split");
    }
    partition
}
