//! Time-bucketed decimation of observation streams.
//!
//! A [`Decimator`] wraps any iterator of [`Timestamped`] items and yields the subsequence to
//! keep, in input order. Decisions are made one item at a time from the item's timestamp and
//! a small [`DecimationState`]; nothing is buffered and nothing is looked ahead at.
//!
//! Timestamps need not be monotonic. Clock resets and re-transmissions simply produce a
//! different bucket key and are handled like any other item.

use crate::record::meter::MeterRecord;
use crate::record::Observation;
use chrono::{NaiveDateTime, Timelike};

/// Anything with a wall-clock time that decimation can bucket.
pub trait Timestamped {
    /// The item's time; only its minute and hour fields are consulted.
    fn timestamp(&self) -> NaiveDateTime;
}

impl Timestamped for Observation {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp.naive_utc()
    }
}

impl Timestamped for MeterRecord {
    fn timestamp(&self) -> NaiveDateTime {
        self.recorded
    }
}

/// How items are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimationPolicy {
    /// Emit everything.
    PassThrough,
    /// Bucket key is `minute % interval_minutes`; emit the first item whose key differs from
    /// the key of the last emitted item.
    Bucketed {
        /// Interval in minutes, 1..=60.
        interval_minutes: u32,
    },
    /// Emit whenever the hour differs from the hour of the last emission.
    Hourly,
    /// Emit every item whose minute is a multiple of `interval_minutes`. Stateless.
    Aligned {
        /// Interval in minutes, 1..=60.
        interval_minutes: u32,
    },
}

impl DecimationPolicy {
    /// `Bucketed` for a non-zero interval, `PassThrough` for zero.
    #[must_use]
    pub fn from_interval(interval_minutes: u32) -> Self {
        match interval_minutes {
            0 => DecimationPolicy::PassThrough,
            interval_minutes => DecimationPolicy::Bucketed { interval_minutes },
        }
    }

    /// `Aligned` for a non-zero interval, `PassThrough` for zero.
    #[must_use]
    pub fn aligned(interval_minutes: u32) -> Self {
        match interval_minutes {
            0 => DecimationPolicy::PassThrough,
            interval_minutes => DecimationPolicy::Aligned { interval_minutes },
        }
    }

    /// The bucket key of `time` under this policy, if the policy uses keys.
    #[must_use]
    pub fn bucket(&self, time: &NaiveDateTime) -> Option<u32> {
        match *self {
            DecimationPolicy::Bucketed { interval_minutes } => {
                Some(time.minute() % interval_minutes.max(1))
            }
            DecimationPolicy::Hourly => Some(time.hour()),
            DecimationPolicy::PassThrough | DecimationPolicy::Aligned { .. } => None,
        }
    }
}

/// Per-stream decimation memory. Create one per input and drop it at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecimationState {
    last_emitted_bucket: Option<u32>,
}

impl DecimationState {
    /// Fresh state; the first keyed item is always emitted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of the last emitted item, if any.
    #[must_use]
    pub fn last_emitted_bucket(&self) -> Option<u32> {
        self.last_emitted_bucket
    }

    /// Decides whether the item at `time` is emitted, updating the state.
    pub fn admit(&mut self, policy: &DecimationPolicy, time: &NaiveDateTime) -> bool {
        match *policy {
            DecimationPolicy::PassThrough => true,
            DecimationPolicy::Bucketed { .. } | DecimationPolicy::Hourly => {
                let key = policy.bucket(time);
                if key == self.last_emitted_bucket {
                    return false;
                }
                self.last_emitted_bucket = key;
                true
            }
            DecimationPolicy::Aligned { interval_minutes } => {
                time.minute() % interval_minutes.max(1) == 0
            }
        }
    }
}

/// Iterator adapter yielding the decimated subsequence of `inner`.
#[derive(Debug)]
pub struct Decimator<I> {
    inner: I,
    policy: DecimationPolicy,
    state: DecimationState,
    dropped: usize,
}

impl<I> Decimator<I> {
    /// Wraps `inner` with a fresh state.
    pub fn new(inner: I, policy: DecimationPolicy) -> Self {
        Self {
            inner,
            policy,
            state: DecimationState::new(),
            dropped: 0,
        }
    }

    /// Items suppressed so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<I> Iterator for Decimator<I>
where
    I: Iterator,
    I::Item: Timestamped,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = self.inner.next()?;
            if self.state.admit(&self.policy, &item.timestamp()) {
                return Some(item);
            }
            self.dropped += 1;
        }
    }
}

/// Adds `.decimate(policy)` to iterators of timestamped items.
pub trait DecimateExt: Iterator + Sized {
    /// Wraps `self` in a [`Decimator`].
    fn decimate(self, policy: DecimationPolicy) -> Decimator<Self>
    where
        Self::Item: Timestamped,
    {
        Decimator::new(self, policy)
    }
}

impl<I: Iterator> DecimateExt for I {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct At(NaiveDateTime);

    impl Timestamped for At {
        fn timestamp(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn at(hour: u32, minute: u32, second: u32) -> At {
        At(NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap())
    }

    fn kept(items: Vec<At>, policy: DecimationPolicy) -> Vec<(u32, u32, u32)> {
        items
            .into_iter()
            .decimate(policy)
            .map(|At(t)| (t.hour(), t.minute(), t.second()))
            .collect()
    }

    #[test]
    fn pass_through_keeps_everything() {
        let items = vec![at(1, 0, 0), at(1, 0, 1), at(1, 0, 2)];
        assert_eq!(kept(items, DecimationPolicy::from_interval(0)).len(), 3);
    }

    #[test]
    fn same_minute_bucket_keeps_first() {
        let items = vec![at(1, 0, 5), at(1, 0, 30)];
        assert_eq!(
            kept(items, DecimationPolicy::from_interval(60)),
            vec![(1, 0, 5)]
        );
    }

    #[test]
    fn emission_resumes_after_a_long_run_of_drops() {
        let mut items: Vec<At> = (0..50).map(|s| at(1, 7, s)).collect();
        items.push(at(1, 8, 0));
        items.push(at(1, 8, 1));
        items.push(at(1, 9, 0));
        let mut decimator = items.into_iter().decimate(DecimationPolicy::from_interval(60));
        let kept: Vec<u32> = decimator.by_ref().map(|At(t)| t.minute()).collect();
        assert_eq!(kept, vec![7, 8, 9]);
        assert_eq!(decimator.dropped(), 50);
    }

    #[test]
    fn bucketed_keys_wrap_on_interval() {
        // Keys: 0, 0, 1, 1, 0 with interval 5.
        let items = vec![at(1, 5, 0), at(1, 10, 0), at(1, 11, 0), at(1, 16, 0), at(1, 20, 0)];
        assert_eq!(
            kept(items, DecimationPolicy::from_interval(5)),
            vec![(1, 5, 0), (1, 11, 0), (1, 20, 0)]
        );
    }

    #[test]
    fn clock_reset_is_just_another_bucket() {
        let items = vec![at(5, 30, 0), at(0, 0, 0), at(0, 0, 10), at(5, 30, 0)];
        assert_eq!(
            kept(items, DecimationPolicy::from_interval(60)),
            vec![(5, 30, 0), (0, 0, 0), (5, 30, 0)]
        );
    }

    #[test]
    fn hourly_emits_first_row_and_each_hour_change() {
        let items = vec![at(1, 0, 0), at(1, 30, 0), at(2, 5, 0), at(2, 55, 0), at(1, 0, 0)];
        assert_eq!(
            kept(items, DecimationPolicy::Hourly),
            vec![(1, 0, 0), (2, 5, 0), (1, 0, 0)]
        );
    }

    #[test]
    fn aligned_keeps_every_item_on_the_mark() {
        let items = vec![
            at(1, 4, 0),
            at(1, 5, 0),
            at(1, 5, 20),
            at(1, 6, 0),
            at(1, 10, 0),
        ];
        assert_eq!(
            kept(items, DecimationPolicy::aligned(5)),
            vec![(1, 5, 0), (1, 5, 20), (1, 10, 0)]
        );
    }

    #[test]
    fn aligned_keeps_consecutive_marks() {
        let items = vec![at(0, 0, 0), at(1, 0, 0), at(2, 0, 0)];
        assert_eq!(
            kept(items, DecimationPolicy::aligned(60)),
            vec![(0, 0, 0), (1, 0, 0), (2, 0, 0)]
        );
        let mut state = DecimationState::new();
        assert!(state.admit(&DecimationPolicy::aligned(5), &at(1, 5, 0).0));
        assert_eq!(state, DecimationState::new());
    }

    #[test]
    fn state_records_last_emitted_bucket() {
        let mut state = DecimationState::new();
        let policy = DecimationPolicy::from_interval(60);
        assert_eq!(state.last_emitted_bucket(), None);
        assert!(state.admit(&policy, &at(1, 42, 0).0));
        assert_eq!(state.last_emitted_bucket(), Some(42));
        assert!(!state.admit(&policy, &at(1, 42, 9).0));
        assert_eq!(state.last_emitted_bucket(), Some(42));
    }
}
