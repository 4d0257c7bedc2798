//! Split strategies: which target segment a surviving document lands in.
//!
//! A strategy is created once per merge plan from a [`SplitStrategyConfig`],
//! prepared with a view of the reclaim state, and then queried once per
//! surviving document while the reclaim map is built. [`SplitSegmentStrategy::process`]
//! must be a pure function of the prepared state and its arguments, so calls
//! may arrive in any order.
//!
//! # Strategies
//!
//! - `default`: balances surviving documents evenly across targets in
//!   arrival order.
//! - `time_series`: buckets documents by a numeric attribute against
//!   ascending range boundaries.
//! - any other name: looked up in the [`SplitStrategyRegistry`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmergeError};
use crate::merge::reclaim_map::ReclaimFilter;
use crate::segment::{AttributeValueReader, DocId, SegmentId};

pub const DEFAULT_STRATEGY: &str = "default";
pub const TIME_SERIES_STRATEGY: &str = "time_series";

/// Name and parameters of the split strategy a plan uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitStrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Default for SplitStrategyConfig {
    fn default() -> Self {
        SplitStrategyConfig {
            name: DEFAULT_STRATEGY.to_string(),
            params: BTreeMap::new(),
        }
    }
}

impl SplitStrategyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        SplitStrategyConfig {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> SplitStrategyKind {
        match self.name.as_str() {
            DEFAULT_STRATEGY => SplitStrategyKind::Default,
            TIME_SERIES_STRATEGY => SplitStrategyKind::TimeSeries,
            other => SplitStrategyKind::Custom(other.to_string()),
        }
    }

    fn param(&self, key: &str) -> Result<&str> {
        self.params.get(key).map(String::as_str).ok_or_else(|| {
            SegmergeError::config(format!(
                "split strategy {:?} requires parameter {key:?}",
                self.name
            ))
        })
    }
}

/// The closed set of strategy families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitStrategyKind {
    Default,
    TimeSeries,
    Custom(String),
}

/// Decides the target segment index of each surviving document.
pub trait SplitSegmentStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Number of target segments this strategy distributes into.
    fn target_segment_count(&self) -> usize;

    /// Called once, after deduplication and before the first `process` call.
    fn prepare(&mut self, _filter: &ReclaimFilter<'_>) -> Result<()> {
        Ok(())
    }

    /// Target segment index of a surviving document.
    fn process(&self, segment_id: SegmentId, doc_id: DocId) -> Result<usize>;
}

/// Constructs a custom strategy from its configuration and target count.
pub type SplitStrategyFactory =
    Arc<dyn Fn(&SplitStrategyConfig, usize) -> Result<Box<dyn SplitSegmentStrategy>> + Send + Sync>;

/// Named factories for custom strategies.
#[derive(Clone, Default)]
pub struct SplitStrategyRegistry {
    factories: AHashMap<String, SplitStrategyFactory>,
}

impl SplitStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Built-in names cannot be overridden.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&SplitStrategyConfig, usize) -> Result<Box<dyn SplitSegmentStrategy>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if name == DEFAULT_STRATEGY || name == TIME_SERIES_STRATEGY {
            return Err(SegmergeError::config(format!(
                "split strategy name {name:?} is reserved"
            )));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&SplitStrategyFactory> {
        self.factories.get(name)
    }
}

impl fmt::Debug for SplitStrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("SplitStrategyRegistry")
            .field("factories", &names)
            .finish()
    }
}

/// Create the strategy a config names, for `target_count` targets.
pub fn create_split_strategy(
    config: &SplitStrategyConfig,
    target_count: usize,
    attributes: Option<&Arc<dyn AttributeValueReader>>,
    registry: &SplitStrategyRegistry,
) -> Result<Box<dyn SplitSegmentStrategy>> {
    if target_count == 0 {
        return Err(SegmergeError::config("output segment count must be positive"));
    }

    let strategy: Box<dyn SplitSegmentStrategy> = match config.kind() {
        SplitStrategyKind::Default => Box::new(DefaultSplitStrategy::new(target_count)),
        SplitStrategyKind::TimeSeries => {
            let reader = attributes.cloned().ok_or_else(|| {
                SegmergeError::config("time_series split requires an attribute reader")
            })?;
            Box::new(TimeSeriesSplitStrategy::from_config(config, target_count, reader)?)
        }
        SplitStrategyKind::Custom(name) => {
            let factory = registry.get(&name).ok_or_else(|| {
                SegmergeError::config(format!("unknown split strategy {name:?}"))
            })?;
            factory(config, target_count)?
        }
    };

    if strategy.target_segment_count() != target_count {
        return Err(SegmergeError::config(format!(
            "split strategy {:?} distributes into {} targets, plan asks for {target_count}",
            config.name,
            strategy.target_segment_count()
        )));
    }
    Ok(strategy)
}

/// Balances surviving documents evenly in global arrival order.
///
/// With `T` surviving documents and `N` targets, the first `T % N` targets
/// receive `ceil(T / N)` documents and the rest `floor(T / N)`. Preparing
/// records where each target's run starts, so `process` is a binary search.
#[derive(Debug, Clone)]
pub struct DefaultSplitStrategy {
    target_count: usize,
    segment_indexes: AHashMap<SegmentId, usize>,
    /// `(segment_index, doc_id, target)` of the first document of each run.
    run_starts: Vec<(usize, DocId, usize)>,
    total_valid_doc_count: u64,
}

impl DefaultSplitStrategy {
    pub fn new(target_count: usize) -> Self {
        DefaultSplitStrategy {
            target_count,
            segment_indexes: AHashMap::new(),
            run_starts: Vec::new(),
            total_valid_doc_count: 0,
        }
    }

    pub fn total_valid_doc_count(&self) -> u64 {
        self.total_valid_doc_count
    }

    /// Documents assigned to `target` out of `total`.
    pub fn quota(total: u64, target_count: usize, target: usize) -> u64 {
        let n = target_count as u64;
        total / n + u64::from((target as u64) < total % n)
    }
}

impl SplitSegmentStrategy for DefaultSplitStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY
    }

    fn target_segment_count(&self) -> usize {
        self.target_count
    }

    fn prepare(&mut self, filter: &ReclaimFilter<'_>) -> Result<()> {
        let infos = filter.infos();
        self.segment_indexes = infos
            .iter()
            .enumerate()
            .map(|(index, info)| (info.segment_id, index))
            .collect();

        let mut total = 0u64;
        for (segment_index, info) in infos.iter().enumerate() {
            total += (0..info.doc_count)
                .filter(|&doc| !filter.is_reclaimed(segment_index, doc))
                .count() as u64;
        }
        self.total_valid_doc_count = total;

        self.run_starts.clear();
        let mut target = 0usize;
        let mut remaining = Self::quota(total, self.target_count, 0);
        let mut run_open = false;
        for (segment_index, info) in infos.iter().enumerate() {
            for doc in 0..info.doc_count {
                if filter.is_reclaimed(segment_index, doc) {
                    continue;
                }
                while remaining == 0 {
                    target += 1;
                    remaining = Self::quota(total, self.target_count, target);
                    run_open = false;
                }
                if !run_open {
                    self.run_starts.push((segment_index, doc, target));
                    run_open = true;
                }
                remaining -= 1;
            }
        }
        Ok(())
    }

    fn process(&self, segment_id: SegmentId, doc_id: DocId) -> Result<usize> {
        let segment_index = *self.segment_indexes.get(&segment_id).ok_or_else(|| {
            SegmergeError::invalid_operation(format!(
                "segment {segment_id} is not part of the prepared plan"
            ))
        })?;
        let key = (segment_index, doc_id);
        let pos = self
            .run_starts
            .partition_point(|&(seg, doc, _)| (seg, doc) <= key);
        Ok(match pos {
            0 => 0,
            pos => self.run_starts[pos - 1].2,
        })
    }
}

/// Buckets documents by a numeric attribute.
///
/// With boundaries `b0 < b1 < ... < bn-1`, a value `v` goes to the number
/// of boundaries `<= v`, giving `n + 1` targets. Documents without a numeric
/// value go to target 0.
pub struct TimeSeriesSplitStrategy {
    attribute: String,
    boundaries: Vec<f64>,
    reader: Arc<dyn AttributeValueReader>,
}

impl TimeSeriesSplitStrategy {
    pub fn new(
        attribute: impl Into<String>,
        boundaries: Vec<f64>,
        reader: Arc<dyn AttributeValueReader>,
    ) -> Result<Self> {
        if boundaries.iter().any(|b| b.is_nan()) {
            return Err(SegmergeError::config("time_series boundaries must be numbers"));
        }
        if boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(SegmergeError::config(
                "time_series boundaries must be strictly ascending",
            ));
        }
        Ok(TimeSeriesSplitStrategy {
            attribute: attribute.into(),
            boundaries,
            reader,
        })
    }

    /// Parses `attribute` and comma-separated `ranges` parameters.
    pub fn from_config(
        config: &SplitStrategyConfig,
        target_count: usize,
        reader: Arc<dyn AttributeValueReader>,
    ) -> Result<Self> {
        let attribute = config.param("attribute")?;
        let boundaries = config
            .param("ranges")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>().map_err(|_| {
                    SegmergeError::config(format!("invalid time_series boundary {s:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if boundaries.len() + 1 != target_count {
            return Err(SegmergeError::config(format!(
                "time_series with {} boundaries produces {} targets, plan asks for {target_count}",
                boundaries.len(),
                boundaries.len() + 1
            )));
        }
        Self::new(attribute, boundaries, reader)
    }

    pub fn bucket_of(&self, value: f64) -> usize {
        self.boundaries.partition_point(|&b| b <= value)
    }
}

impl fmt::Debug for TimeSeriesSplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeSeriesSplitStrategy")
            .field("attribute", &self.attribute)
            .field("boundaries", &self.boundaries)
            .finish()
    }
}

impl SplitSegmentStrategy for TimeSeriesSplitStrategy {
    fn name(&self) -> &str {
        TIME_SERIES_STRATEGY
    }

    fn target_segment_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    fn process(&self, segment_id: SegmentId, doc_id: DocId) -> Result<usize> {
        let value = self.reader.read(&self.attribute, segment_id, doc_id)?;
        Ok(value
            .and_then(|v| v.as_f64())
            .filter(|v| !v.is_nan())
            .map(|v| self.bucket_of(v))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{AttributeValue, MemorySegment, MemorySegmentSet, NoDeletions};

    #[test]
    fn test_quota_is_balanced() {
        let quotas: Vec<u64> = (0..3).map(|t| DefaultSplitStrategy::quota(10, 3, t)).collect();
        assert_eq!(quotas, vec![4, 3, 3]);
        assert_eq!(DefaultSplitStrategy::quota(2, 4, 3), 0);
    }

    #[test]
    fn test_default_strategy_runs() {
        let infos = crate::segment::SegmentMergeInfos::stacked(&[(1, 3, 0), (2, 4, 0)]);
        let filter = ReclaimFilter::new(&infos, &NoDeletions, None);
        let mut strategy = DefaultSplitStrategy::new(3);
        strategy.prepare(&filter).unwrap();

        assert_eq!(strategy.total_valid_doc_count(), 7);
        let targets: Vec<usize> = infos
            .iter()
            .flat_map(|info| (0..info.doc_count).map(move |d| (info.segment_id, d)))
            .map(|(seg, doc)| strategy.process(seg, doc).unwrap())
            .collect();
        assert_eq!(targets, vec![0, 0, 0, 1, 1, 2, 2]);

        // Order of calls does not matter.
        assert_eq!(strategy.process(2, 3).unwrap(), 2);
        assert_eq!(strategy.process(1, 0).unwrap(), 0);
        assert!(strategy.process(9, 0).is_err());
    }

    #[test]
    fn test_time_series_buckets() {
        let mut seg = MemorySegment::new(1, 4);
        seg.set_attribute("ts", 0, AttributeValue::Int(5)).unwrap();
        seg.set_attribute("ts", 1, AttributeValue::Int(10)).unwrap();
        seg.set_attribute("ts", 2, AttributeValue::Float(25.5)).unwrap();
        let mut set = MemorySegmentSet::new();
        set.push(seg).unwrap();
        let reader: Arc<dyn AttributeValueReader> = Arc::new(set);

        let config = SplitStrategyConfig::new(TIME_SERIES_STRATEGY)
            .with_param("attribute", "ts")
            .with_param("ranges", "10, 20");
        let strategy =
            create_split_strategy(&config, 3, Some(&reader), &SplitStrategyRegistry::new()).unwrap();

        assert_eq!(strategy.process(1, 0).unwrap(), 0);
        assert_eq!(strategy.process(1, 1).unwrap(), 1);
        assert_eq!(strategy.process(1, 2).unwrap(), 2);
        // Missing value.
        assert_eq!(strategy.process(1, 3).unwrap(), 0);
    }

    #[test]
    fn test_time_series_config_errors() {
        let reader: Arc<dyn AttributeValueReader> = Arc::new(MemorySegmentSet::new());
        let registry = SplitStrategyRegistry::new();

        let mismatched = SplitStrategyConfig::new(TIME_SERIES_STRATEGY)
            .with_param("attribute", "ts")
            .with_param("ranges", "10");
        assert!(create_split_strategy(&mismatched, 3, Some(&reader), &registry)
            .unwrap_err()
            .is_config());

        let unordered = SplitStrategyConfig::new(TIME_SERIES_STRATEGY)
            .with_param("attribute", "ts")
            .with_param("ranges", "20,10");
        assert!(create_split_strategy(&unordered, 3, Some(&reader), &registry).is_err());

        let no_reader = SplitStrategyConfig::new(TIME_SERIES_STRATEGY)
            .with_param("attribute", "ts")
            .with_param("ranges", "1");
        assert!(create_split_strategy(&no_reader, 2, None, &registry).is_err());
    }

    #[derive(Debug)]
    struct ModuloStrategy(usize);

    impl SplitSegmentStrategy for ModuloStrategy {
        fn name(&self) -> &str {
            "modulo"
        }

        fn target_segment_count(&self) -> usize {
            self.0
        }

        fn process(&self, _segment_id: SegmentId, doc_id: DocId) -> Result<usize> {
            Ok(doc_id as usize % self.0)
        }
    }

    #[test]
    fn test_custom_registry() {
        let mut registry = SplitStrategyRegistry::new();
        registry
            .register("modulo", |_config, count| Ok(Box::new(ModuloStrategy(count)) as _))
            .unwrap();
        assert!(registry.register(DEFAULT_STRATEGY, |_, c| Ok(Box::new(ModuloStrategy(c)) as _)).is_err());

        let config = SplitStrategyConfig::new("modulo");
        assert_eq!(config.kind(), SplitStrategyKind::Custom("modulo".to_string()));
        let strategy = create_split_strategy(&config, 2, None, &registry).unwrap();
        assert_eq!(strategy.process(0, 3).unwrap(), 1);

        let unknown = SplitStrategyConfig::new("nope");
        assert!(create_split_strategy(&unknown, 2, None, &registry)
            .unwrap_err()
            .is_config());
    }
}
