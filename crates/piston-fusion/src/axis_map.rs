use crate::{AxisId, HashMap, HashSet, RVec, RejectReason};

/// Old-axis-id to new-axis-id renaming for one subgraph, in insertion order.
///
/// Each source maps to at most one target and no two sources share a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisPairSet {
    pairs: Vec<(AxisId, AxisId)>,
}

impl AxisPairSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(axes: impl IntoIterator<Item = AxisId>) -> Self {
        let mut set = Self::new();
        for a in axes {
            if !set.contains(a) {
                set.pairs.push((a, a));
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AxisId, AxisId)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn get(&self, from: AxisId) -> Option<AxisId> {
        self.pairs.iter().find(|(f, _)| *f == from).map(|(_, t)| *t)
    }

    pub fn source_of(&self, to: AxisId) -> Option<AxisId> {
        self.pairs.iter().find(|(_, t)| *t == to).map(|(f, _)| *f)
    }

    pub fn contains(&self, from: AxisId) -> bool {
        self.get(from).is_some()
    }

    pub fn targets(&self) -> HashSet<AxisId> {
        self.pairs.iter().map(|(_, t)| *t).collect()
    }

    /// Add `from -> to`. Returns `Ok(false)` if the pair was already present.
    pub fn insert(&mut self, from: AxisId, to: AxisId) -> Result<bool, RejectReason> {
        match (self.get(from), self.source_of(to)) {
            (Some(t), _) if t == to => Ok(false),
            (None, None) => {
                self.pairs.push((from, to));
                Ok(true)
            }
            _ => Err(RejectReason::AxisMapInconsistent),
        }
    }

    pub fn merge(&mut self, other: &AxisPairSet) -> Result<(), RejectReason> {
        for (from, to) in other.iter() {
            self.insert(from, to)?;
        }
        Ok(())
    }

    /// Rewrite `axes` through the map. `None` if any axis is unmapped.
    pub fn apply(&self, axes: &[AxisId]) -> Option<RVec<AxisId>> {
        axes.iter().map(|a| self.get(*a)).collect()
    }
}

impl FromIterator<(AxisId, AxisId)> for AxisPairSet {
    /// Later pairs that conflict with earlier ones are dropped.
    fn from_iter<I: IntoIterator<Item = (AxisId, AxisId)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (from, to) in iter {
            let _ = set.insert(from, to);
        }
        set
    }
}

/// Place every element of `short` at a distinct index of `long`.
///
/// Tries an order-preserving forward scan first; if that cannot place every element,
/// falls back to the first unused equal slot for each element in turn.
pub fn find_axis_index<T: PartialEq>(short: &[T], long: &[T]) -> Option<RVec<usize>> {
    find_axis_index_by(short.len(), long.len(), |i, j| short[i] == long[j])
}

/// [`find_axis_index`] with a caller-provided element comparison.
pub fn find_axis_index_by(
    short_len: usize,
    long_len: usize,
    eq: impl Fn(usize, usize) -> bool,
) -> Option<RVec<usize>> {
    if short_len > long_len {
        return None;
    }

    let mut found = RVec::with_capacity(short_len);
    let mut j = 0;
    for i in 0..short_len {
        while j < long_len && !eq(i, j) {
            j += 1;
        }
        if j == long_len {
            break;
        }
        found.push(j);
        j += 1;
    }
    if found.len() == short_len {
        return Some(found);
    }

    found.clear();
    let mut used = vec![false; long_len];
    for i in 0..short_len {
        let j = (0..long_len).find(|&j| !used[j] && eq(i, j))?;
        used[j] = true;
        found.push(j);
    }
    Some(found)
}

/// Two maps agree when one's target set contains the other's and no source is sent
/// to different targets.
pub fn is_same_map_axis(existing: &AxisPairSet, candidate: &AxisPairSet) -> bool {
    let a = existing.targets();
    let b = candidate.targets();
    let union = a.union(&b).count();
    union == a.len().max(b.len())
        && candidate
            .iter()
            .all(|(from, to)| existing.get(from).is_none_or(|t| t == to))
}

/// Renumber both maps' targets to `[0, n)`.
///
/// The larger map is numbered first, by insertion order; the smaller reuses its
/// numbers and appends any target the larger never mentions.
pub fn flatten_to_contiguous_ids(
    map1: &AxisPairSet,
    map2: &AxisPairSet,
) -> (AxisPairSet, AxisPairSet) {
    let mut renumber: HashMap<AxisId, AxisId> = HashMap::default();
    let mut dense = |target: AxisId| {
        let next = AxisId(renumber.len());
        *renumber.entry(target).or_insert(next)
    };
    let mut rename = |set: &AxisPairSet| -> AxisPairSet {
        AxisPairSet {
            pairs: set.iter().map(|(f, t)| (f, dense(t))).collect(),
        }
    };
    if map1.len() >= map2.len() {
        let a = rename(map1);
        let b = rename(map2);
        (a, b)
    } else {
        let b = rename(map2);
        let a = rename(map1);
        (a, b)
    }
}
