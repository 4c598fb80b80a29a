//! Generic delta-debugging minimization, used to diagnose unsatisfiable resolutions by shrinking
//! the set of disallowed identifiers down to a minimal conflicting subset.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::dependency::Dependency;

/// The default wall-clock budget for one minimization run.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(10);

/// Raised when minimization doesn't converge inside its budget.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ReachedTimeLimit;

/// One of the two kinds of relaxation the resolver's unsatisfiability diagnosis considers for a
/// given identifier: whether it participates at all, and whether its own pin is honored.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Change {
    /// Allow this identifier to participate in the resolution at all.
    AllowPackage(Dependency),
    /// Allow this identifier to keep its originally requested pin/specifier, rather than being
    /// forced to `Unversioned`.
    AllowPin(Dependency),
}

/// Run delta-debugging minimization over `changes` against `predicate`, bounded by `budget`.
///
/// `predicate(subset)` must return `true` iff resolving with only `subset` allowed (all other
/// changes held back, i.e. their identifiers forced to `Unversioned`) still succeeds. The
/// returned set is 1-minimal: the predicate holds for it, and holds for neither the whole set
/// split into any finer chunking nor for the set with any single remaining element removed. An
/// empty result means no identifier needed to be disallowed at all.
///
/// Follows Zeller's `ddmin`: start by bisecting into halves, testing each half alone and each
/// half's complement; whichever shrinks the set, restart at coarse granularity against the new
/// set. When neither halves nor complements reduce it, double the granularity (quarters, eighths,
/// ...) before giving up, since some conflicts only disappear once a single element is isolated
/// rather than a whole half.
pub async fn run<T, F, Fut>(changes: Vec<T>, predicate: F, budget: Duration) -> Result<Vec<T>, ReachedTimeLimit>
where
    T: Clone + Eq,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = bool>,
{
    if predicate(Vec::new()).await {
        return Ok(Vec::new());
    }

    let deadline = Instant::now() + budget;
    let mut current = changes;
    let mut granularity = 2usize;

    loop {
        if Instant::now() > deadline {
            return Err(ReachedTimeLimit);
        }
        if current.len() < 2 {
            return Ok(current);
        }

        let chunk_size = current.len().div_ceil(granularity);
        let chunks: Vec<Vec<T>> = current.chunks(chunk_size).map(<[T]>::to_vec).collect();

        if let Some(chunk) = find_async(&chunks, &predicate, deadline).await? {
            current = chunk;
            granularity = 2;
            continue;
        }

        let complements: Vec<Vec<T>> = chunks
            .iter()
            .map(|chunk| current.iter().filter(|item| !chunk.contains(item)).cloned().collect())
            .collect();
        if let Some(complement) = find_async(&complements, &predicate, deadline).await? {
            current = complement;
            granularity = (granularity - 1).max(2);
            continue;
        }

        if granularity >= current.len() {
            return Ok(current);
        }
        granularity = (granularity * 2).min(current.len());
    }
}

/// Return the first candidate for which `predicate` holds, checking the deadline between tries.
async fn find_async<T, F, Fut>(candidates: &[Vec<T>], predicate: &F, deadline: Instant) -> Result<Option<Vec<T>>, ReachedTimeLimit>
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = bool>,
{
    for candidate in candidates {
        if Instant::now() > deadline {
            return Err(ReachedTimeLimit);
        }
        if predicate(candidate.clone()).await {
            return Ok(Some(candidate.clone()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_predicate_short_circuits() {
        let changes = vec![1, 2, 3];
        let result = run(changes, |_: Vec<i32>| async { true }, DEFAULT_TIME_BUDGET)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn finds_minimal_subset_containing_target() {
        let changes: Vec<i32> = (0..8).collect();
        // Predicate holds iff `5` is present in the subset (the "conflicting" element).
        let result = run(
            changes,
            |subset: Vec<i32>| async move { subset.contains(&5) },
            DEFAULT_TIME_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(result, vec![5]);
    }

    #[tokio::test]
    async fn returns_whole_set_when_only_the_full_combination_satisfies() {
        let changes: Vec<i32> = vec![1, 2];
        let result = run(
            changes.clone(),
            |subset: Vec<i32>| {
                let full = changes.clone();
                async move { subset.len() == full.len() }
            },
            DEFAULT_TIME_BUDGET,
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn reaches_time_limit_when_predicate_never_holds() {
        let changes: Vec<i32> = (0..16).collect();
        let result = run(
            changes,
            |_: Vec<i32>| async { false },
            Duration::from_millis(0),
        )
        .await;
        assert_eq!(result, Err(ReachedTimeLimit));
    }
}
