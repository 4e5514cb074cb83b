//! Thread-local record of every property evaluation, kept so a DST harness
//! can assert `sometimes!` properties were actually exercised by the end of
//! a run (a `sometimes!` that's never `true` is a silent coverage gap, not a
//! crash, so it needs this out-of-band bookkeeping to be caught at all).

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::PropertyKind;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyRecord {
    pub kind: PropertyKind,
    pub name: &'static str,
    pub details: &'static str,
    pub evaluations: u64,
    pub times_true: u64,
}

thread_local! {
    static REGISTRY: RefCell<BTreeMap<&'static str, PropertyRecord>> = RefCell::new(BTreeMap::new());
}

pub(crate) fn record(kind: PropertyKind, name: &'static str, holds: bool, details: &'static str) {
    REGISTRY.with(|r| {
        let mut r = r.borrow_mut();
        let entry = r.entry(name).or_insert(PropertyRecord {
            kind,
            name,
            details,
            evaluations: 0,
            times_true: 0,
        });
        entry.evaluations += 1;
        if holds {
            entry.times_true += 1;
        }
    });
}

/// Snapshots every property recorded on the current thread so far.
pub fn snapshot() -> Vec<PropertyRecord> {
    REGISTRY.with(|r| r.borrow().values().cloned().collect())
}

/// Clears the current thread's registry; call between independent DST runs
/// in the same process so coverage from one run doesn't mask a gap in the
/// next.
pub fn reset() {
    REGISTRY.with(|r| r.borrow_mut().clear());
}

/// Names of every `sometimes!` property recorded so far that was never
/// observed `true` — the set a DST harness should fail the run over.
pub fn unsatisfied_sometimes() -> Vec<&'static str> {
    REGISTRY.with(|r| {
        r.borrow()
            .values()
            .filter(|rec| rec.kind == PropertyKind::Sometimes && rec.times_true == 0)
            .map(|rec| rec.name)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsatisfied_sometimes_reports_never_true_properties() {
        reset();
        crate::sometimes!(false, "reg_test_never_hit", {});
        crate::sometimes!(true, "reg_test_hit", {});
        let gaps = unsatisfied_sometimes();
        assert!(gaps.contains(&"reg_test_never_hit"));
        assert!(!gaps.contains(&"reg_test_hit"));
    }

    #[test]
    fn reset_clears_prior_evaluations() {
        reset();
        crate::always!(true, "reg_test_reset", {});
        assert_eq!(snapshot().len(), 1);
        reset();
        assert!(snapshot().is_empty());
    }
}
