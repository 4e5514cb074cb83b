//! Antithesis-style ALWAYS/SOMETIMES/NEVER property annotations for
//! deterministic simulation testing (DST).
//!
//! These macros let the rest of the workspace declare properties about
//! runtime behavior inline, at the point where the property is checkable,
//! rather than reconstructing it after the fact from logs:
//!
//! - [`always!`] — must be true every time this line is reached.
//! - [`sometimes!`] — must be true at least once, somewhere, across a run.
//! - [`never!`] — must never be true.
//!
//! With the `sim` feature enabled, every evaluation is recorded in a
//! thread-local [`registry`] a test harness can inspect at the end of a run
//! to check that `sometimes!` properties were actually exercised. Without
//! `sim`, the macros still evaluate their condition (so a violated
//! `always!`/`never!` still panics in a plain `cargo test` run) but record
//! nothing — zero overhead in release builds that don't opt in.

#[cfg(feature = "sim")]
pub mod registry;

/// Declares a condition that must hold every time this point is reached.
///
/// ```
/// prime_properties::always!(1 + 1 == 2, "arithmetic still works", {});
/// ```
#[macro_export]
macro_rules! always {
    ($cond:expr, $name:expr, $details:expr) => {{
        let holds = $cond;
        $crate::__record(
            $crate::PropertyKind::Always,
            $name,
            holds,
            ::std::stringify!($details),
        );
        ::std::assert!(holds, "ALWAYS violated: {}", $name);
    }};
}

/// Declares a condition that must be true at least once across a run.
/// Unlike [`always!`], a single `false` evaluation is not itself a failure
/// — only a run that *never* observes `true` is. Checking that requires the
/// `sim` feature's registry; without it this degrades to a no-op record.
#[macro_export]
macro_rules! sometimes {
    ($cond:expr, $name:expr, $details:expr) => {{
        let holds = $cond;
        $crate::__record(
            $crate::PropertyKind::Sometimes,
            $name,
            holds,
            ::std::stringify!($details),
        );
    }};
}

/// Declares a condition that must never be true.
#[macro_export]
macro_rules! never {
    ($cond:expr, $name:expr, $details:expr) => {{
        let holds = $cond;
        $crate::__record(
            $crate::PropertyKind::Never,
            $name,
            holds,
            ::std::stringify!($details),
        );
        ::std::assert!(!holds, "NEVER violated: {}", $name);
    }};
}

/// The three property kinds a single named assertion site can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyKind {
    Always,
    Sometimes,
    Never,
}

/// Not part of the public API; called only by the `always!`/`sometimes!`/
/// `never!` macros so their expansion stays small.
#[doc(hidden)]
pub fn __record(kind: PropertyKind, name: &'static str, holds: bool, details: &'static str) {
    #[cfg(feature = "sim")]
    registry::record(kind, name, holds, details);
    #[cfg(not(feature = "sim"))]
    let _ = (kind, name, holds, details);
}

#[cfg(test)]
mod tests {
    #[test]
    fn always_true_passes() {
        crate::always!(2 + 2 == 4, "math", {});
    }

    #[test]
    #[should_panic(expected = "ALWAYS violated")]
    fn always_false_panics() {
        crate::always!(1 == 2, "broken math", {});
    }

    #[test]
    fn sometimes_false_does_not_panic() {
        crate::sometimes!(false, "rare path", {});
    }

    #[test]
    fn never_true_panics() {
        let result = std::panic::catch_unwind(|| {
            crate::never!(true, "impossible state", {});
        });
        assert!(result.is_err());
    }
}
