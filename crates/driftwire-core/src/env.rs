//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (monotonic time, wall
//! clock, timers). Production uses [`SystemEnv`]; tests use
//! [`test_utils::MockEnv`] with a manually advanced virtual clock so timeout
//! and backoff behavior is reproducible without sleeping.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Abstract environment providing time and timers.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards within one execution context
/// - `unix_millis()` tracks the wall clock used for record timestamps
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; simulation
    /// environments may substitute virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Used to stamp `created_at`/`suspended_at` on records; never used for
    /// timeout arithmetic (that is what [`Environment::now`] is for).
    fn unix_millis(&self) -> i64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be
    /// used by driver code (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// Production environment backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn unix_millis(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Test environments with controllable clocks.
pub mod test_utils {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicI64, AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::Environment;

    /// Deterministic environment for tests.
    ///
    /// Monotonic time starts at construction and only moves when
    /// [`MockEnv::advance`] is called; the wall clock is set explicitly.
    /// `sleep` resolves immediately so drivers under test never block.
    #[derive(Debug, Clone)]
    pub struct MockEnv {
        start: Instant,
        offset_millis: Arc<AtomicU64>,
        wall_millis: Arc<AtomicI64>,
    }

    impl MockEnv {
        /// Create a mock environment at time zero.
        #[must_use]
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
                offset_millis: Arc::new(AtomicU64::new(0)),
                wall_millis: Arc::new(AtomicI64::new(0)),
            }
        }

        /// Advance the virtual monotonic clock.
        pub fn advance(&self, duration: Duration) {
            self.offset_millis.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        }

        /// Set the wall clock returned by `unix_millis`.
        pub fn set_unix_millis(&self, millis: i64) {
            self.wall_millis.store(millis, Ordering::SeqCst);
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.start + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
        }

        fn unix_millis(&self) -> i64 {
            self.wall_millis.load(Ordering::SeqCst)
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }
    }

}
