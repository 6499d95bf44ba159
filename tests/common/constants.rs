use std::time::Duration;

pub const TRACK_A: &str = "spotify:track:aaaa";
pub const TRACK_B: &str = "spotify:track:bbbb";
pub const TRACK_C: &str = "spotify:track:cccc";

pub const TRACK_DURATION_MS: u64 = 180_000;

/// Upper bound for waiting on the reconciler in real-time tests.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub const TEST_TOKEN: &str = "test-access-token";
