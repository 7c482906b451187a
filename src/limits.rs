//! Hard caps that keep one property, one request or one query bounded.

pub const MAX_PROPERTIES: usize = 100_000;
pub const MAX_RANGES_PER_PROPERTY: usize = 10_000;
pub const MAX_RESERVATIONS_PER_PROPERTY: usize = 50_000;

/// Longest single price range (about ten years).
pub const MAX_RANGE_NIGHTS: u32 = 3_660;
/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: u32 = 366;
/// Longest rolling estimate.
pub const MAX_ESTIMATE_NIGHTS: u32 = 366;
/// Widest calendar query.
pub const MAX_CALENDAR_NIGHTS: u32 = 3_660;

/// Highest nightly price, in whole currency units.
pub const MAX_NIGHTLY_PRICE: i64 = 1_000_000_000;

pub const MAX_BATCH_SIZE: usize = 1_000;
pub const MAX_GUESTS: u32 = 1_000;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 2200;
