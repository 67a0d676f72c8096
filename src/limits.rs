use chrono::NaiveDate;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ADDRESS_LEN: usize = 512;
pub const MAX_ID_LEN: usize = 64;

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Longest campaign or availability window, in days.
pub const MAX_SPAN_DAYS: i64 = 3660;

pub const MAX_LINKS_PER_BILLBOARD: usize = 10_000;
pub const MAX_BILLBOARD_DIMENSION_MT: f64 = 1_000.0;

pub const MIN_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(1970, 1, 1) {
    Some(d) => d,
    None => panic!("invalid MIN_VALID_DATE"),
};

pub const MAX_VALID_DATE: NaiveDate = match NaiveDate::from_ymd_opt(9999, 12, 31) {
    Some(d) => d,
    None => panic!("invalid MAX_VALID_DATE"),
};
