use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Build a span for a read-only query. Any ordered interval is accepted.
pub(crate) fn validate_query_span(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    if start > end {
        return Err(EngineError::ReversedSpan { start, end });
    }
    Ok(DateSpan::new(start, end))
}

/// Campaign dates: ordered, inside the valid date range and at most `MAX_SPAN_DAYS` long.
pub(crate) fn validate_span(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, EngineError> {
    if start > end {
        return Err(EngineError::ReversedSpan { start, end });
    }
    if start < MIN_VALID_DATE || end > MAX_VALID_DATE {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    let span = DateSpan::new(start, end);
    if span.days() > MAX_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(span)
}

/// Fail with `Conflict` if any booking on the billboard overlaps `span`.
/// `ignore_campaign` skips the campaign's own booking when re-dating it.
pub(crate) fn check_no_conflict(
    bs: &BillboardState,
    span: &DateSpan,
    ignore_campaign: Option<&str>,
) -> Result<(), EngineError> {
    let blocking = bs
        .overlapping(span)
        .find(|b| ignore_campaign != Some(b.campaign_id.as_str()));
    match blocking {
        Some(b) => Err(EngineError::Conflict {
            billboard_id: bs.billboard.id.clone(),
            span: *span,
            blocking_campaign: b.campaign_id.clone(),
        }),
        None => Ok(()),
    }
}

pub(crate) fn validate_text(field: &'static str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(field, "must not be empty"));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

pub(crate) fn validate_country_code(code: &str) -> Result<(), EngineError> {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(EngineError::invalid("country_code", "expected two letters"));
    }
    Ok(())
}

pub(crate) fn validate_coordinates(lat: f64, lng: f64) -> Result<(), EngineError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(EngineError::invalid("lat", format!("{lat} outside [-90, 90]")));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(EngineError::invalid("lng", format!("{lng} outside [-180, 180]")));
    }
    Ok(())
}

pub(crate) fn validate_dimensions(width: f64, height: f64, rate: f64) -> Result<(), EngineError> {
    for (field, v) in [("width_mt", width), ("height_mt", height)] {
        if !v.is_finite() || v <= 0.0 {
            return Err(EngineError::invalid(field, "must be positive"));
        }
        if v > MAX_BILLBOARD_DIMENSION_MT {
            return Err(EngineError::LimitExceeded("billboard dimension too large"));
        }
    }
    if !rate.is_finite() || rate < 0.0 {
        return Err(EngineError::invalid("dollars_per_day", "must be zero or more"));
    }
    Ok(())
}
