use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Unix milliseconds, used for creation timestamps.
pub type Ms = i64;

/// Closed calendar interval `[start, end]`, both days included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    /// Number of days covered, counting both endpoints.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Touching endpoints count: `[1, 10]` and `[10, 20]` share day 10.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

impl std::fmt::Display for DateSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ── Entity records ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub country_code: String,
    pub lat: f64,
    pub lng: f64,
    pub created_at: Ms,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Billboard {
    pub id: String,
    pub location_id: String,
    pub width_mt: f64,
    pub height_mt: f64,
    pub dollars_per_day: f64,
    pub created_at: Ms,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub span: DateSpan,
    pub created_at: Ms,
    pub is_deleted: bool,
}

// ── Drafts and patches ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    pub address: String,
    pub city: String,
    pub state: String,
    pub country_code: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationPatch {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country_code: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBillboard {
    pub location_id: String,
    pub width_mt: f64,
    pub height_mt: f64,
    pub dollars_per_day: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BillboardPatch {
    pub location_id: Option<String>,
    pub width_mt: Option<f64>,
    pub height_mt: Option<f64>,
    pub dollars_per_day: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// ── Live state ───────────────────────────────────────────────────

/// One side of a booking link, stored on the billboard with the campaign's dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub campaign_id: String,
    pub span: DateSpan,
}

#[derive(Debug, Clone)]
pub struct BillboardState {
    pub billboard: Billboard,
    /// Bookings sorted by `span.start`. Never mutually overlapping.
    pub bookings: Vec<Booking>,
}

impl BillboardState {
    pub fn new(billboard: Billboard) -> Self {
        Self {
            billboard,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, campaign_id: &str) -> Option<Booking> {
        let pos = self
            .bookings
            .iter()
            .position(|b| b.campaign_id == campaign_id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn is_booked_by(&self, campaign_id: &str) -> bool {
        self.bookings.iter().any(|b| b.campaign_id == campaign_id)
    }

    /// Bookings whose span overlaps the query under the closed-interval rule.
    /// Binary search skips bookings starting after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start <= query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end >= query.start)
    }
}

#[derive(Debug, Clone)]
pub struct CampaignState {
    pub campaign: Campaign,
    pub billboard_ids: BTreeSet<String>,
}

impl CampaignState {
    pub fn new(campaign: Campaign) -> Self {
        Self {
            campaign,
            billboard_ids: BTreeSet::new(),
        }
    }
}

/// WAL record format. Records carry full rows so replay never recomputes defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    LocationCreated(Location),
    LocationUpdated(Location),
    LocationDeleted { id: String },
    BillboardCreated(Billboard),
    BillboardUpdated(Billboard),
    BillboardDeleted { id: String },
    CampaignCreated(Campaign),
    CampaignUpdated(Campaign),
    /// Soft delete; also releases every link of the campaign.
    CampaignDeleted { id: String },
    BillboardAttached { campaign_id: String, billboard_id: String },
    BillboardDetached { campaign_id: String, billboard_id: String },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: crate::limits::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Result of an attach or detach. `changed` is false for a detach of an absent link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfirmation {
    pub campaign_id: String,
    pub billboard_id: String,
    pub changed: bool,
}

/// A billboard together with the location it stands at.
#[derive(Debug, Clone, PartialEq)]
pub struct BillboardWithLocation {
    pub billboard: Billboard,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSummary {
    pub campaign: Campaign,
    pub billboard_count: usize,
    pub total_dollars: f64,
}
