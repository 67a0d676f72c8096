use crate::model::*;

use super::conflict::check_no_conflict;

// ── Availability Algorithm ────────────────────────────────────────

/// True when no booking on the billboard overlaps `query`.
pub fn is_free(bs: &BillboardState, query: &DateSpan) -> bool {
    bs.overlapping(query).next().is_none()
}

/// Billboards among `candidates` with no booking overlapping `query`.
///
/// Deleted billboards are never returned. Output is sorted by id so repeated
/// queries over unchanged state produce identical results.
pub fn free_billboards<'a, I>(candidates: I, query: &DateSpan) -> Vec<Billboard>
where
    I: IntoIterator<Item = &'a BillboardState>,
{
    let mut free: Vec<Billboard> = candidates
        .into_iter()
        .filter(|bs| !bs.billboard.is_deleted && is_free(bs, query))
        .map(|bs| bs.billboard.clone())
        .collect();
    free.sort_by(|a, b| a.id.cmp(&b.id));
    free
}

/// Check every billboard of a campaign against a proposed new span, skipping
/// the campaign's own booking. Returns the first conflict found.
pub fn check_redate<'a, I>(
    linked: I,
    campaign_id: &str,
    proposed: &DateSpan,
) -> Result<(), super::EngineError>
where
    I: IntoIterator<Item = &'a BillboardState>,
{
    for bs in linked {
        check_no_conflict(bs, proposed, Some(campaign_id))?;
    }
    Ok(())
}

/// Cost of running a campaign on the given billboards for its whole span.
pub fn campaign_total(span: &DateSpan, billboards: &[Billboard]) -> f64 {
    let days = span.days() as f64;
    billboards
        .iter()
        .filter(|b| !b.is_deleted)
        .map(|b| b.dollars_per_day * days)
        .sum()
}

/// Every pair of bookings on the billboard is disjoint.
#[cfg(test)]
pub fn bookings_disjoint(bs: &BillboardState) -> bool {
    bs.bookings
        .iter()
        .enumerate()
        .all(|(i, a)| bs.bookings[i + 1..].iter().all(|b| !a.span.overlaps(&b.span)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(d(a), d(b))
    }

    fn billboard(id: &str, rate: f64) -> BillboardState {
        BillboardState::new(Billboard {
            id: id.into(),
            location_id: "loc_1".into(),
            width_mt: 10.0,
            height_mt: 3.0,
            dollars_per_day: rate,
            created_at: 0,
            is_deleted: false,
        })
    }

    fn book(bs: &mut BillboardState, campaign: &str, a: &str, b: &str) {
        bs.insert_booking(Booking {
            campaign_id: campaign.into(),
            span: span(a, b),
        });
    }

    #[test]
    fn booked_billboard_excluded_inside_window() {
        let mut b1 = billboard("bill_1", 100.0);
        book(&mut b1, "camp_1", "2024-01-01", "2024-01-10");
        let b2 = billboard("bill_2", 100.0);

        let free = free_billboards([&b1, &b2], &span("2024-01-05", "2024-01-06"));
        let ids: Vec<_> = free.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bill_2"]);
    }

    #[test]
    fn booked_billboard_included_after_window() {
        let mut b1 = billboard("bill_1", 100.0);
        book(&mut b1, "camp_1", "2024-01-01", "2024-01-10");

        let free = free_billboards([&b1], &span("2024-01-11", "2024-01-20"));
        assert_eq!(free.len(), 1);
    }

    #[test]
    fn boundary_day_blocks() {
        let mut b1 = billboard("bill_1", 100.0);
        book(&mut b1, "camp_1", "2024-01-01", "2024-01-10");
        assert!(free_billboards([&b1], &span("2024-01-10", "2024-01-20")).is_empty());
        assert!(free_billboards([&b1], &span("2023-12-25", "2024-01-01")).is_empty());
    }

    #[test]
    fn free_between_two_bookings() {
        let mut b1 = billboard("bill_1", 100.0);
        book(&mut b1, "camp_1", "2024-01-01", "2024-01-10");
        book(&mut b1, "camp_2", "2024-01-20", "2024-01-31");
        assert!(is_free(&b1, &span("2024-01-11", "2024-01-19")));
        assert!(!is_free(&b1, &span("2024-01-11", "2024-01-20")));
    }

    #[test]
    fn deleted_billboards_never_free() {
        let mut b1 = billboard("bill_1", 100.0);
        b1.billboard.is_deleted = true;
        assert!(free_billboards([&b1], &span("2024-01-01", "2024-01-02")).is_empty());
    }

    #[test]
    fn output_sorted_by_id() {
        let b3 = billboard("bill_3", 1.0);
        let b1 = billboard("bill_1", 1.0);
        let b2 = billboard("bill_2", 1.0);
        let free = free_billboards([&b3, &b1, &b2], &span("2024-01-01", "2024-01-02"));
        let ids: Vec<_> = free.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["bill_1", "bill_2", "bill_3"]);
    }

    #[test]
    fn redate_checks_every_linked_billboard() {
        let mut b1 = billboard("bill_1", 1.0);
        book(&mut b1, "camp_1", "2024-01-01", "2024-01-10");
        let mut b2 = billboard("bill_2", 1.0);
        book(&mut b2, "camp_1", "2024-01-01", "2024-01-10");
        book(&mut b2, "camp_9", "2024-01-15", "2024-01-20");

        assert!(check_redate([&b1, &b2], "camp_1", &span("2024-01-01", "2024-01-14")).is_ok());
        let err = check_redate([&b1, &b2], "camp_1", &span("2024-01-01", "2024-01-15")).unwrap_err();
        assert!(matches!(err, super::super::EngineError::Conflict { ref billboard_id, .. } if billboard_id == "bill_2"));
    }

    #[test]
    fn campaign_total_multiplies_days_and_rates() {
        let b1 = billboard("bill_1", 100.0).billboard;
        let b2 = billboard("bill_2", 50.5).billboard;
        let total = campaign_total(&span("2024-02-01", "2024-02-05"), &[b1, b2]);
        assert!((total - 752.5).abs() < 1e-9);
    }

    #[test]
    fn disjoint_helper_detects_overlap() {
        let mut b1 = billboard("bill_1", 1.0);
        book(&mut b1, "camp_1", "2024-01-01", "2024-01-10");
        book(&mut b1, "camp_2", "2024-01-11", "2024-01-12");
        assert!(bookings_disjoint(&b1));
        book(&mut b1, "camp_3", "2024-01-12", "2024-01-13");
        assert!(!bookings_disjoint(&b1));
    }
}
