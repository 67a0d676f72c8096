use chrono::NaiveDate;

use crate::model::*;

use super::availability::{campaign_total, free_billboards, is_free};
use super::conflict::validate_query_span;
use super::store::{ensure_visible, paginate, visible};
use super::{Engine, EngineError, Repository, SharedBillboardState};

impl Engine {
    /// Billboards with no booking overlapping `[start, end]`, sorted by id.
    pub async fn find_available(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Billboard>, EngineError> {
        let span = validate_query_span(start, end)?;
        Ok(self.scan_free(&span).await)
    }

    /// Billboards free for the whole interval of an existing campaign.
    pub async fn find_available_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<Billboard>, EngineError> {
        let campaign = Repository::<Campaign>::get(self, campaign_id, false).await?;
        Ok(self.scan_free(&campaign.span).await)
    }

    /// Availability by campaign or by explicit interval, never both.
    pub async fn find_available_by(
        &self,
        campaign_id: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Billboard>, EngineError> {
        match (campaign_id, start, end) {
            (Some(id), None, None) => self.find_available_for_campaign(id).await,
            (None, Some(start), Some(end)) => self.find_available(start, end).await,
            _ => Err(EngineError::AmbiguousAvailabilityQuery),
        }
    }

    /// True iff the billboard has no booking overlapping `[start, end]`.
    pub async fn check_availability(
        &self,
        billboard_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<bool, EngineError> {
        let span = validate_query_span(start, end)?;
        let bs = self.billboard_arc(billboard_id)?;
        let guard = bs.read().await;
        ensure_visible(&guard.billboard, false)?;
        Ok(is_free(&guard, &span))
    }

    pub async fn campaign_summary(&self, campaign_id: &str) -> Result<CampaignSummary, EngineError> {
        let (campaign, billboards) = self.links_for_campaign(campaign_id).await?;
        Ok(CampaignSummary {
            total_dollars: campaign_total(&campaign.span, &billboards),
            billboard_count: billboards.len(),
            campaign,
        })
    }

    /// Billboards standing at a location, sorted by id. Live billboards come
    /// from the location index; soft-deleted ones need a full scan.
    pub async fn billboards_at_location(
        &self,
        location_id: &str,
        page: Page,
        include_deleted: bool,
    ) -> Result<Vec<Billboard>, EngineError> {
        Repository::<Location>::get(self, location_id, include_deleted).await?;

        let arcs: Vec<SharedBillboardState> = if include_deleted {
            self.billboards.iter().map(|e| e.value().clone()).collect()
        } else {
            let ids: Vec<String> = self
                .billboards_by_location
                .get(location_id)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();
            ids.iter()
                .map(|id| self.billboard_arc(id))
                .collect::<Result<_, _>>()?
        };

        let mut rows = Vec::new();
        for arc in arcs {
            let bs = arc.read().await;
            if bs.billboard.location_id == location_id && visible(&bs.billboard, include_deleted) {
                rows.push(bs.billboard.clone());
            }
        }
        Ok(paginate(rows, page))
    }

    /// Pair each billboard with its location record.
    pub async fn with_locations(
        &self,
        billboards: Vec<Billboard>,
    ) -> Result<Vec<BillboardWithLocation>, EngineError> {
        let mut out = Vec::with_capacity(billboards.len());
        for billboard in billboards {
            let location = self.location_arc(&billboard.location_id)?.read().await.clone();
            out.push(BillboardWithLocation { billboard, location });
        }
        Ok(out)
    }

    /// Read-lock every billboard in ascending id order and filter the free ones.
    async fn scan_free(&self, span: &DateSpan) -> Vec<Billboard> {
        let mut arcs: Vec<(String, SharedBillboardState)> = self
            .billboards
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        arcs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut guards = Vec::with_capacity(arcs.len());
        for (_, arc) in arcs {
            guards.push(arc.read_owned().await);
        }
        free_billboards(guards.iter().map(|g| &**g), span)
    }
}
