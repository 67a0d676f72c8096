use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;

use super::availability::check_redate;
use super::conflict::{
    now_ms, validate_coordinates, validate_country_code, validate_dimensions, validate_span,
    validate_text,
};
use super::store::{ensure_visible, new_id, paginate, visible};
use super::{Engine, EngineError, Repository, redate_booking};

fn validate_location(loc: &Location) -> Result<(), EngineError> {
    validate_text("address", &loc.address, MAX_ADDRESS_LEN)?;
    validate_text("city", &loc.city, MAX_NAME_LEN)?;
    validate_text("state", &loc.state, MAX_NAME_LEN)?;
    validate_country_code(&loc.country_code)?;
    validate_coordinates(loc.lat, loc.lng)
}

// ── Locations ────────────────────────────────────────────

#[async_trait]
impl Repository<Location> for Engine {
    async fn create(&self, draft: NewLocation) -> Result<Location, EngineError> {
        let _gate = self.write_gate().await;
        let loc = Location {
            id: new_id::<Location>(),
            address: draft.address,
            city: draft.city,
            state: draft.state,
            country_code: draft.country_code.to_ascii_uppercase(),
            lat: draft.lat,
            lng: draft.lng,
            created_at: now_ms(),
            is_deleted: false,
        };
        validate_location(&loc)?;

        self.log(Event::LocationCreated(loc.clone())).await?;
        self.locations
            .insert(loc.id.clone(), Arc::new(RwLock::new(loc.clone())));
        tracing::debug!(id = %loc.id, "location created");
        Ok(loc)
    }

    async fn get(&self, id: &str, include_deleted: bool) -> Result<Location, EngineError> {
        let loc = self.location_arc(id)?.read().await.clone();
        ensure_visible(&loc, include_deleted)?;
        Ok(loc)
    }

    async fn list(&self, page: Page, include_deleted: bool) -> Vec<Location> {
        let arcs: Vec<_> = self.locations.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let loc = arc.read().await;
            if visible(&*loc, include_deleted) {
                rows.push(loc.clone());
            }
        }
        paginate(rows, page)
    }

    async fn update(&self, id: &str, patch: LocationPatch) -> Result<Location, EngineError> {
        let _gate = self.write_gate().await;
        let arc = self.location_arc(id)?;
        let mut guard = arc.write().await;
        ensure_visible(&*guard, false)?;

        let mut next = guard.clone();
        if let Some(v) = patch.address {
            next.address = v;
        }
        if let Some(v) = patch.city {
            next.city = v;
        }
        if let Some(v) = patch.state {
            next.state = v;
        }
        if let Some(v) = patch.country_code {
            next.country_code = v.to_ascii_uppercase();
        }
        if let Some(v) = patch.lat {
            next.lat = v;
        }
        if let Some(v) = patch.lng {
            next.lng = v;
        }
        validate_location(&next)?;

        self.log(Event::LocationUpdated(next.clone())).await?;
        *guard = next.clone();
        Ok(next)
    }

    async fn soft_delete(&self, id: &str) -> Result<(), EngineError> {
        let _gate = self.write_gate().await;
        let arc = self.location_arc(id)?;
        // Billboard create holds this lock for reading while it indexes itself.
        let mut guard = arc.write().await;
        ensure_visible(&*guard, false)?;
        if self.location_has_billboards(id) {
            return Err(EngineError::HasBillboards(id.to_string()));
        }

        self.log(Event::LocationDeleted { id: id.to_string() }).await?;
        guard.is_deleted = true;
        tracing::debug!(id, "location deleted");
        Ok(())
    }
}

// ── Billboards ───────────────────────────────────────────

#[async_trait]
impl Repository<Billboard> for Engine {
    async fn create(&self, draft: NewBillboard) -> Result<Billboard, EngineError> {
        let _gate = self.write_gate().await;
        validate_dimensions(draft.width_mt, draft.height_mt, draft.dollars_per_day)?;

        let loc_arc = self.location_arc(&draft.location_id)?;
        let loc = loc_arc.read().await;
        ensure_visible(&*loc, false)?;

        let bb = Billboard {
            id: new_id::<Billboard>(),
            location_id: draft.location_id,
            width_mt: draft.width_mt,
            height_mt: draft.height_mt,
            dollars_per_day: draft.dollars_per_day,
            created_at: now_ms(),
            is_deleted: false,
        };
        self.log(Event::BillboardCreated(bb.clone())).await?;
        self.billboards.insert(
            bb.id.clone(),
            Arc::new(RwLock::new(BillboardState::new(bb.clone()))),
        );
        self.index_billboard(&bb.location_id, &bb.id);
        drop(loc);

        tracing::debug!(id = %bb.id, location = %bb.location_id, "billboard created");
        Ok(bb)
    }

    async fn get(&self, id: &str, include_deleted: bool) -> Result<Billboard, EngineError> {
        let bb = self.billboard_arc(id)?.read().await.billboard.clone();
        ensure_visible(&bb, include_deleted)?;
        Ok(bb)
    }

    async fn list(&self, page: Page, include_deleted: bool) -> Vec<Billboard> {
        let arcs: Vec<_> = self.billboards.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let bs = arc.read().await;
            if visible(&bs.billboard, include_deleted) {
                rows.push(bs.billboard.clone());
            }
        }
        paginate(rows, page)
    }

    async fn update(&self, id: &str, patch: BillboardPatch) -> Result<Billboard, EngineError> {
        let _gate = self.write_gate().await;
        // Location before billboard.
        let new_loc = match &patch.location_id {
            Some(loc_id) => {
                let guard = self.location_arc(loc_id)?.read_owned().await;
                ensure_visible(&*guard, false)?;
                Some(guard)
            }
            None => None,
        };

        let mut bs = self.lock_billboard(id).await?;
        let mut next = bs.billboard.clone();
        if let Some(v) = patch.location_id {
            next.location_id = v;
        }
        if let Some(v) = patch.width_mt {
            next.width_mt = v;
        }
        if let Some(v) = patch.height_mt {
            next.height_mt = v;
        }
        if let Some(v) = patch.dollars_per_day {
            next.dollars_per_day = v;
        }
        validate_dimensions(next.width_mt, next.height_mt, next.dollars_per_day)?;

        self.log(Event::BillboardUpdated(next.clone())).await?;
        if next.location_id != bs.billboard.location_id {
            self.unindex_billboard(&bs.billboard.location_id, id);
            self.index_billboard(&next.location_id, id);
        }
        bs.billboard = next.clone();
        drop(bs);
        drop(new_loc);
        Ok(next)
    }

    async fn soft_delete(&self, id: &str) -> Result<(), EngineError> {
        let _gate = self.write_gate().await;
        let mut bs = self.lock_billboard(id).await?;
        if !bs.bookings.is_empty() {
            return Err(EngineError::HasBookings(id.to_string()));
        }

        self.log(Event::BillboardDeleted { id: id.to_string() }).await?;
        bs.billboard.is_deleted = true;
        self.unindex_billboard(&bs.billboard.location_id, id);
        tracing::debug!(id, "billboard deleted");
        Ok(())
    }
}

// ── Campaigns ────────────────────────────────────────────

#[async_trait]
impl Repository<Campaign> for Engine {
    async fn create(&self, draft: NewCampaign) -> Result<Campaign, EngineError> {
        let _gate = self.write_gate().await;
        validate_text("name", &draft.name, MAX_NAME_LEN)?;
        let span = validate_span(draft.start_date, draft.end_date)?;

        let campaign = Campaign {
            id: new_id::<Campaign>(),
            name: draft.name,
            span,
            created_at: now_ms(),
            is_deleted: false,
        };
        self.log(Event::CampaignCreated(campaign.clone())).await?;
        self.campaigns.insert(
            campaign.id.clone(),
            Arc::new(RwLock::new(CampaignState::new(campaign.clone()))),
        );
        tracing::debug!(id = %campaign.id, span = %campaign.span, "campaign created");
        Ok(campaign)
    }

    async fn get(&self, id: &str, include_deleted: bool) -> Result<Campaign, EngineError> {
        let campaign = self.campaign_arc(id)?.read().await.campaign.clone();
        ensure_visible(&campaign, include_deleted)?;
        Ok(campaign)
    }

    async fn list(&self, page: Page, include_deleted: bool) -> Vec<Campaign> {
        let arcs: Vec<_> = self.campaigns.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::with_capacity(arcs.len());
        for arc in arcs {
            let cs = arc.read().await;
            if visible(&cs.campaign, include_deleted) {
                rows.push(cs.campaign.clone());
            }
        }
        paginate(rows, page)
    }

    /// Re-dating a linked campaign is checked against every linked billboard
    /// and rejected as a whole if any of them is taken on the new dates.
    async fn update(&self, id: &str, patch: CampaignPatch) -> Result<Campaign, EngineError> {
        let _gate = self.write_gate().await;
        let mut cs = self.lock_campaign(id).await?;

        let mut next = cs.campaign.clone();
        if let Some(name) = patch.name {
            validate_text("name", &name, MAX_NAME_LEN)?;
            next.name = name;
        }
        let start = patch.start_date.unwrap_or(next.span.start);
        let end = patch.end_date.unwrap_or(next.span.end);
        next.span = validate_span(start, end)?;

        let mut linked = if next.span != cs.campaign.span {
            self.lock_billboards(&cs.billboard_ids).await?
        } else {
            Vec::new()
        };
        check_redate(linked.iter().map(|g| &**g), id, &next.span)?;

        self.log(Event::CampaignUpdated(next.clone())).await?;
        for bs in linked.iter_mut() {
            redate_booking(bs, id, next.span);
        }
        cs.campaign = next.clone();
        Ok(next)
    }

    /// Soft-deletes the campaign and releases all of its billboards.
    async fn soft_delete(&self, id: &str) -> Result<(), EngineError> {
        let _gate = self.write_gate().await;
        let mut cs = self.lock_campaign(id).await?;
        let mut linked = self.lock_billboards(&cs.billboard_ids).await?;

        self.log(Event::CampaignDeleted { id: id.to_string() }).await?;
        for bs in linked.iter_mut() {
            bs.remove_booking(id);
        }
        let released = std::mem::take(&mut cs.billboard_ids).len();
        cs.campaign.is_deleted = true;
        tracing::debug!(id, released, "campaign deleted");
        Ok(())
    }
}
