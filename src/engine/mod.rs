mod availability;
mod conflict;
mod entities;
mod error;
mod links;
mod queries;
mod store;

pub use availability::{campaign_total, free_billboards, is_free};
pub use error::{EngineError, ErrorKind};
pub use store::{Entity, Repository, visible};

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};

use crate::model::*;
use crate::wal::{Wal, WalHandle};

pub type SharedLocation = Arc<RwLock<Location>>;
pub type SharedBillboardState = Arc<RwLock<BillboardState>>;
pub type SharedCampaignState = Arc<RwLock<CampaignState>>;

/// In-memory inventory backed by the WAL.
///
/// Lock order: write gate, location, then campaign, then billboards in ascending
/// id order.
/// Anything walking from a billboard to its campaigns drops the billboard lock first.
pub struct Engine {
    pub(super) locations: DashMap<String, SharedLocation>,
    pub(super) billboards: DashMap<String, SharedBillboardState>,
    pub(super) campaigns: DashMap<String, SharedCampaignState>,
    /// Location id → non-deleted billboards standing there.
    pub(super) billboards_by_location: DashMap<String, BTreeSet<String>>,
    /// Held shared by every mutation from its first lock until it is applied;
    /// compaction holds it exclusively.
    writes: RwLock<()>,
    wal: WalHandle,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    pub fn open(wal_path: &Path) -> std::io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = WalHandle::spawn(Wal::open(wal_path)?);

        let engine = Self {
            locations: DashMap::new(),
            billboards: DashMap::new(),
            campaigns: DashMap::new(),
            billboards_by_location: DashMap::new(),
            writes: RwLock::new(()),
            wal,
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            events = events.len(),
            locations = engine.locations.len(),
            billboards = engine.billboards.len(),
            campaigns = engine.campaigns.len(),
            "inventory replayed from {}",
            wal_path.display()
        );
        Ok(engine)
    }

    pub(super) async fn write_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.writes.read().await
    }

    /// Durably log an event. Failures are store failures for the caller.
    pub(super) async fn log(&self, event: Event) -> Result<(), EngineError> {
        self.wal.append(event).await.map_err(|e| {
            tracing::error!("WAL append failed: {e}");
            EngineError::from(e)
        })
    }

    pub(super) fn location_arc(&self, id: &str) -> Result<SharedLocation, EngineError> {
        self.locations
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Location::KIND, id))
    }

    pub(super) fn billboard_arc(&self, id: &str) -> Result<SharedBillboardState, EngineError> {
        self.billboards
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Billboard::KIND, id))
    }

    pub(super) fn campaign_arc(&self, id: &str) -> Result<SharedCampaignState, EngineError> {
        self.campaigns
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::not_found(Campaign::KIND, id))
    }

    /// Write-lock a live campaign. Soft-deleted campaigns are NotFound.
    pub(super) async fn lock_campaign(
        &self,
        id: &str,
    ) -> Result<OwnedRwLockWriteGuard<CampaignState>, EngineError> {
        let guard = self.campaign_arc(id)?.write_owned().await;
        store::ensure_visible(&guard.campaign, false)?;
        Ok(guard)
    }

    /// Write-lock a live billboard. Soft-deleted billboards are NotFound.
    pub(super) async fn lock_billboard(
        &self,
        id: &str,
    ) -> Result<OwnedRwLockWriteGuard<BillboardState>, EngineError> {
        let guard = self.billboard_arc(id)?.write_owned().await;
        store::ensure_visible(&guard.billboard, false)?;
        Ok(guard)
    }

    /// Write-lock billboards in ascending id order (`BTreeSet` iteration order).
    pub(super) async fn lock_billboards(
        &self,
        ids: &BTreeSet<String>,
    ) -> Result<Vec<OwnedRwLockWriteGuard<BillboardState>>, EngineError> {
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.billboard_arc(id)?.write_owned().await);
        }
        Ok(guards)
    }

    pub(super) fn index_billboard(&self, location_id: &str, billboard_id: &str) {
        self.billboards_by_location
            .entry(location_id.to_string())
            .or_default()
            .insert(billboard_id.to_string());
    }

    pub(super) fn unindex_billboard(&self, location_id: &str, billboard_id: &str) {
        if let Some(mut ids) = self.billboards_by_location.get_mut(location_id) {
            ids.remove(billboard_id);
        }
    }

    pub(super) fn location_has_billboards(&self, location_id: &str) -> bool {
        self.billboards_by_location
            .get(location_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Apply one replayed event. The engine is not shared yet, so every
    /// `try_read`/`try_write` is uncontended.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::LocationCreated(loc) | Event::LocationUpdated(loc) => {
                self.locations
                    .insert(loc.id.clone(), Arc::new(RwLock::new(loc.clone())));
            }
            Event::LocationDeleted { id } => {
                if let Some(entry) = self.locations.get(id)
                    && let Ok(mut loc) = entry.try_write()
                {
                    loc.is_deleted = true;
                }
            }
            Event::BillboardCreated(bb) => {
                if !bb.is_deleted {
                    self.index_billboard(&bb.location_id, &bb.id);
                }
                self.billboards
                    .insert(bb.id.clone(), Arc::new(RwLock::new(BillboardState::new(bb.clone()))));
            }
            Event::BillboardUpdated(bb) => {
                if let Some(entry) = self.billboards.get(&bb.id)
                    && let Ok(mut bs) = entry.try_write()
                {
                    self.unindex_billboard(&bs.billboard.location_id, &bb.id);
                    self.index_billboard(&bb.location_id, &bb.id);
                    bs.billboard = bb.clone();
                }
            }
            Event::BillboardDeleted { id } => {
                if let Some(entry) = self.billboards.get(id)
                    && let Ok(mut bs) = entry.try_write()
                {
                    bs.billboard.is_deleted = true;
                    self.unindex_billboard(&bs.billboard.location_id, id);
                }
            }
            Event::CampaignCreated(c) => {
                self.campaigns
                    .insert(c.id.clone(), Arc::new(RwLock::new(CampaignState::new(c.clone()))));
            }
            Event::CampaignUpdated(c) => {
                let Some(cs_arc) = self.campaigns.get(&c.id).map(|e| e.value().clone()) else {
                    return;
                };
                let Ok(mut cs) = cs_arc.try_write() else { return };
                for bid in &cs.billboard_ids {
                    if let Some(entry) = self.billboards.get(bid)
                        && let Ok(mut bs) = entry.try_write()
                    {
                        redate_booking(&mut bs, &c.id, c.span);
                    }
                }
                cs.campaign = c.clone();
            }
            Event::CampaignDeleted { id } => {
                let Some(cs_arc) = self.campaigns.get(id).map(|e| e.value().clone()) else {
                    return;
                };
                let Ok(mut cs) = cs_arc.try_write() else { return };
                for bid in std::mem::take(&mut cs.billboard_ids) {
                    if let Some(entry) = self.billboards.get(&bid)
                        && let Ok(mut bs) = entry.try_write()
                    {
                        bs.remove_booking(id);
                    }
                }
                cs.campaign.is_deleted = true;
            }
            Event::BillboardAttached {
                campaign_id,
                billboard_id,
            } => {
                let Some(cs_arc) = self.campaigns.get(campaign_id).map(|e| e.value().clone()) else {
                    return;
                };
                let Ok(mut cs) = cs_arc.try_write() else { return };
                if let Some(entry) = self.billboards.get(billboard_id)
                    && let Ok(mut bs) = entry.try_write()
                {
                    bs.insert_booking(Booking {
                        campaign_id: campaign_id.clone(),
                        span: cs.campaign.span,
                    });
                    cs.billboard_ids.insert(billboard_id.clone());
                }
            }
            Event::BillboardDetached {
                campaign_id,
                billboard_id,
            } => {
                if let Some(entry) = self.campaigns.get(campaign_id)
                    && let Ok(mut cs) = entry.try_write()
                {
                    cs.billboard_ids.remove(billboard_id);
                }
                if let Some(entry) = self.billboards.get(billboard_id)
                    && let Ok(mut bs) = entry.try_write()
                {
                    bs.remove_booking(campaign_id);
                }
            }
        }
    }

    /// Rewrite the WAL with the minimal events that rebuild current state:
    /// every record (soft-deleted ones included), then every link.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // No event may land in the old file after the snapshot is taken.
        let _exclusive = self.writes.write().await;
        let mut events = Vec::new();

        let location_arcs: Vec<SharedLocation> =
            self.locations.iter().map(|e| e.value().clone()).collect();
        for arc in location_arcs {
            events.push(Event::LocationCreated(arc.read().await.clone()));
        }

        let billboard_arcs: Vec<SharedBillboardState> =
            self.billboards.iter().map(|e| e.value().clone()).collect();
        for arc in billboard_arcs {
            events.push(Event::BillboardCreated(arc.read().await.billboard.clone()));
        }

        let campaign_arcs: Vec<SharedCampaignState> =
            self.campaigns.iter().map(|e| e.value().clone()).collect();
        let mut links = Vec::new();
        for arc in campaign_arcs {
            let cs = arc.read().await;
            events.push(Event::CampaignCreated(cs.campaign.clone()));
            links.extend(cs.billboard_ids.iter().map(|bid| Event::BillboardAttached {
                campaign_id: cs.campaign.id.clone(),
                billboard_id: bid.clone(),
            }));
        }
        events.extend(links);

        let count = events.len();
        self.wal.compact(events).await?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}

/// Move a campaign's booking to a new span, keeping the billboard's order.
pub(super) fn redate_booking(bs: &mut BillboardState, campaign_id: &str, span: DateSpan) {
    if bs.remove_booking(campaign_id).is_some() {
        bs.insert_booking(Booking {
            campaign_id: campaign_id.to_string(),
            span,
        });
    }
}
