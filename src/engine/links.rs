use crate::limits::MAX_LINKS_PER_BILLBOARD;
use crate::model::*;
use crate::observability::ATTACH_CONFLICTS_TOTAL;

use super::conflict::check_no_conflict;
use super::store::ensure_visible;
use super::{Engine, EngineError};

impl Engine {
    /// Book a billboard for a campaign's whole interval.
    ///
    /// The billboard's write lock is held from the availability check until the
    /// link is applied, so concurrent attaches to one billboard serialize and
    /// each sees the bookings committed before it.
    pub async fn attach(
        &self,
        campaign_id: &str,
        billboard_id: &str,
    ) -> Result<LinkConfirmation, EngineError> {
        let _gate = self.write_gate().await;
        let mut cs = self.lock_campaign(campaign_id).await?;
        let mut bs = self.lock_billboard(billboard_id).await?;

        if cs.billboard_ids.contains(billboard_id) {
            return Err(EngineError::AlreadyLinked {
                campaign_id: campaign_id.to_string(),
                billboard_id: billboard_id.to_string(),
            });
        }
        if bs.bookings.len() >= MAX_LINKS_PER_BILLBOARD {
            return Err(EngineError::LimitExceeded("too many bookings on billboard"));
        }

        let span = cs.campaign.span;
        if let Err(e) = check_no_conflict(&bs, &span, None) {
            metrics::counter!(ATTACH_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(campaign_id, billboard_id, "attach rejected: {e}");
            return Err(e);
        }

        self.log(Event::BillboardAttached {
            campaign_id: campaign_id.to_string(),
            billboard_id: billboard_id.to_string(),
        })
        .await?;
        bs.insert_booking(Booking {
            campaign_id: campaign_id.to_string(),
            span,
        });
        cs.billboard_ids.insert(billboard_id.to_string());

        tracing::info!(campaign_id, billboard_id, %span, "billboard attached");
        Ok(LinkConfirmation {
            campaign_id: campaign_id.to_string(),
            billboard_id: billboard_id.to_string(),
            changed: true,
        })
    }

    /// Remove a link. Detaching an absent link succeeds with `changed: false`.
    pub async fn detach(
        &self,
        campaign_id: &str,
        billboard_id: &str,
    ) -> Result<LinkConfirmation, EngineError> {
        let _gate = self.write_gate().await;
        let mut cs = self.lock_campaign(campaign_id).await?;
        let mut bs = self.lock_billboard(billboard_id).await?;

        let changed = cs.billboard_ids.contains(billboard_id);
        if changed {
            self.log(Event::BillboardDetached {
                campaign_id: campaign_id.to_string(),
                billboard_id: billboard_id.to_string(),
            })
            .await?;
            bs.remove_booking(campaign_id);
            cs.billboard_ids.remove(billboard_id);
            tracing::info!(campaign_id, billboard_id, "billboard detached");
        }

        Ok(LinkConfirmation {
            campaign_id: campaign_id.to_string(),
            billboard_id: billboard_id.to_string(),
            changed,
        })
    }

    /// Live billboards booked by a campaign, sorted by id.
    pub async fn billboards_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<Billboard>, EngineError> {
        Ok(self.links_for_campaign(campaign_id).await?.1)
    }

    /// A campaign and its live billboards, read under one campaign lock so a
    /// concurrent re-date or detach is seen either entirely or not at all.
    pub async fn links_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<(Campaign, Vec<Billboard>), EngineError> {
        let cs = self.campaign_arc(campaign_id)?.read_owned().await;
        ensure_visible(&cs.campaign, false)?;

        let mut out = Vec::with_capacity(cs.billboard_ids.len());
        for bid in &cs.billboard_ids {
            let bb = self.billboard_arc(bid)?.read().await.billboard.clone();
            if !bb.is_deleted {
                out.push(bb);
            }
        }
        Ok((cs.campaign.clone(), out))
    }

    /// Live campaigns booking a billboard, ordered by start date.
    pub async fn campaigns_for_billboard(
        &self,
        billboard_id: &str,
    ) -> Result<Vec<Campaign>, EngineError> {
        // Released before any campaign lock is taken.
        let campaign_ids: Vec<String> = {
            let bs = self.billboard_arc(billboard_id)?.read_owned().await;
            ensure_visible(&bs.billboard, false)?;
            bs.bookings.iter().map(|b| b.campaign_id.clone()).collect()
        };

        let mut out = Vec::with_capacity(campaign_ids.len());
        for cid in &campaign_ids {
            let campaign = self.campaign_arc(cid)?.read().await.campaign.clone();
            if !campaign.is_deleted {
                out.push(campaign);
            }
        }
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}
