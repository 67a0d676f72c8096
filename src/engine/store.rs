use async_trait::async_trait;
use ulid::Ulid;

use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;

use super::EngineError;

/// A soft-deletable record kept by the engine.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable name used in errors.
    const KIND: &'static str;
    /// Id prefix, e.g. `bill` for `bill_01J…`.
    const PREFIX: &'static str;
    type Draft: Send + 'static;
    type Patch: Send + 'static;

    fn id(&self) -> &str;
    fn is_deleted(&self) -> bool;
}

impl Entity for Location {
    const KIND: &'static str = "location";
    const PREFIX: &'static str = "loc";
    type Draft = NewLocation;
    type Patch = LocationPatch;

    fn id(&self) -> &str {
        &self.id
    }
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

impl Entity for Billboard {
    const KIND: &'static str = "billboard";
    const PREFIX: &'static str = "bill";
    type Draft = NewBillboard;
    type Patch = BillboardPatch;

    fn id(&self) -> &str {
        &self.id
    }
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

impl Entity for Campaign {
    const KIND: &'static str = "campaign";
    const PREFIX: &'static str = "camp";
    type Draft = NewCampaign;
    type Patch = CampaignPatch;

    fn id(&self) -> &str {
        &self.id
    }
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

/// CRUD over one entity type. Every read takes `include_deleted` explicitly;
/// updates and deletes never touch soft-deleted rows.
#[async_trait]
pub trait Repository<E: Entity> {
    async fn create(&self, draft: E::Draft) -> Result<E, EngineError>;
    async fn get(&self, id: &str, include_deleted: bool) -> Result<E, EngineError>;
    async fn list(&self, page: Page, include_deleted: bool) -> Vec<E>;
    async fn update(&self, id: &str, patch: E::Patch) -> Result<E, EngineError>;
    async fn soft_delete(&self, id: &str) -> Result<(), EngineError>;
}

/// The one soft-delete filter. Every read path goes through here.
pub fn visible<E: Entity>(record: &E, include_deleted: bool) -> bool {
    include_deleted || !record.is_deleted()
}

/// Fail with NotFound unless the record is visible.
pub fn ensure_visible<E: Entity>(record: &E, include_deleted: bool) -> Result<(), EngineError> {
    if visible(record, include_deleted) {
        Ok(())
    } else {
        Err(EngineError::not_found(E::KIND, record.id()))
    }
}

pub fn new_id<E: Entity>() -> String {
    format!("{}_{}", E::PREFIX, Ulid::new())
}

/// Sort by id, then slice out the requested page. Limit is capped at `MAX_PAGE_SIZE`.
pub fn paginate<E: Entity>(mut rows: Vec<E>, page: Page) -> Vec<E> {
    rows.sort_by(|a, b| a.id().cmp(b.id()));
    rows.into_iter()
        .skip(page.offset)
        .take(page.limit.min(MAX_PAGE_SIZE))
        .collect()
}
