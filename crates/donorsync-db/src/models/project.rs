//! Local project (campaign/fund) rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use donorsync_core::{OrganizationId, ProjectId, ScopedExternalId};

/// Name given to the fallback bucket when none is configured.
pub const EXTERNAL_BUCKET_NAME: &str = "External Donations";

/// Mutable project columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFields {
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub goal: Option<i64>,
    pub tags: Vec<String>,
}

/// A stored project.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub external_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub goal: Option<i64>,
    pub tags: Vec<String>,
    /// Fallback bucket for donations without a mapped project.
    pub external: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRow {
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        ProjectId::from_uuid(self.id)
    }

    #[must_use]
    pub fn org_id(&self) -> OrganizationId {
        OrganizationId::from_uuid(self.organization_id)
    }

    #[must_use]
    pub fn fields(&self) -> ProjectFields {
        ProjectFields {
            name: self.name.clone(),
            description: self.description.clone(),
            active: self.active,
            goal: self.goal,
            tags: self.tags.clone(),
        }
    }

    /// Overwrite only the named columns.
    pub fn apply_changed(&mut self, fields: ProjectFields, changed: &[&str]) {
        let writes = |column: &str| changed.iter().any(|c| *c == column);
        if writes("name") {
            self.name = fields.name;
        }
        if writes("description") {
            self.description = fields.description;
        }
        if writes("active") {
            self.active = fields.active;
        }
        if writes("goal") {
            self.goal = fields.goal;
        }
        if writes("tags") {
            self.tags = fields.tags;
        }
    }

    pub fn apply(&mut self, fields: ProjectFields) {
        self.name = fields.name;
        self.description = fields.description;
        self.active = fields.active;
        self.goal = fields.goal;
        self.tags = fields.tags;
    }
}

/// A project to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub id: ProjectId,
    pub organization_id: OrganizationId,
    pub external_id: ScopedExternalId,
    pub fields: ProjectFields,
}

impl NewProject {
    #[must_use]
    pub fn new(
        organization_id: OrganizationId,
        external_id: ScopedExternalId,
        fields: ProjectFields,
    ) -> Self {
        Self {
            id: ProjectId::new(),
            organization_id,
            external_id,
            fields,
        }
    }
}

/// An update to an existing project; only `changed` columns are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectUpdate {
    pub id: ProjectId,
    pub fields: ProjectFields,
    pub changed: Vec<&'static str>,
}
