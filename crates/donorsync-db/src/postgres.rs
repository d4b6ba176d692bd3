//! PostgreSQL implementation of the store port.
//!
//! Bulk inserts and updates bind one array per column and expand them with
//! `UNNEST`, so a page of records costs one statement regardless of size.
//! Projects carry a `TEXT[]` column, which `UNNEST` cannot zip row-wise; they
//! are inserted with `QueryBuilder::push_values` instead.
//!
//! Updates write only the columns each row names as changed. The bulk forms
//! carry a comma-joined column mask per row and fall back to the stored value
//! for every column the mask leaves out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use donorsync_connector::OAuthTokens;
use donorsync_core::{
    DonorId, IntegrationId, OrganizationId, ProjectId, ProviderName, ScopedExternalId, SyncRunId,
};

use crate::error::{DbError, DbResult};
use crate::models::{
    DonationFields, DonationRow, DonationUpdate, DonorFields, DonorRow, DonorUpdate, Integration, NewDonation,
    NewDonor, NewIntegration, NewProject, ProjectRow, ProjectUpdate, RecordKind, SyncState,
};
use crate::pool::DbPool;
use crate::store::{IntegrationStore, RecordStore, STALE_SYNC_MESSAGE};

/// Store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn scoped_strings(ids: &[ScopedExternalId]) -> Vec<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

/// `SET` list for an `UPDATE ... AS d FROM UNNEST(...) AS u` statement whose
/// `u.changed` column holds each row's comma-joined column mask.
fn masked_assignments(columns: &[&str]) -> String {
    let mut sql = String::new();
    for column in columns {
        sql.push_str(&format!(
            "{column} = CASE WHEN '{column}' = ANY(string_to_array(u.changed, ',')) \
             THEN u.{column} ELSE d.{column} END,\n"
        ));
    }
    sql.push_str("updated_at = NOW()");
    sql
}

/// Column arrays for the donor `UNNEST` statements.
#[derive(Default)]
struct DonorColumns {
    first_name: Vec<Option<String>>,
    last_name: Vec<Option<String>>,
    display_name: Vec<Option<String>>,
    email: Vec<Option<String>>,
    phone: Vec<Option<String>>,
    street: Vec<Option<String>>,
    city: Vec<Option<String>>,
    state: Vec<Option<String>>,
    postal_code: Vec<Option<String>>,
    country: Vec<Option<String>>,
    is_couple: Vec<bool>,
    his_first_name: Vec<Option<String>>,
    his_last_name: Vec<Option<String>>,
    her_first_name: Vec<Option<String>>,
    her_last_name: Vec<Option<String>>,
}

impl DonorColumns {
    fn push(&mut self, fields: DonorFields) {
        self.first_name.push(fields.first_name);
        self.last_name.push(fields.last_name);
        self.display_name.push(fields.display_name);
        self.email.push(fields.email);
        self.phone.push(fields.phone);
        self.street.push(fields.address.street);
        self.city.push(fields.address.city);
        self.state.push(fields.address.state);
        self.postal_code.push(fields.address.postal_code);
        self.country.push(fields.address.country);
        self.is_couple.push(fields.is_couple);
        self.his_first_name.push(fields.couple.his_first_name);
        self.his_last_name.push(fields.couple.his_last_name);
        self.her_first_name.push(fields.couple.her_first_name);
        self.her_last_name.push(fields.couple.her_last_name);
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_donors_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<DonorRow>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as(
            r"
            SELECT * FROM donors
            WHERE organization_id = $1 AND external_id = ANY($2)
            ",
        )
        .bind(org.into_uuid())
        .bind(scoped_strings(external_ids))
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn find_donors_by_ids(
        &self,
        org: OrganizationId,
        ids: &[DonorId],
    ) -> DbResult<Vec<DonorRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        let rows = sqlx::query_as("SELECT * FROM donors WHERE organization_id = $1 AND id = ANY($2)")
            .bind(org.into_uuid())
            .bind(ids)
            .fetch_all(self.pool.inner())
            .await?;
        Ok(rows)
    }

    async fn insert_donors(&self, donors: Vec<NewDonor>) -> DbResult<Vec<DonorRow>> {
        if donors.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(donors.len());
        let mut orgs = Vec::with_capacity(donors.len());
        let mut external_ids = Vec::with_capacity(donors.len());
        let mut columns = DonorColumns::default();
        for donor in donors {
            ids.push(donor.id.into_uuid());
            orgs.push(donor.organization_id.into_uuid());
            external_ids.push(donor.external_id.into_inner());
            columns.push(donor.fields);
        }

        let rows = sqlx::query_as(
            r"
            INSERT INTO donors (
                id, organization_id, external_id,
                first_name, last_name, display_name, email, phone,
                street, city, state, postal_code, country,
                is_couple, his_first_name, his_last_name, her_first_name, her_last_name
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::text[],
                $4::text[], $5::text[], $6::text[], $7::text[], $8::text[],
                $9::text[], $10::text[], $11::text[], $12::text[], $13::text[],
                $14::bool[], $15::text[], $16::text[], $17::text[], $18::text[]
            )
            RETURNING *
            ",
        )
        .bind(ids)
        .bind(orgs)
        .bind(external_ids)
        .bind(columns.first_name)
        .bind(columns.last_name)
        .bind(columns.display_name)
        .bind(columns.email)
        .bind(columns.phone)
        .bind(columns.street)
        .bind(columns.city)
        .bind(columns.state)
        .bind(columns.postal_code)
        .bind(columns.country)
        .bind(columns.is_couple)
        .bind(columns.his_first_name)
        .bind(columns.his_last_name)
        .bind(columns.her_first_name)
        .bind(columns.her_last_name)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn update_donors(&self, updates: Vec<DonorUpdate>) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut ids = Vec::with_capacity(updates.len());
        let mut masks = Vec::with_capacity(updates.len());
        let mut columns = DonorColumns::default();
        for update in updates {
            ids.push(update.id.into_uuid());
            masks.push(update.changed.join(","));
            columns.push(update.fields);
        }

        let sql = format!(
            r"
            UPDATE donors AS d SET
            {}
            FROM UNNEST(
                $1::uuid[], $2::text[],
                $3::text[], $4::text[], $5::text[], $6::text[], $7::text[],
                $8::text[], $9::text[], $10::text[], $11::text[], $12::text[],
                $13::bool[], $14::text[], $15::text[], $16::text[], $17::text[]
            ) AS u(
                id, changed,
                first_name, last_name, display_name, email, phone,
                street, city, state, postal_code, country,
                is_couple, his_first_name, his_last_name, her_first_name, her_last_name
            )
            WHERE d.id = u.id
            ",
            masked_assignments(&DonorFields::COLUMNS)
        );
        let mut tx = self.pool.inner().begin().await?;
        let result = sqlx::query(&sql)
            .bind(ids)
            .bind(masks)
            .bind(columns.first_name)
            .bind(columns.last_name)
            .bind(columns.display_name)
            .bind(columns.email)
            .bind(columns.phone)
            .bind(columns.street)
            .bind(columns.city)
            .bind(columns.state)
            .bind(columns.postal_code)
            .bind(columns.country)
            .bind(columns.is_couple)
            .bind(columns.his_first_name)
            .bind(columns.his_last_name)
            .bind(columns.her_first_name)
            .bind(columns.her_last_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn find_projects_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<ProjectRow>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as(
            r"
            SELECT * FROM projects
            WHERE organization_id = $1 AND external_id = ANY($2)
            ",
        )
        .bind(org.into_uuid())
        .bind(scoped_strings(external_ids))
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn find_projects_by_ids(
        &self,
        org: OrganizationId,
        ids: &[ProjectId],
    ) -> DbResult<Vec<ProjectRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| id.into_uuid()).collect();
        let rows =
            sqlx::query_as("SELECT * FROM projects WHERE organization_id = $1 AND id = ANY($2)")
                .bind(org.into_uuid())
                .bind(ids)
                .fetch_all(self.pool.inner())
                .await?;
        Ok(rows)
    }

    async fn insert_projects(&self, projects: Vec<NewProject>) -> DbResult<Vec<ProjectRow>> {
        if projects.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO projects (id, organization_id, external_id, name, description, active, goal, tags) ",
        );
        builder.push_values(projects, |mut row, project| {
            row.push_bind(project.id.into_uuid())
                .push_bind(project.organization_id.into_uuid())
                .push_bind(project.external_id.into_inner())
                .push_bind(project.fields.name)
                .push_bind(project.fields.description)
                .push_bind(project.fields.active)
                .push_bind(project.fields.goal)
                .push_bind(project.fields.tags);
        });
        builder.push(" RETURNING *");

        let rows = builder
            .build_query_as::<ProjectRow>()
            .fetch_all(self.pool.inner())
            .await?;
        Ok(rows)
    }

    async fn update_projects(&self, updates: Vec<ProjectUpdate>) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.inner().begin().await?;
        let mut written = 0;
        for update in updates {
            let fields = update.fields;
            let writes = |column: &str| update.changed.iter().any(|c| *c == column);
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE projects SET ");
            let mut set = builder.separated(", ");
            if writes("name") {
                set.push("name = ").push_bind_unseparated(fields.name);
            }
            if writes("description") {
                set.push("description = ").push_bind_unseparated(fields.description);
            }
            if writes("active") {
                set.push("active = ").push_bind_unseparated(fields.active);
            }
            if writes("goal") {
                set.push("goal = ").push_bind_unseparated(fields.goal);
            }
            if writes("tags") {
                set.push("tags = ").push_bind_unseparated(fields.tags);
            }
            set.push("updated_at = NOW()");
            builder.push(" WHERE id = ").push_bind(update.id.into_uuid());
            let result = builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn find_external_bucket(&self, org: OrganizationId) -> DbResult<Option<ProjectRow>> {
        let row =
            sqlx::query_as("SELECT * FROM projects WHERE organization_id = $1 AND external LIMIT 1")
                .bind(org.into_uuid())
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row)
    }

    async fn create_external_bucket(
        &self,
        org: OrganizationId,
        name: &str,
    ) -> DbResult<ProjectRow> {
        let inserted: Option<ProjectRow> = sqlx::query_as(
            r"
            INSERT INTO projects (id, organization_id, name, active, external)
            VALUES ($1, $2, $3, TRUE, TRUE)
            ON CONFLICT (organization_id) WHERE external DO NOTHING
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(org.into_uuid())
        .bind(name)
        .fetch_optional(self.pool.inner())
        .await?;

        if let Some(row) = inserted {
            tracing::info!(organization_id = %org, project_id = %row.id, "Created external donations bucket");
            return Ok(row);
        }
        // Lost the race; another run created it.
        self.find_external_bucket(org)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("external bucket for organization {org}")))
    }

    async fn find_donations_by_external_ids(
        &self,
        org: OrganizationId,
        external_ids: &[ScopedExternalId],
    ) -> DbResult<Vec<DonationRow>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as(
            r"
            SELECT * FROM donations
            WHERE organization_id = $1 AND external_id = ANY($2)
            ",
        )
        .bind(org.into_uuid())
        .bind(scoped_strings(external_ids))
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn insert_donations(&self, donations: Vec<NewDonation>) -> DbResult<Vec<DonationRow>> {
        if donations.is_empty() {
            return Ok(Vec::new());
        }
        let len = donations.len();
        let mut ids = Vec::with_capacity(len);
        let mut orgs = Vec::with_capacity(len);
        let mut external_ids = Vec::with_capacity(len);
        let mut donor_ids = Vec::with_capacity(len);
        let mut project_ids = Vec::with_capacity(len);
        let mut amounts = Vec::with_capacity(len);
        let mut currencies = Vec::with_capacity(len);
        let mut dates = Vec::with_capacity(len);
        let mut designations = Vec::with_capacity(len);
        for donation in donations {
            ids.push(donation.id.into_uuid());
            orgs.push(donation.organization_id.into_uuid());
            external_ids.push(donation.external_id.into_inner());
            donor_ids.push(donation.fields.donor_id.into_uuid());
            project_ids.push(donation.fields.project_id.into_uuid());
            amounts.push(donation.fields.amount);
            currencies.push(donation.fields.currency);
            dates.push(donation.fields.date);
            designations.push(donation.fields.designation);
        }

        let rows = sqlx::query_as(
            r"
            INSERT INTO donations (
                id, organization_id, external_id, donor_id, project_id,
                amount, currency, date, designation
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::text[], $4::uuid[], $5::uuid[],
                $6::int8[], $7::text[], $8::timestamptz[], $9::text[]
            )
            RETURNING *
            ",
        )
        .bind(ids)
        .bind(orgs)
        .bind(external_ids)
        .bind(donor_ids)
        .bind(project_ids)
        .bind(amounts)
        .bind(currencies)
        .bind(dates)
        .bind(designations)
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn update_donations(&self, updates: Vec<DonationUpdate>) -> DbResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let len = updates.len();
        let mut ids = Vec::with_capacity(len);
        let mut masks = Vec::with_capacity(len);
        let mut donor_ids = Vec::with_capacity(len);
        let mut project_ids = Vec::with_capacity(len);
        let mut amounts = Vec::with_capacity(len);
        let mut currencies = Vec::with_capacity(len);
        let mut dates = Vec::with_capacity(len);
        let mut designations = Vec::with_capacity(len);
        for update in updates {
            ids.push(update.id.into_uuid());
            masks.push(update.changed.join(","));
            donor_ids.push(update.fields.donor_id.into_uuid());
            project_ids.push(update.fields.project_id.into_uuid());
            amounts.push(update.fields.amount);
            currencies.push(update.fields.currency);
            dates.push(update.fields.date);
            designations.push(update.fields.designation);
        }

        let sql = format!(
            r"
            UPDATE donations AS d SET
            {}
            FROM UNNEST(
                $1::uuid[], $2::text[], $3::uuid[], $4::uuid[], $5::int8[],
                $6::text[], $7::timestamptz[], $8::text[]
            ) AS u(id, changed, donor_id, project_id, amount, currency, date, designation)
            WHERE d.id = u.id
            ",
            masked_assignments(&DonationFields::COLUMNS)
        );
        let mut tx = self.pool.inner().begin().await?;
        let result = sqlx::query(&sql)
            .bind(ids)
            .bind(masks)
            .bind(donor_ids)
            .bind(project_ids)
            .bind(amounts)
            .bind(currencies)
            .bind(dates)
            .bind(designations)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn list_unpushed_donors(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<DonorRow>> {
        let rows = sqlx::query_as(
            r"
            SELECT * FROM donors
            WHERE organization_id = $1 AND external_id IS NULL
            ORDER BY created_at, id
            LIMIT $2
            ",
        )
        .bind(org.into_uuid())
        .bind(i64::from(limit))
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn list_unpushed_projects(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<ProjectRow>> {
        let rows = sqlx::query_as(
            r"
            SELECT * FROM projects
            WHERE organization_id = $1 AND external_id IS NULL AND NOT external
            ORDER BY created_at, id
            LIMIT $2
            ",
        )
        .bind(org.into_uuid())
        .bind(i64::from(limit))
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn list_unpushed_donations(
        &self,
        org: OrganizationId,
        limit: u32,
    ) -> DbResult<Vec<DonationRow>> {
        let rows = sqlx::query_as(
            r"
            SELECT * FROM donations
            WHERE organization_id = $1 AND external_id IS NULL
            ORDER BY created_at, id
            LIMIT $2
            ",
        )
        .bind(org.into_uuid())
        .bind(i64::from(limit))
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn assign_external_ids(
        &self,
        kind: RecordKind,
        assignments: &[(Uuid, ScopedExternalId)],
    ) -> DbResult<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = assignments.iter().map(|(id, _)| *id).collect();
        let external_ids: Vec<String> = assignments
            .iter()
            .map(|(_, external_id)| external_id.as_str().to_string())
            .collect();

        // Table names come from a closed enum.
        let sql = format!(
            r"
            UPDATE {table} AS t
            SET external_id = u.external_id, updated_at = NOW()
            FROM UNNEST($1::uuid[], $2::text[]) AS u(id, external_id)
            WHERE t.id = u.id
            ",
            table = kind.table()
        );
        let mut tx = self.pool.inner().begin().await?;
        let result = sqlx::query(&sql)
            .bind(ids)
            .bind(external_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IntegrationStore for PgStore {
    async fn find_active_integration(
        &self,
        org: OrganizationId,
        provider: &ProviderName,
    ) -> DbResult<Option<Integration>> {
        let row = sqlx::query_as(
            r"
            SELECT * FROM integrations
            WHERE organization_id = $1 AND provider = $2 AND is_active
            ",
        )
        .bind(org.into_uuid())
        .bind(provider.as_str())
        .fetch_optional(self.pool.inner())
        .await?;
        Ok(row)
    }

    async fn get_integration(&self, id: IntegrationId) -> DbResult<Option<Integration>> {
        let row = sqlx::query_as("SELECT * FROM integrations WHERE id = $1")
            .bind(id.into_uuid())
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row)
    }

    async fn list_active_integrations(&self) -> DbResult<Vec<Integration>> {
        let rows = sqlx::query_as(
            "SELECT * FROM integrations WHERE is_active ORDER BY organization_id, provider",
        )
        .fetch_all(self.pool.inner())
        .await?;
        Ok(rows)
    }

    async fn create_integration(&self, integration: NewIntegration) -> DbResult<Integration> {
        let mut tx = self.pool.inner().begin().await?;
        sqlx::query(
            r"
            UPDATE integrations SET is_active = FALSE, updated_at = NOW()
            WHERE organization_id = $1 AND provider = $2 AND is_active
            ",
        )
        .bind(integration.organization_id.into_uuid())
        .bind(integration.provider.as_str())
        .execute(&mut *tx)
        .await?;

        let row: Integration = sqlx::query_as(
            r"
            INSERT INTO integrations (
                id, organization_id, provider, access_token, refresh_token,
                token_expires_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(integration.id.into_uuid())
        .bind(integration.organization_id.into_uuid())
        .bind(integration.provider.as_str())
        .bind(&integration.access_token)
        .bind(&integration.refresh_token)
        .bind(integration.token_expires_at)
        .bind(&integration.metadata)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn update_tokens(
        &self,
        id: IntegrationId,
        tokens: &OAuthTokens,
    ) -> DbResult<Integration> {
        let metadata = if tokens.metadata.is_object() {
            tokens.metadata.clone()
        } else {
            serde_json::json!({})
        };
        let row: Option<Integration> = sqlx::query_as(
            r"
            UPDATE integrations SET
                access_token = $2,
                refresh_token = COALESCE($3, refresh_token),
                token_expires_at = $4,
                metadata = metadata || $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(id.into_uuid())
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(tokens.expires_at)
        .bind(metadata)
        .fetch_optional(self.pool.inner())
        .await?;
        row.ok_or_else(|| DbError::NotFound(format!("integration {id}")))
    }

    async fn try_begin_sync(&self, id: IntegrationId, run: SyncRunId) -> DbResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE integrations
            SET sync_status = $2, sync_error = NULL, sync_run_id = $3,
                sync_heartbeat_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND is_active AND sync_status <> $2
            ",
        )
        .bind(id.into_uuid())
        .bind(SyncState::Syncing)
        .bind(run.into_uuid())
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn heartbeat_sync(&self, id: IntegrationId, run: SyncRunId) -> DbResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE integrations
            SET sync_heartbeat_at = NOW()
            WHERE id = $1 AND sync_status = $2 AND sync_run_id = $3
            ",
        )
        .bind(id.into_uuid())
        .bind(SyncState::Syncing)
        .bind(run.into_uuid())
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_sync(
        &self,
        id: IntegrationId,
        run: SyncRunId,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE integrations
            SET sync_status = $3, sync_error = NULL, last_sync_at = $4,
                sync_run_id = NULL, sync_heartbeat_at = NULL, updated_at = NOW()
            WHERE id = $1 AND sync_run_id = $2
            ",
        )
        .bind(id.into_uuid())
        .bind(run.into_uuid())
        .bind(SyncState::Idle)
        .bind(at)
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_sync(
        &self,
        id: IntegrationId,
        run: SyncRunId,
        message: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE integrations
            SET sync_status = $3, sync_error = $4,
                sync_run_id = NULL, sync_heartbeat_at = NULL, updated_at = NOW()
            WHERE id = $1 AND sync_run_id = $2
            ",
        )
        .bind(id.into_uuid())
        .bind(run.into_uuid())
        .bind(SyncState::Error)
        .bind(message)
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn deactivate(&self, id: IntegrationId) -> DbResult<()> {
        sqlx::query("UPDATE integrations SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id.into_uuid())
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn release_stale_syncs(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r"
            UPDATE integrations
            SET sync_status = $1, sync_error = $2,
                sync_run_id = NULL, sync_heartbeat_at = NULL, updated_at = NOW()
            WHERE sync_status = $3 AND COALESCE(sync_heartbeat_at, updated_at) < $4
            ",
        )
        .bind(SyncState::Error)
        .bind(STALE_SYNC_MESSAGE)
        .bind(SyncState::Syncing)
        .bind(older_than)
        .execute(self.pool.inner())
        .await?;
        Ok(result.rows_affected())
    }
}
