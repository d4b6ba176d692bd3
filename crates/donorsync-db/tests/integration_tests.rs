//! PostgreSQL tests for the store port.
//!
//! These tests require a running PostgreSQL instance.
//! Run with: `cargo test -p donorsync-db --features integration`
//!
//! The database URL is read from `DATABASE_URL`.

#![cfg(feature = "integration")]

mod common;

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use common::TestContext;
use donorsync_connector::OAuthTokens;
use donorsync_core::{Address, IntegrationId, ProviderName, ScopedExternalId, SyncRunId};
use donorsync_db::{
    DonationFields, DonationUpdate, DonorFields, DonorUpdate, IntegrationStore, NewDonation,
    NewDonor, NewIntegration, NewProject, ProjectFields, ProjectUpdate, RecordKind, RecordStore,
    SyncState,
};

fn provider() -> ProviderName {
    ProviderName::new("salesforce").unwrap()
}

fn scoped(native: &str) -> ScopedExternalId {
    ScopedExternalId::new(&provider(), native).unwrap()
}

fn donor_fields(first: &str) -> DonorFields {
    DonorFields {
        first_name: Some(first.to_string()),
        last_name: Some("Doe".to_string()),
        display_name: Some(format!("{first} Doe")),
        email: Some(format!("{}@example.org", first.to_lowercase())),
        phone: None,
        address: Address {
            street: Some("1 Main St".to_string()),
            city: Some("Portland".to_string()),
            ..Address::default()
        },
        ..DonorFields::default()
    }
}

// ============================================================================
// Donors
// ============================================================================

#[tokio::test]
async fn test_bulk_insert_and_lookup_donors() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Donor Org").await;

    let inserted = ctx
        .store
        .insert_donors(vec![
            NewDonor::new(org, scoped("003A"), donor_fields("Ann")),
            NewDonor::new(org, scoped("003B"), donor_fields("Ben")),
        ])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 2);

    let found = ctx
        .store
        .find_donors_by_external_ids(org, &[scoped("003A"), scoped("003Z")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].fields(), donor_fields("Ann"));
}

#[tokio::test]
async fn test_duplicate_external_id_rejects_whole_insert() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Dup Org").await;
    ctx.store
        .insert_donors(vec![NewDonor::new(org, scoped("003A"), donor_fields("Ann"))])
        .await
        .unwrap();

    let err = ctx
        .store
        .insert_donors(vec![
            NewDonor::new(org, scoped("003C"), donor_fields("Cy")),
            NewDonor::new(org, scoped("003A"), donor_fields("Ann")),
        ])
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(ctx
        .store
        .find_donors_by_external_ids(org, &[scoped("003C")])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_bulk_update_donors() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Update Org").await;
    let rows = ctx
        .store
        .insert_donors(vec![NewDonor::new(org, scoped("003A"), donor_fields("Ann"))])
        .await
        .unwrap();

    let mut fields = donor_fields("Ann");
    fields.phone = Some("555-0100".to_string());
    let written = ctx
        .store
        .update_donors(vec![DonorUpdate {
            id: rows[0].donor_id(),
            fields: fields.clone(),
            changed: vec!["phone"],
        }])
        .await
        .unwrap();
    assert_eq!(written, 1);

    let found = ctx
        .store
        .find_donors_by_ids(org, &[rows[0].donor_id()])
        .await
        .unwrap();
    assert_eq!(found[0].fields(), fields);
}

#[tokio::test]
async fn test_update_leaves_unlisted_columns_alone() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Masked Update Org").await;
    let rows = ctx
        .store
        .insert_donors(vec![NewDonor::new(org, scoped("003A"), donor_fields("Ann"))])
        .await
        .unwrap();
    let stale = rows[0].fields();

    let mut edited = stale.clone();
    edited.email = Some("edited@example.org".to_string());
    ctx.store
        .update_donors(vec![DonorUpdate {
            id: rows[0].donor_id(),
            fields: edited,
            changed: vec!["email"],
        }])
        .await
        .unwrap();

    let mut synced = stale;
    synced.phone = Some("555-0100".to_string());
    ctx.store
        .update_donors(vec![DonorUpdate {
            id: rows[0].donor_id(),
            fields: synced,
            changed: vec!["phone"],
        }])
        .await
        .unwrap();

    let found = ctx
        .store
        .find_donors_by_ids(org, &[rows[0].donor_id()])
        .await
        .unwrap();
    assert_eq!(found[0].email.as_deref(), Some("edited@example.org"));
    assert_eq!(found[0].phone.as_deref(), Some("555-0100"));
}

// ============================================================================
// Projects and donations
// ============================================================================

#[tokio::test]
async fn test_external_bucket_singleton() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Bucket Org").await;

    let first = ctx.store.create_external_bucket(org, "Bucket").await.unwrap();
    let second = ctx.store.create_external_bucket(org, "Bucket").await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.external);
    assert!(ctx
        .store
        .list_unpushed_projects(org, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_project_tags_roundtrip_through_update() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Project Org").await;
    let fields = ProjectFields {
        name: "Annual Fund".to_string(),
        description: None,
        active: true,
        goal: Some(1_000_000),
        tags: vec!["Appeal".to_string()],
    };
    let rows = ctx
        .store
        .insert_projects(vec![NewProject::new(org, scoped("701A"), fields.clone())])
        .await
        .unwrap();
    assert_eq!(rows[0].fields(), fields);

    let mut changed = fields;
    changed.tags.push("Event".to_string());
    ctx.store
        .update_projects(vec![ProjectUpdate {
            id: rows[0].project_id(),
            fields: changed.clone(),
            changed: vec!["tags"],
        }])
        .await
        .unwrap();
    let found = ctx
        .store
        .find_projects_by_external_ids(org, &[scoped("701A")])
        .await
        .unwrap();
    assert_eq!(found[0].tags, changed.tags);
}

#[tokio::test]
async fn test_donation_insert_update_and_assign_external_id() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Donation Org").await;
    let donor = ctx
        .store
        .insert_donors(vec![NewDonor::new(org, scoped("003A"), donor_fields("Ann"))])
        .await
        .unwrap()
        .remove(0);
    let bucket = ctx.store.create_external_bucket(org, "Bucket").await.unwrap();

    let date = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let fields = DonationFields {
        donor_id: donor.donor_id(),
        project_id: bucket.project_id(),
        amount: 5000,
        currency: "USD".to_string(),
        date,
        designation: None,
    };
    let row = ctx
        .store
        .insert_donations(vec![NewDonation::new(org, scoped("006A"), fields.clone())])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(row.fields(), fields);

    let mut changed = fields;
    changed.amount = 7500;
    ctx.store
        .update_donations(vec![DonationUpdate {
            id: row.donation_id(),
            fields: changed.clone(),
            changed: vec!["amount"],
        }])
        .await
        .unwrap();
    let found = ctx
        .store
        .find_donations_by_external_ids(org, &[scoped("006A")])
        .await
        .unwrap();
    assert_eq!(found[0].amount, 7500);

    let written = ctx
        .store
        .assign_external_ids(RecordKind::Donation, &[(row.id, scoped("006B"))])
        .await
        .unwrap();
    assert_eq!(written, 1);
}

// ============================================================================
// Integrations
// ============================================================================

#[tokio::test]
async fn test_integration_lifecycle() {
    let ctx = TestContext::new().await;
    let org = ctx.create_organization("Integration Org").await;

    let integration = ctx
        .store
        .create_integration(NewIntegration {
            id: IntegrationId::new(),
            organization_id: org,
            provider: provider(),
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_expires_at: Some(Utc::now() + Duration::hours(1)),
            metadata: json!({"instance_url": "https://example.my.salesforce.com"}),
        })
        .await
        .unwrap();
    let id = integration.integration_id();

    let run = SyncRunId::new();
    assert!(ctx.store.try_begin_sync(id, run).await.unwrap());
    assert!(!ctx.store.try_begin_sync(id, SyncRunId::new()).await.unwrap());
    assert!(ctx.store.heartbeat_sync(id, run).await.unwrap());
    assert!(!ctx.store.fail_sync(id, SyncRunId::new(), "other").await.unwrap());
    assert!(ctx.store.fail_sync(id, run, "boom").await.unwrap());
    let row = ctx.store.get_integration(id).await.unwrap().unwrap();
    assert_eq!(row.sync_status, SyncState::Error);
    assert_eq!(row.sync_error.as_deref(), Some("boom"));

    let updated = ctx
        .store
        .update_tokens(
            id,
            &OAuthTokens {
                access_token: "new".to_string(),
                refresh_token: None,
                expires_at: None,
                metadata: json!({"instance_url": "https://na2.salesforce.com"}),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.refresh_token.as_deref(), Some("refresh"));
    assert_eq!(
        updated.metadata["instance_url"],
        json!("https://na2.salesforce.com")
    );

    let run = SyncRunId::new();
    assert!(ctx.store.try_begin_sync(id, run).await.unwrap());
    assert!(ctx.store.complete_sync(id, run, Utc::now()).await.unwrap());
    assert!(!ctx.store.heartbeat_sync(id, run).await.unwrap());
    let row = ctx.store.get_integration(id).await.unwrap().unwrap();
    assert_eq!(row.sync_status, SyncState::Idle);
    assert!(row.last_sync_at.is_some());

    ctx.store.deactivate(id).await.unwrap();
    assert!(ctx
        .store
        .find_active_integration(org, &provider())
        .await
        .unwrap()
        .is_none());
}
