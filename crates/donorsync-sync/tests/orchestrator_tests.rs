//! Sync orchestrator tests: full runs against a scripted adapter.

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;

use common::{donation, donor, project, Harness, ScriptedAdapter};
use donorsync_core::{DonorWithDonations, ProviderName, ScopedExternalId};
use donorsync_db::{IntegrationStore, SyncState};
use donorsync_sync::{CancellationToken, SyncError, SyncMode};

fn crm() -> ProviderName {
    ProviderName::new("crm").unwrap()
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_two_donor_pages_with_one_changed_donor() {
    let h = Harness::new("crm").await;
    h.orchestrator
        .upserter()
        .upsert_donors(h.org, &crm(), &[donor("D5", "old@example.org")])
        .await
        .unwrap();

    let adapter = ScriptedAdapter::new("crm").with_donor_pages(vec![
        vec![
            donor("D1", "d1@example.org"),
            donor("D2", "d2@example.org"),
            donor("D3", "d3@example.org"),
        ],
        vec![donor("D4", "d4@example.org"), donor("D5", "new@example.org")],
    ]);
    let cancel = CancellationToken::new();

    let result = h
        .orchestrator
        .sync_organization_data(&adapter, &h.integration, SyncMode::Separate, &cancel)
        .await
        .unwrap();

    assert_eq!(result.donors.total, 5);
    assert_eq!(result.donors.created, 4);
    assert_eq!(result.donors.updated, 1);
    assert_eq!(result.donors.unchanged, 0);
    assert_eq!(result.donors.failed, 0);
    assert!(result.projects.is_none());
    assert_eq!(
        adapter.fetches(),
        vec![
            ("donors", None),
            ("donors", Some("1".to_string())),
            ("donations", None),
        ]
    );

    let integration = h.integration().await;
    assert_eq!(integration.sync_status, SyncState::Idle);
    assert!(integration.sync_error.is_none());
    assert!(integration.last_sync_at.is_some());

    let again = h
        .orchestrator
        .sync_organization_data(&adapter, &h.integration, SyncMode::Separate, &cancel)
        .await
        .unwrap();
    assert_eq!(again.donors.unchanged, 5);
    assert_eq!(again.donors.total, 5);
}

#[tokio::test]
async fn test_second_run_is_idempotent_for_every_entity() {
    let h = Harness::new("crm").await;
    let mut linked = donation("G1", "A", 2500);
    linked.campaign_external_id = Some("701".to_string());
    let adapter = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![vec![donor("A", "a@example.org"), donor("B", "b@example.org")]])
        .with_project_pages(vec![vec![project("701", "Gala")]])
        .with_donation_pages(vec![vec![linked], vec![donation("G2", "B", 1000)]]);
    let cancel = CancellationToken::new();

    let first = h
        .orchestrator
        .sync_organization_data(&adapter, &h.integration, SyncMode::Separate, &cancel)
        .await
        .unwrap();
    assert_eq!(first.total_records(), 5);
    assert_eq!(first.total_failed(), 0);

    let second = h
        .orchestrator
        .sync_organization_data(&adapter, &h.integration, SyncMode::Separate, &cancel)
        .await
        .unwrap();
    for entity in [
        &second.donors,
        second.projects.as_ref().unwrap(),
        &second.donations,
    ] {
        assert_eq!(entity.created, 0);
        assert_eq!(entity.updated, 0);
        assert_eq!(entity.failed, 0);
        assert_eq!(entity.unchanged, entity.total);
    }
}

#[tokio::test]
async fn test_projects_are_synced_before_donations() {
    let h = Harness::new("crm").await;
    let mut gift = donation("G1", "A", 100);
    gift.campaign_external_id = Some("701".to_string());
    let adapter = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![vec![donor("A", "a@example.org")]])
        .with_project_pages(vec![vec![project("701", "Gala")]])
        .with_donation_pages(vec![vec![gift]]);

    h.orchestrator
        .sync_organization_data(
            &adapter,
            &h.integration,
            SyncMode::Separate,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let entities: Vec<_> = adapter.fetches().into_iter().map(|(e, _)| e).collect();
    assert_eq!(entities, vec!["donors", "projects", "donations"]);
    let projects = h.store.projects(h.org).await;
    assert_eq!(projects.len(), 1, "no fallback bucket needed");
    assert_eq!(h.store.donations(h.org).await[0].project_id, projects[0].id);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_fetch_failure_marks_error_and_keeps_committed_pages() {
    let h = Harness::new("crm").await;
    let adapter = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![
            vec![donor("D1", "d1@example.org"), donor("D2", "d2@example.org")],
            vec![donor("D3", "d3@example.org")],
        ])
        .failing_on("donors", 1);

    let err = h
        .orchestrator
        .sync_organization_data(
            &adapter,
            &h.integration,
            SyncMode::Separate,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connector(_)));
    assert!(err.is_transient());
    let integration = h.integration().await;
    assert_eq!(integration.sync_status, SyncState::Error);
    assert_eq!(integration.sync_error.as_deref(), Some(err.to_string().as_str()));
    assert!(integration.last_sync_at.is_none());

    assert_eq!(h.store.donors(h.org).await.len(), 2);
    assert!(!adapter.fetches().iter().any(|(e, _)| *e == "donations"));
}

#[tokio::test]
async fn test_dangling_donation_does_not_abort_run() {
    let h = Harness::new("crm").await;
    let adapter = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![vec![donor("A", "a@example.org")]])
        .with_donation_pages(vec![
            vec![donation("G1", "GHOST", 100), donation("G2", "A", 200)],
            vec![donation("G3", "A", 300)],
        ]);

    let result = h
        .orchestrator
        .sync_organization_data(
            &adapter,
            &h.integration,
            SyncMode::Separate,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.donations.total, 3);
    assert_eq!(result.donations.created, 2);
    assert_eq!(result.donations.failed, 1);
    assert_eq!(h.integration().await.sync_status, SyncState::Idle);
}

// ============================================================================
// Single-flight and cancellation
// ============================================================================

#[tokio::test]
async fn test_concurrent_run_is_rejected_without_vendor_calls() {
    let h = Harness::new("crm").await;
    let (adapter, entered, release) = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![vec![donor("A", "a@example.org")]])
        .with_gate();
    let adapter = Arc::new(adapter);
    let cancel = CancellationToken::new();

    let first = h.orchestrator.sync_organization_data(
        adapter.as_ref(),
        &h.integration,
        SyncMode::Separate,
        &cancel,
    );
    let second = async {
        entered.notified().await;
        let fetches_before = adapter.fetch_count();
        let outcome = h
            .orchestrator
            .sync_organization_data(adapter.as_ref(), &h.integration, SyncMode::Separate, &cancel)
            .await;
        let fetches_after = adapter.fetch_count();
        release.notify_one();
        (outcome, fetches_before, fetches_after)
    };

    let (first, (second, before, after)) = tokio::join!(first, second);

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::AlreadySyncing { .. })));
    assert_eq!(before, after);
    assert_eq!(h.integration().await.sync_status, SyncState::Idle);
}

#[tokio::test]
async fn test_released_run_stops_without_overwriting_newer_status() {
    let h = Harness::new("crm").await;
    let (slow, entered, release) = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![
            vec![donor("D1", "d1@example.org")],
            vec![donor("D2", "d2@example.org")],
        ])
        .with_donation_pages(vec![vec![donation("G1", "D1", 100)]])
        .with_gate();
    let fast =
        ScriptedAdapter::new("crm").with_donor_pages(vec![vec![donor("F1", "f1@example.org")]]);
    let cancel = CancellationToken::new();

    let stuck = h.orchestrator.sync_organization_data(
        &slow,
        &h.integration,
        SyncMode::Separate,
        &cancel,
    );
    let recovery = async {
        entered.notified().await;
        // Recovery decides the gated run is dead and a new run takes over.
        let released = h
            .store
            .release_stale_syncs(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .sync_organization_data(&fast, &h.integration, SyncMode::Separate, &cancel)
            .await;
        release.notify_one();
        (released, second)
    };
    let (stuck, (released, second)) = tokio::join!(stuck, recovery);

    assert_eq!(released, 1);
    assert!(second.is_ok());
    assert!(matches!(stuck, Err(SyncError::LeaseLost { .. })));
    // The released run committed its in-flight page, then stopped before
    // fetching again.
    assert_eq!(slow.fetch_count(), 1);
    assert_eq!(h.store.donors(h.org).await.len(), 2);

    let integration = h.integration().await;
    assert_eq!(integration.sync_status, SyncState::Idle);
    assert!(integration.sync_error.is_none());
    assert!(integration.last_sync_at.is_some());
}

#[tokio::test]
async fn test_cancellation_stops_at_next_page_boundary() {
    let h = Harness::new("crm").await;
    let (adapter, entered, release) = ScriptedAdapter::new("crm")
        .with_donor_pages(vec![
            vec![donor("D1", "d1@example.org")],
            vec![donor("D2", "d2@example.org")],
        ])
        .with_gate();
    let cancel = CancellationToken::new();

    let run = h.orchestrator.sync_organization_data(
        &adapter,
        &h.integration,
        SyncMode::Separate,
        &cancel,
    );
    let canceller = async {
        entered.notified().await;
        cancel.cancel();
        release.notify_one();
    };
    let (outcome, ()) = tokio::join!(run, canceller);

    assert!(matches!(outcome, Err(SyncError::Cancelled)));
    assert_eq!(adapter.fetch_count(), 1);
    assert_eq!(h.store.donors(h.org).await.len(), 1);
    let integration = h.integration().await;
    assert_eq!(integration.sync_status, SyncState::Error);
    assert_eq!(integration.sync_error.as_deref(), Some("sync cancelled"));
}

// ============================================================================
// Combined mode
// ============================================================================

#[tokio::test]
async fn test_combined_mode_requires_capability() {
    let h = Harness::new("crm").await;
    let adapter =
        ScriptedAdapter::new("crm").with_donor_pages(vec![vec![donor("A", "a@example.org")]]);

    let err = h
        .orchestrator
        .sync_organization_data(
            &adapter,
            &h.integration,
            SyncMode::Combined,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Unsupported { .. }));
    assert_eq!(adapter.fetch_count(), 0);
    let integration = h.integration().await;
    assert_eq!(integration.sync_status, SyncState::Idle);
    assert!(integration.sync_error.is_none());
}

#[tokio::test]
async fn test_combined_mode_upserts_donors_with_nested_donations() {
    let h = Harness::new("crm").await;
    let mut nested = donation("G1", "", 1000);
    nested.campaign_external_id = Some("701".to_string());
    let adapter = ScriptedAdapter::new("crm")
        .with_project_pages(vec![vec![project("701", "Gala")]])
        .with_combined_pages(vec![
            vec![DonorWithDonations {
                donor: donor("A", "a@example.org"),
                donations: vec![nested, donation("G2", "A", 2000)],
            }],
            vec![DonorWithDonations {
                donor: donor("B", "b@example.org"),
                donations: vec![donation("G3", "B", 3000)],
            }],
        ]);

    let result = h
        .orchestrator
        .sync_organization_data(
            &adapter,
            &h.integration,
            SyncMode::Combined,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.donors.created, 2);
    assert_eq!(result.donations.created, 3);
    assert_eq!(result.projects.as_ref().unwrap().created, 1);
    let entities: Vec<_> = adapter.fetches().into_iter().map(|(e, _)| e).collect();
    assert_eq!(entities, vec!["projects", "combined", "combined"]);

    let donor_a = h
        .store
        .donor_by_external_id(&ScopedExternalId::new(&crm(), "A").unwrap())
        .await
        .unwrap();
    let donations = h.store.donations(h.org).await;
    assert_eq!(donations[0].donor_id, donor_a.id);
    assert_eq!(donations[1].donor_id, donor_a.id);
}
