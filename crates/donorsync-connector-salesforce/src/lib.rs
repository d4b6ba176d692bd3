//! # Salesforce Adapter
//!
//! Provider adapter for Salesforce with the Nonprofit Success Pack (NPSP).
//!
//! ## Object mapping
//!
//! | Canonical | Salesforce |
//! |---|---|
//! | Donor (individual) | `Contact` |
//! | Donor (household) | `Account` with `npe01__SYSTEM_AccountType__c = 'Household Account'` |
//! | Donation | won `Opportunity` |
//! | Project | `Campaign` |
//!
//! All capabilities are supported: project paging, combined donor+gift
//! paging (nested `Opportunities` sub-select), push upload and the OAuth
//! web-server flow.
//!
//! ## Example
//!
//! ```ignore
//! use donorsync_connector_salesforce::{SalesforceAdapter, SalesforceConfig};
//!
//! let adapter = SalesforceAdapter::new(
//!     SalesforceConfig::new(client_id, client_secret)
//!         .with_redirect_uri("https://app.example.org/oauth/salesforce"),
//! )?;
//! registry.register(Arc::new(adapter));
//! ```

pub mod config;
pub mod connector;
pub mod cursor;
pub mod mapper;
pub mod retry;

pub use config::{SalesforceConfig, DEFAULT_API_VERSION, DEFAULT_LOGIN_URL};
pub use connector::{SalesforceAdapter, PROVIDER_NAME};
pub use cursor::{CursorEntity, PageCursor};
pub use retry::{LogVerbosity, RetryConfig};
