//! Salesforce adapter implementation.
//!
//! Reads NPSP data through the REST query API and writes back through the
//! sObject endpoints.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

use donorsync_connector::traits::{
    BulkUploader, CombinedFetcher, CrmAdapter, OAuthProvider, ProjectFetcher,
};
use donorsync_connector::{ConnectorError, ConnectorResult, OAuthTokens, ProviderCredentials};
use donorsync_core::{
    CanonicalDonation, CanonicalDonor, CanonicalProject, DonorWithDonations, PageRequest,
    PaginatedResponse, ProviderName,
};

use crate::config::SalesforceConfig;
use crate::cursor::{CursorEntity, PageCursor};
use crate::mapper::{
    campaign_payload, map_campaign, map_contact, map_household, map_opportunity,
    opportunity_payload, ContactPayload, CreateResponse, QueryResponse, SfCampaign, SfContact,
    SfHousehold, SfOpportunity, CAMPAIGN_FIELDS, CONTACT_FIELDS, HOUSEHOLD_ACCOUNT_TYPE,
    HOUSEHOLD_FIELDS, OPPORTUNITY_FIELDS,
};
use crate::retry::parse_retry_after;

/// Registry key for this adapter.
pub const PROVIDER_NAME: &str = "salesforce";

/// Salesforce accepts query batch sizes between 200 and 2000.
const MIN_BATCH_SIZE: u32 = 200;
const MAX_BATCH_SIZE: u32 = 2000;

/// Salesforce NPSP adapter.
pub struct SalesforceAdapter {
    config: SalesforceConfig,
    provider_name: ProviderName,
    client: Client,
}

impl std::fmt::Debug for SalesforceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SalesforceAdapter {
    /// Create an adapter. Fails on invalid configuration.
    pub fn new(config: SalesforceConfig) -> ConnectorResult<Self> {
        config.validate()?;
        let provider_name = ProviderName::new(PROVIDER_NAME)
            .map_err(|e| ConnectorError::invalid_configuration(e.to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                ConnectorError::invalid_configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            provider_name,
            client,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SalesforceConfig {
        &self.config
    }

    /// Instance URL stored in the integration metadata.
    fn instance_url<'a>(&self, credentials: &'a ProviderCredentials) -> ConnectorResult<&'a str> {
        credentials
            .metadata_str("instance_url")
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ConnectorError::invalid_configuration("integration metadata has no instance_url")
            })
    }

    fn data_url(&self, credentials: &ProviderCredentials, path: &str) -> ConnectorResult<String> {
        Ok(format!(
            "{}/services/data/{}/{}",
            self.instance_url(credentials)?,
            self.config.api_version,
            path.trim_start_matches('/')
        ))
    }

    fn authorized(&self, builder: RequestBuilder, credentials: &ProviderCredentials) -> RequestBuilder {
        builder
            .bearer_auth(&credentials.access_token)
            .header(header::ACCEPT, "application/json")
    }

    /// Send a request, retrying retryable statuses and transport errors.
    ///
    /// The builder is cloned per attempt, so bodies must be buffered (json or
    /// form).
    async fn send_with_retry(
        &self,
        method: &str,
        url: &str,
        request: RequestBuilder,
        body: Option<&Value>,
    ) -> ConnectorResult<Response> {
        let retry_config = &self.config.retry;
        let verbosity = &self.config.log_verbosity;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let Some(attempt_request) = request.try_clone() else {
                return Err(ConnectorError::operation_failed(format!(
                    "request to {url} cannot be retried"
                )));
            };

            if verbosity.is_enabled() {
                debug!(url = %url, method = method, attempt = attempt, "Sending Salesforce request");
            }
            if verbosity.log_bodies() {
                if let Some(json_body) = body {
                    trace!(body = %json_body, "Request body");
                }
            }

            match attempt_request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if verbosity.is_enabled() {
                        debug!(url = %url, status = %status, attempt = attempt, "Received Salesforce response");
                    }

                    if retry_config.should_retry(status.as_u16())
                        && attempt <= retry_config.max_retries
                    {
                        let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
                            resp.headers()
                                .get(header::RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(parse_retry_after)
                        } else {
                            None
                        };
                        let wait =
                            retry_after.unwrap_or_else(|| retry_config.calculate_backoff(attempt));

                        warn!(
                            url = %url,
                            status = %status,
                            attempt = attempt,
                            wait_ms = wait.as_millis(),
                            "Transient Salesforce error, retrying with backoff"
                        );

                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if attempt <= retry_config.max_retries {
                        let backoff = retry_config.calculate_backoff(attempt);
                        warn!(
                            url = %url,
                            error = %e,
                            attempt = attempt,
                            wait_ms = backoff.as_millis(),
                            "Salesforce request failed, retrying with backoff"
                        );

                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if e.is_timeout() {
                        return Err(ConnectorError::ConnectionTimeout {
                            timeout_secs: self.config.read_timeout_secs,
                        });
                    }
                    return Err(ConnectorError::network_with_source(
                        format!("Request failed after {attempt} attempts: {url}"),
                        e,
                    ));
                }
            }
        }
    }

    /// Map a non-success response to an error.
    ///
    /// Salesforce error bodies are arrays of `{message, errorCode}`.
    fn handle_response_error(status: StatusCode, body: &str, identifier: &str) -> ConnectorError {
        let error_message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| {
                json.get(0)
                    .and_then(|e| e.get("message"))
                    .or_else(|| json.get("error_description"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| body.to_string());

        match status {
            StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed,
            StatusCode::FORBIDDEN => ConnectorError::AuthorizationFailed {
                operation: identifier.to_string(),
            },
            StatusCode::NOT_FOUND => ConnectorError::ObjectNotFound {
                identifier: identifier.to_string(),
            },
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT => ConnectorError::TargetUnavailable {
                message: format!("HTTP {status}: {error_message}"),
            },
            _ => ConnectorError::operation_failed(format!("HTTP {status}: {error_message}")),
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
        identifier: &str,
    ) -> ConnectorResult<T> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ConnectorError::network_with_source(format!("Failed to read response body for {identifier}"), e)
        })?;
        if !status.is_success() {
            return Err(Self::handle_response_error(status, &text, identifier));
        }
        if self.config.log_verbosity.log_bodies() {
            trace!(body = %text, "Response body");
        }
        serde_json::from_str(&text).map_err(|e| ConnectorError::Serialization {
            message: format!("unexpected {identifier} payload: {e}"),
        })
    }

    /// Run one page of a SOQL query, either from the top or from a locator.
    async fn query_page<T: DeserializeOwned>(
        &self,
        credentials: &ProviderCredentials,
        soql: &str,
        next_records_url: Option<&str>,
        limit: u32,
    ) -> ConnectorResult<QueryResponse<T>> {
        let url = match next_records_url {
            Some(locator) => format!("{}{}", self.instance_url(credentials)?, locator),
            None => self.data_url(credentials, "query")?,
        };
        let batch_size = limit.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);

        let mut request = self
            .authorized(self.client.get(&url), credentials)
            .header("Sforce-Query-Options", format!("batchSize={batch_size}"));
        if next_records_url.is_none() {
            request = request.query(&[("q", soql)]);
        }

        let response = self.send_with_retry("GET", &url, request, None).await?;
        self.read_json(response, "query").await
    }

    fn contact_soql(&self) -> String {
        format!("SELECT {CONTACT_FIELDS} FROM Contact ORDER BY LastModifiedDate DESC")
    }

    fn household_soql(&self) -> String {
        format!(
            "SELECT {HOUSEHOLD_FIELDS} FROM Account \
             WHERE npe01__SYSTEM_AccountType__c = '{HOUSEHOLD_ACCOUNT_TYPE}' \
             ORDER BY LastModifiedDate DESC"
        )
    }

    fn opportunity_fields(&self) -> String {
        if self.config.multi_currency {
            format!("{OPPORTUNITY_FIELDS}, CurrencyIsoCode")
        } else {
            OPPORTUNITY_FIELDS.to_string()
        }
    }

    fn opportunity_soql(&self) -> String {
        format!(
            "SELECT {} FROM Opportunity WHERE IsWon = true ORDER BY LastModifiedDate DESC",
            self.opportunity_fields()
        )
    }

    fn campaign_soql(&self) -> String {
        format!("SELECT {CAMPAIGN_FIELDS} FROM Campaign ORDER BY LastModifiedDate DESC")
    }

    fn contact_with_gifts_soql(&self) -> String {
        format!(
            "SELECT {CONTACT_FIELDS}, \
             (SELECT {} FROM Opportunities WHERE IsWon = true ORDER BY CloseDate DESC) \
             FROM Contact ORDER BY LastModifiedDate DESC",
            self.opportunity_fields()
        )
    }

    /// Build the page response for a single-query feed.
    fn single_feed_page<T>(
        entity: CursorEntity,
        data: Vec<T>,
        done: bool,
        next_records_url: Option<String>,
        total: u64,
    ) -> ConnectorResult<PaginatedResponse<T>> {
        let page = match (done, next_records_url) {
            (false, Some(locator)) => {
                PaginatedResponse::more(data, PageCursor::resume(entity, locator).encode()?)
            }
            _ => PaginatedResponse::last(data),
        };
        Ok(page.with_total_count(total))
    }

    fn map_opportunities(
        &self,
        records: &[SfOpportunity],
        donor_override: Option<&str>,
    ) -> ConnectorResult<Vec<CanonicalDonation>> {
        let mut donations = Vec::with_capacity(records.len());
        for record in records {
            if let Some(donation) =
                map_opportunity(record, &self.config.default_currency, donor_override)?
            {
                donations.push(donation);
            }
        }
        Ok(donations)
    }

    /// Collect every nested opportunity of a contact, following the
    /// sub-query's own locator when Salesforce truncated it.
    async fn nested_opportunities(
        &self,
        credentials: &ProviderCredentials,
        contact: &SfContact,
    ) -> ConnectorResult<Vec<SfOpportunity>> {
        let Some(first) = &contact.opportunities else {
            return Ok(Vec::new());
        };
        let mut records = first.records.clone();
        let mut next = if first.done {
            None
        } else {
            first.next_records_url.clone()
        };
        while let Some(locator) = next {
            let page: QueryResponse<SfOpportunity> = self
                .query_page(credentials, "", Some(&locator), MAX_BATCH_SIZE)
                .await?;
            records.extend(page.records);
            next = if page.done { None } else { page.next_records_url };
        }
        Ok(records)
    }

    /// PATCH when `external_id` is set (falling back to one POST on 404),
    /// otherwise POST. Returns the vendor id of a created record.
    async fn upsert_sobject(
        &self,
        credentials: &ProviderCredentials,
        sobject: &str,
        external_id: &str,
        body: &Value,
    ) -> ConnectorResult<Option<String>> {
        if !external_id.is_empty() {
            let url = self.data_url(credentials, &format!("sobjects/{sobject}/{external_id}"))?;
            let request = self
                .authorized(self.client.patch(&url), credentials)
                .json(body);
            let response = self.send_with_retry("PATCH", &url, request, Some(body)).await?;
            let status = response.status();
            if status.is_success() {
                return Ok(None);
            }
            let text = response.text().await.unwrap_or_default();
            let error =
                Self::handle_response_error(status, &text, &format!("{sobject}/{external_id}"));
            if !matches!(error, ConnectorError::ObjectNotFound { .. }) {
                return Err(error);
            }
            info!(
                sobject = sobject,
                external_id = external_id,
                "Update target missing in Salesforce, recreating"
            );
        }

        let url = self.data_url(credentials, &format!("sobjects/{sobject}"))?;
        let request = self
            .authorized(self.client.post(&url), credentials)
            .json(body);
        let response = self.send_with_retry("POST", &url, request, Some(body)).await?;
        let created: CreateResponse = self.read_json(response, sobject).await?;
        if !created.success {
            return Err(ConnectorError::operation_failed(format!(
                "Salesforce rejected {sobject} create"
            )));
        }
        Ok(Some(created.id))
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> ConnectorResult<TokenResponse> {
        let url = self.config.oauth_url("token");
        let request = self.client.post(&url).form(params);
        let response = self.send_with_retry("POST", &url, request, None).await?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            ConnectorError::network_with_source("Failed to read token response", e)
        })?;

        if !status.is_success() {
            let error: OAuthErrorBody = serde_json::from_str(&text).unwrap_or_default();
            if error.error.as_deref() == Some("invalid_grant") {
                return Err(ConnectorError::CredentialsExpired);
            }
            return Err(ConnectorError::TokenRequestFailed {
                message: error
                    .error_description
                    .or(error.error)
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }

        serde_json::from_str(&text).map_err(|e| ConnectorError::TokenRequestFailed {
            message: format!("unexpected token response: {e}"),
        })
    }

    fn tokens_from_response(&self, response: TokenResponse) -> OAuthTokens {
        let issued_at = response
            .issued_at
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);
        let lifetime = response
            .expires_in
            .unwrap_or(self.config.session_lifetime_secs);
        let expires_at: DateTime<Utc> = issued_at + ChronoDuration::seconds(lifetime);

        let mut metadata = json!({});
        if let Some(instance_url) = response.instance_url {
            metadata["instance_url"] = json!(instance_url);
        }

        OAuthTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: Some(expires_at),
            metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    instance_url: Option<String>,
    /// Milliseconds since the epoch, as a string.
    #[serde(default)]
    issued_at: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl CrmAdapter for SalesforceAdapter {
    fn provider_name(&self) -> &ProviderName {
        &self.provider_name
    }

    fn display_name(&self) -> &str {
        "Salesforce"
    }

    #[instrument(skip(self, credentials, page), fields(token = page.page_token.is_some()))]
    async fn fetch_donors(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalDonor>> {
        let cursor = PageCursor::decode_for(
            page.page_token.as_deref(),
            &[CursorEntity::Contact, CursorEntity::Household],
        )?;
        let locator = cursor.next_records_url.as_deref();

        match cursor.entity {
            CursorEntity::Contact => {
                let response: QueryResponse<SfContact> = self
                    .query_page(credentials, &self.contact_soql(), locator, page.limit)
                    .await?;
                let donors: Vec<CanonicalDonor> = response.records.iter().map(map_contact).collect();
                // Contacts exhausted: continue with household accounts.
                let next = match (response.done, response.next_records_url) {
                    (false, Some(url)) => PageCursor::resume(CursorEntity::Contact, url),
                    _ => PageCursor::start(CursorEntity::Household),
                };
                Ok(PaginatedResponse::more(donors, next.encode()?)
                    .with_total_count(response.total_size))
            }
            _ => {
                let response: QueryResponse<SfHousehold> = self
                    .query_page(credentials, &self.household_soql(), locator, page.limit)
                    .await?;
                let donors = response.records.iter().map(map_household).collect();
                Self::single_feed_page(
                    CursorEntity::Household,
                    donors,
                    response.done,
                    response.next_records_url,
                    response.total_size,
                )
            }
        }
    }

    #[instrument(skip(self, credentials, page), fields(token = page.page_token.is_some()))]
    async fn fetch_donations(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalDonation>> {
        let cursor =
            PageCursor::decode_for(page.page_token.as_deref(), &[CursorEntity::Opportunity])?;
        let response: QueryResponse<SfOpportunity> = self
            .query_page(
                credentials,
                &self.opportunity_soql(),
                cursor.next_records_url.as_deref(),
                page.limit,
            )
            .await?;
        let donations = self.map_opportunities(&response.records, None)?;
        Self::single_feed_page(
            CursorEntity::Opportunity,
            donations,
            response.done,
            response.next_records_url,
            response.total_size,
        )
    }

    fn project_fetcher(&self) -> Option<&dyn ProjectFetcher> {
        Some(self)
    }

    fn combined_fetcher(&self) -> Option<&dyn CombinedFetcher> {
        Some(self)
    }

    fn uploader(&self) -> Option<&dyn BulkUploader> {
        Some(self)
    }

    fn oauth(&self) -> Option<&dyn OAuthProvider> {
        Some(self)
    }
}

#[async_trait]
impl ProjectFetcher for SalesforceAdapter {
    #[instrument(skip(self, credentials, page), fields(token = page.page_token.is_some()))]
    async fn fetch_projects(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<CanonicalProject>> {
        let cursor = PageCursor::decode_for(page.page_token.as_deref(), &[CursorEntity::Campaign])?;
        let response: QueryResponse<SfCampaign> = self
            .query_page(
                credentials,
                &self.campaign_soql(),
                cursor.next_records_url.as_deref(),
                page.limit,
            )
            .await?;
        let projects = response
            .records
            .iter()
            .map(map_campaign)
            .collect::<ConnectorResult<Vec<_>>>()?;
        Self::single_feed_page(
            CursorEntity::Campaign,
            projects,
            response.done,
            response.next_records_url,
            response.total_size,
        )
    }
}

#[async_trait]
impl CombinedFetcher for SalesforceAdapter {
    #[instrument(skip(self, credentials, page), fields(token = page.page_token.is_some()))]
    async fn fetch_donors_with_donations(
        &self,
        credentials: &ProviderCredentials,
        page: PageRequest,
    ) -> ConnectorResult<PaginatedResponse<DonorWithDonations>> {
        let cursor =
            PageCursor::decode_for(page.page_token.as_deref(), &[CursorEntity::ContactWithGifts])?;
        let response: QueryResponse<SfContact> = self
            .query_page(
                credentials,
                &self.contact_with_gifts_soql(),
                cursor.next_records_url.as_deref(),
                page.limit,
            )
            .await?;

        let mut data = Vec::with_capacity(response.records.len());
        for contact in &response.records {
            let opportunities = self.nested_opportunities(credentials, contact).await?;
            let donations = self.map_opportunities(&opportunities, Some(contact.id.trim()))?;
            data.push(DonorWithDonations {
                donor: map_contact(contact),
                donations,
            });
        }

        Self::single_feed_page(
            CursorEntity::ContactWithGifts,
            data,
            response.done,
            response.next_records_url,
            response.total_size,
        )
    }
}

#[async_trait]
impl BulkUploader for SalesforceAdapter {
    #[instrument(skip(self, credentials, donors), fields(count = donors.len()))]
    async fn upload_donors(
        &self,
        credentials: &ProviderCredentials,
        mut donors: Vec<CanonicalDonor>,
    ) -> ConnectorResult<Vec<CanonicalDonor>> {
        for donor in &mut donors {
            let body = serde_json::to_value(ContactPayload::from(&*donor))?;
            match self
                .upsert_sobject(credentials, "Contact", &donor.external_id, &body)
                .await
            {
                Ok(Some(id)) => donor.external_id = id,
                Ok(None) => {}
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => warn!(external_id = %donor.external_id, error = %e, "Contact upload failed"),
            }
        }
        Ok(donors)
    }

    #[instrument(skip(self, credentials, donations), fields(count = donations.len()))]
    async fn upload_donations(
        &self,
        credentials: &ProviderCredentials,
        mut donations: Vec<CanonicalDonation>,
    ) -> ConnectorResult<Vec<CanonicalDonation>> {
        for donation in &mut donations {
            let body = opportunity_payload(donation);
            match self
                .upsert_sobject(credentials, "Opportunity", &donation.external_id, &body)
                .await
            {
                Ok(Some(id)) => donation.external_id = id,
                Ok(None) => {}
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => {
                    warn!(external_id = %donation.external_id, error = %e, "Opportunity upload failed");
                }
            }
        }
        Ok(donations)
    }

    #[instrument(skip(self, credentials, projects), fields(count = projects.len()))]
    async fn upload_projects(
        &self,
        credentials: &ProviderCredentials,
        mut projects: Vec<CanonicalProject>,
    ) -> ConnectorResult<Vec<CanonicalProject>> {
        for project in &mut projects {
            let body = campaign_payload(project);
            match self
                .upsert_sobject(credentials, "Campaign", &project.external_id, &body)
                .await
            {
                Ok(Some(id)) => project.external_id = id,
                Ok(None) => {}
                Err(e) if e.is_auth_error() => return Err(e),
                Err(e) => warn!(external_id = %project.external_id, error = %e, "Campaign upload failed"),
            }
        }
        Ok(projects)
    }
}

#[async_trait]
impl OAuthProvider for SalesforceAdapter {
    fn authorization_url(&self, state: &str) -> ConnectorResult<String> {
        let redirect_uri = self.config.redirect_uri.as_deref().ok_or_else(|| {
            ConnectorError::invalid_configuration("redirect_uri is required for authorization")
        })?;
        let mut url = url::Url::parse(&self.config.oauth_url("authorize")).map_err(|e| {
            ConnectorError::invalid_configuration(format!("invalid login_url: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        Ok(url.into())
    }

    #[instrument(skip(self, code))]
    async fn exchange_auth_code(&self, code: &str) -> ConnectorResult<OAuthTokens> {
        let redirect_uri = self.config.redirect_uri.as_deref().ok_or_else(|| {
            ConnectorError::invalid_configuration("redirect_uri is required for code exchange")
        })?;
        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .await?;
        info!("Exchanged Salesforce authorization code");
        Ok(self.tokens_from_response(response))
    }

    #[instrument(skip_all)]
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
        _credentials: &ProviderCredentials,
    ) -> ConnectorResult<OAuthTokens> {
        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;
        debug!("Refreshed Salesforce access token");
        Ok(self.tokens_from_response(response))
    }

    #[instrument(skip_all)]
    async fn validate_token(&self, credentials: &ProviderCredentials) -> ConnectorResult<bool> {
        let base = credentials
            .metadata_str("instance_url")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| self.config.login_url.trim_end_matches('/').to_string());
        let url = format!("{base}/services/oauth2/userinfo");
        let request = self.authorized(self.client.get(&url), credentials);
        let response = self.send_with_retry("GET", &url, request, None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            s => {
                let text = response.text().await.unwrap_or_default();
                Err(Self::handle_response_error(s, &text, "userinfo"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;

    fn adapter() -> SalesforceAdapter {
        SalesforceAdapter::new(
            SalesforceConfig::new("client", "secret")
                .with_redirect_uri("https://app.example.org/callback")
                .with_retry(RetryConfig::disabled()),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = SalesforceAdapter::new(SalesforceConfig::new("", "secret")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_capabilities() {
        let adapter = adapter();
        assert_eq!(adapter.provider_name().as_str(), "salesforce");
        assert!(adapter.project_fetcher().is_some());
        assert!(adapter.combined_fetcher().is_some());
        assert!(adapter.uploader().is_some());
        assert!(adapter.oauth().is_some());
    }

    #[test]
    fn test_authorization_url() {
        let url = adapter().authorization_url("xyz").unwrap();
        assert!(url.starts_with("https://login.salesforce.com/services/oauth2/authorize?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.org%2Fcallback"));
    }

    #[test]
    fn test_soql_shapes() {
        let adapter = adapter();
        assert!(adapter
            .household_soql()
            .contains("npe01__SYSTEM_AccountType__c = 'Household Account'"));
        assert!(adapter.opportunity_soql().contains("IsWon = true"));
        assert!(!adapter.opportunity_soql().contains("CurrencyIsoCode"));
        assert!(adapter.contact_with_gifts_soql().contains("FROM Opportunities"));
        assert!(adapter.campaign_soql().ends_with("ORDER BY LastModifiedDate DESC"));
    }

    #[test]
    fn test_multi_currency_adds_field() {
        let adapter = SalesforceAdapter::new(
            SalesforceConfig::new("client", "secret").with_multi_currency(true),
        )
        .unwrap();
        assert!(adapter.opportunity_soql().contains("CurrencyIsoCode"));
    }

    #[test]
    fn test_handle_response_error_mapping() {
        let body = r#"[{"message":"Session expired or invalid","errorCode":"INVALID_SESSION_ID"}]"#;
        assert!(matches!(
            SalesforceAdapter::handle_response_error(StatusCode::UNAUTHORIZED, body, "query"),
            ConnectorError::AuthenticationFailed
        ));
        assert!(matches!(
            SalesforceAdapter::handle_response_error(StatusCode::FORBIDDEN, body, "query"),
            ConnectorError::AuthorizationFailed { .. }
        ));
        assert!(matches!(
            SalesforceAdapter::handle_response_error(StatusCode::NOT_FOUND, "", "Contact/1"),
            ConnectorError::ObjectNotFound { .. }
        ));
        let err = SalesforceAdapter::handle_response_error(
            StatusCode::BAD_REQUEST,
            r#"[{"message":"No such column 'Foo'","errorCode":"INVALID_FIELD"}]"#,
            "query",
        );
        assert!(err.to_string().contains("No such column"));
    }

    #[test]
    fn test_missing_instance_url() {
        let adapter = adapter();
        let creds = ProviderCredentials::new("t", json!({}));
        assert!(adapter.data_url(&creds, "query").is_err());
        let creds = ProviderCredentials::new("t", json!({"instance_url": "https://na1.salesforce.com/"}));
        assert_eq!(
            adapter.data_url(&creds, "query").unwrap(),
            "https://na1.salesforce.com/services/data/v59.0/query"
        );
    }

    #[test]
    fn test_tokens_from_response() {
        let adapter = adapter();
        let tokens = adapter.tokens_from_response(TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            instance_url: Some("https://na1.salesforce.com".to_string()),
            issued_at: Some("1700000000000".to_string()),
            expires_in: None,
        });
        let issued = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        assert_eq!(tokens.expires_at, Some(issued + ChronoDuration::seconds(7200)));
        assert_eq!(tokens.metadata["instance_url"], "https://na1.salesforce.com");
        assert!(tokens.refresh_token.is_none());
    }
}
