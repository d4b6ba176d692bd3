//! Opaque page tokens.
//!
//! A token is base64url-encoded JSON holding which SOQL query is being paged
//! and Salesforce's `nextRecordsUrl` query locator. The donor feed pages
//! through two queries back to back (contacts, then household accounts), so
//! the query discriminator has to travel with the locator.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use donorsync_connector::{ConnectorError, ConnectorResult};

/// Which query a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorEntity {
    Contact,
    Household,
    Opportunity,
    Campaign,
    ContactWithGifts,
}

impl CursorEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorEntity::Contact => "contact",
            CursorEntity::Household => "household",
            CursorEntity::Opportunity => "opportunity",
            CursorEntity::Campaign => "campaign",
            CursorEntity::ContactWithGifts => "contact_with_gifts",
        }
    }
}

/// Decoded page token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    #[serde(rename = "e")]
    pub entity: CursorEntity,
    /// `None` means "start this query from the top".
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub next_records_url: Option<String>,
}

impl PageCursor {
    #[must_use]
    pub fn start(entity: CursorEntity) -> Self {
        Self {
            entity,
            next_records_url: None,
        }
    }

    #[must_use]
    pub fn resume(entity: CursorEntity, next_records_url: impl Into<String>) -> Self {
        Self {
            entity,
            next_records_url: Some(next_records_url.into()),
        }
    }

    pub fn encode(&self) -> ConnectorResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a token, rejecting anything not produced by [`PageCursor::encode`].
    ///
    /// The locator must be a relative `/services/data/` path so a forged
    /// token cannot point the adapter at another host.
    pub fn decode(token: &str) -> ConnectorResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| invalid(format!("not base64url: {e}")))?;
        let cursor: PageCursor =
            serde_json::from_slice(&bytes).map_err(|e| invalid(format!("malformed: {e}")))?;
        if let Some(url) = &cursor.next_records_url {
            if !url.starts_with("/services/data/") || url.contains("://") {
                return Err(invalid(format!("unexpected query locator: {url}")));
            }
        }
        Ok(cursor)
    }

    /// Decode and check the token belongs to one of `allowed`.
    ///
    /// A missing token starts at `allowed[0]`.
    pub fn decode_for(token: Option<&str>, allowed: &[CursorEntity]) -> ConnectorResult<Self> {
        let Some(first) = allowed.first() else {
            return Err(invalid("no entity allowed".to_string()));
        };
        let Some(token) = token else {
            return Ok(Self::start(*first));
        };
        let cursor = Self::decode(token)?;
        if !allowed.contains(&cursor.entity) {
            return Err(invalid(format!(
                "token for {} used on a different feed",
                cursor.entity.as_str()
            )));
        }
        Ok(cursor)
    }
}

fn invalid(message: String) -> ConnectorError {
    ConnectorError::InvalidPageToken { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let cursor = PageCursor::resume(
            CursorEntity::Household,
            "/services/data/v59.0/query/01gD0000002HU6KIAW-2000",
        );
        let token = cursor.encode().unwrap();
        assert!(!token.contains('='));
        assert_eq!(PageCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn test_missing_token_starts_first_entity() {
        let cursor =
            PageCursor::decode_for(None, &[CursorEntity::Contact, CursorEntity::Household])
                .unwrap();
        assert_eq!(cursor, PageCursor::start(CursorEntity::Contact));
    }

    #[test]
    fn test_rejects_foreign_entity() {
        let token = PageCursor::start(CursorEntity::Campaign).encode().unwrap();
        let err = PageCursor::decode_for(Some(&token), &[CursorEntity::Opportunity]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PAGE_TOKEN");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(PageCursor::decode("!!!").is_err());
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(PageCursor::decode(&not_json).is_err());
    }

    #[test]
    fn test_rejects_absolute_locator() {
        let forged = PageCursor::resume(CursorEntity::Contact, "https://evil.example/services/data/x");
        let token = forged.encode().unwrap();
        assert!(PageCursor::decode(&token).is_err());
    }
}
