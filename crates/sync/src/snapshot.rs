use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use booksync_middleware::{SubjectBuilder, Transport};
use bytes::Bytes;
use reqwest::Url;
use tracing::debug;

use crate::error::SnapshotError;
use crate::types::{BookSnapshot, SnapshotRequest};

/// Source of full book snapshots used to (re)build a book.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(
        &self,
        market_id: &str,
        granularity: u32,
        depth: usize,
    ) -> Result<BookSnapshot, SnapshotError>;
}

/// Fetches snapshots with request/reply on `{prefix}.snapshot.{market}`.
pub struct TransportSnapshotClient {
    transport: Arc<dyn Transport>,
    subjects: Arc<SubjectBuilder>,
    timeout: Duration,
}

impl TransportSnapshotClient {
    pub fn new(transport: Arc<dyn Transport>, subjects: Arc<SubjectBuilder>, timeout: Duration) -> Self {
        Self {
            transport,
            subjects,
            timeout,
        }
    }
}

#[async_trait]
impl SnapshotSource for TransportSnapshotClient {
    async fn fetch_snapshot(
        &self,
        market_id: &str,
        granularity: u32,
        depth: usize,
    ) -> Result<BookSnapshot, SnapshotError> {
        let subject = self.subjects.snapshot(market_id);
        let request = SnapshotRequest {
            market_id: market_id.to_string(),
            granularity,
            depth,
        };
        let payload = Bytes::from(serde_json::to_vec(&request)?);

        debug!(subject = %subject, granularity, depth, "Requesting snapshot");
        let reply = self.transport.request(&subject, payload, self.timeout).await?;
        Ok(serde_json::from_slice(&reply.payload)?)
    }
}

/// Fetches snapshots from `GET {base}/markets/{market}/book?granularity=G&depth=D`.
pub struct HttpSnapshotClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSnapshotClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SnapshotError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SnapshotError::Http(format!("invalid snapshot url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SnapshotError::Http(format!(
                "invalid snapshot url {}: cannot be a base",
                base_url
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `{base}/markets/{market}/book`, with the market id percent-encoded as one segment.
    fn book_url(&self, market_id: &str) -> Result<Url, SnapshotError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SnapshotError::Http(format!("invalid snapshot url {}", self.base_url)))?
            .pop_if_empty()
            .extend(["markets", market_id, "book"]);
        Ok(url)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotClient {
    async fn fetch_snapshot(
        &self,
        market_id: &str,
        granularity: u32,
        depth: usize,
    ) -> Result<BookSnapshot, SnapshotError> {
        let url = self.book_url(market_id)?;
        debug!(url = %url, granularity, depth, "Requesting snapshot");

        let response = self
            .client
            .get(url)
            .query(&[("granularity", granularity.to_string()), ("depth", depth.to_string())])
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use booksync_middleware::{InMemoryTransport, TransportError};
    use rust_decimal::Decimal;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SNAPSHOT_JSON: &str = r#"{
        "sequence": 100,
        "bids": [{"price": "98", "size": "50", "total": "50"}],
        "asks": [{"price": "99", "size": "40", "total": "40"}],
        "timestamp": "2024-03-01T12:00:00Z"
    }"#;

    #[tokio::test]
    async fn test_transport_client_round_trip() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_with("test.clob.snapshot.BTC-YES", |payload| {
            let request: SnapshotRequest = serde_json::from_slice(&payload).unwrap();
            assert_eq!(request.granularity, 5);
            assert_eq!(request.depth, 10);
            Ok(Bytes::from(SNAPSHOT_JSON))
        });

        let client = TransportSnapshotClient::new(
            transport,
            Arc::new(SubjectBuilder::new("test", "clob")),
            Duration::from_secs(1),
        );
        let snapshot = client.fetch_snapshot("BTC-YES", 5, 10).await.unwrap();
        assert_eq!(snapshot.sequence, 100);
        assert_eq!(snapshot.bids[0].price, Decimal::from(98));
        assert!(snapshot.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_transport_client_no_responder() {
        let client = TransportSnapshotClient::new(
            Arc::new(InMemoryTransport::new()),
            Arc::new(SubjectBuilder::new("test", "clob")),
            Duration::from_secs(1),
        );
        let err = client.fetch_snapshot("BTC-YES", 1, 10).await.unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::Transport(TransportError::NoResponders(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_client_bad_payload() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.respond_with("test.clob.snapshot.BTC-YES", |_| Ok(Bytes::from("not json")));
        let client = TransportSnapshotClient::new(
            transport,
            Arc::new(SubjectBuilder::new("test", "clob")),
            Duration::from_secs(1),
        );
        let err = client.fetch_snapshot("BTC-YES", 1, 10).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Parse(_)));
    }

    #[tokio::test]
    async fn test_http_client_fetches_book() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/BTC-YES/book"))
            .and(query_param("granularity", "5"))
            .and(query_param("depth", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SNAPSHOT_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpSnapshotClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let snapshot = client.fetch_snapshot("BTC-YES", 5, 20).await.unwrap();
        assert_eq!(snapshot.sequence, 100);
        assert_eq!(snapshot.asks[0].size, Decimal::from(40));
    }

    #[tokio::test]
    async fn test_http_client_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpSnapshotClient::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = client.fetch_snapshot("BTC-YES", 1, 20).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Status(503)));
    }

    #[tokio::test]
    async fn test_http_client_escapes_market_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/markets/A%2FB%3F%23/book"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SNAPSHOT_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let base = format!("{}/api/", server.uri());
        let client = HttpSnapshotClient::new(&base, Duration::from_secs(2)).unwrap();
        let snapshot = client.fetch_snapshot("A/B?#", 1, 20).await.unwrap();
        assert_eq!(snapshot.sequence, 100);
    }

    #[test]
    fn test_http_client_rejects_bad_base_url() {
        assert!(matches!(
            HttpSnapshotClient::new("not a url", Duration::from_secs(1)),
            Err(SnapshotError::Http(_))
        ));
        assert!(matches!(
            HttpSnapshotClient::new("mailto:books@example.com", Duration::from_secs(1)),
            Err(SnapshotError::Http(_))
        ));
    }
}
