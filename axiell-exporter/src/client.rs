//! Client for the Axiell Collections `wwwopac.ashx` API.
//!
//! Two request shapes are used:
//!
//! - `?command=listdatabases&output=xml[&limit=N]` returns an `adlibXML`
//!   envelope with one `record` per database.
//! - `?database=<name>&search=all` returns an `adlibJSON` envelope whose
//!   `diagnostic.hits` field is the number of records in that database.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiConfig;

/// Name of the root element of a database listing.
const LIST_ROOT: &str = "adlibXML";

/// Errors returned by upstream calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Transport failure, timeout or non-success HTTP status.
    #[error("Network error: {0}")]
    Network(String),
    /// The response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Short kind name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Network(_) => "network",
            UpstreamError::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Network(err.to_string())
    }
}

/// A source of datasets and their item counts.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// List the raw names of all datasets, in upstream order.
    async fn list_datasets(&self) -> Result<Vec<String>, UpstreamError>;

    /// Fetch the number of items in one dataset.
    async fn fetch_count(&self, dataset: &str) -> Result<i64, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct CountEnvelope {
    #[serde(rename = "adlibJSON")]
    adlib_json: AdlibJson,
}

#[derive(Debug, Deserialize)]
struct AdlibJson {
    diagnostic: Diagnostic,
}

#[derive(Debug, Deserialize)]
struct Diagnostic {
    hits: i64,
}

fn invalid_xml(err: quick_xml::Error) -> UpstreamError {
    UpstreamError::Decode(format!("invalid XML: {}", err))
}

/// Position of the listing reader inside an `adlibXML` document.
#[derive(Debug, Default)]
struct ListingWalk {
    names: Vec<String>,
    depth: usize,
    seen_root: bool,
    seen_record_list: bool,
    in_record_list: bool,
    in_record: bool,
    in_database: bool,
    database: Option<String>,
}

impl ListingWalk {
    fn open(&mut self, name: &[u8], is_empty: bool) -> Result<(), UpstreamError> {
        let level = self.depth + 1;

        match level {
            1 => {
                if name != LIST_ROOT.as_bytes() {
                    return Err(UpstreamError::Decode(format!(
                        "expected <{}> envelope, found <{}>",
                        LIST_ROOT,
                        String::from_utf8_lossy(name)
                    )));
                }
                self.seen_root = true;
            }
            2 if name == b"recordList" => {
                self.seen_record_list = true;
                self.in_record_list = !is_empty;
            }
            3 if self.in_record_list && name == b"record" => {
                if is_empty {
                    return Err(UpstreamError::Decode("record without database".to_string()));
                }
                self.in_record = true;
                self.database = None;
            }
            4 if self.in_record && name == b"database" => {
                self.database = Some(String::new());
                self.in_database = !is_empty;
            }
            _ => {}
        }

        if !is_empty {
            self.depth = level;
        }
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.in_database && self.depth == 4 {
            if let Some(database) = self.database.as_mut() {
                database.push_str(text);
            }
        }
    }

    fn close(&mut self) -> Result<(), UpstreamError> {
        match self.depth {
            4 => self.in_database = false,
            3 if self.in_record => {
                self.in_record = false;
                let name = self.database.take().ok_or_else(|| {
                    UpstreamError::Decode("record without database".to_string())
                })?;
                self.names.push(name);
            }
            2 => self.in_record_list = false,
            _ => {}
        }
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn finish(self) -> Result<Vec<String>, UpstreamError> {
        if !self.seen_root {
            return Err(UpstreamError::Decode("empty XML document".to_string()));
        }
        if self.depth != 0 {
            return Err(UpstreamError::Decode(
                "unexpected end of XML document".to_string(),
            ));
        }
        if !self.seen_record_list {
            return Err(UpstreamError::Decode(format!(
                "missing recordList in <{}>",
                LIST_ROOT
            )));
        }
        Ok(self.names)
    }
}

/// Decode a `listdatabases` XML response into raw dataset names.
///
/// Names are returned exactly as written in `recordList/record/database`,
/// surrounding whitespace included. Other record children are ignored.
pub fn parse_database_list(xml: &str) -> Result<Vec<String>, UpstreamError> {
    let mut reader = Reader::from_str(xml);
    let mut walk = ListingWalk::default();

    loop {
        match reader.read_event().map_err(invalid_xml)? {
            Event::Start(e) => walk.open(e.name().as_ref(), false)?,
            Event::Empty(e) => walk.open(e.name().as_ref(), true)?,
            Event::Text(e) => walk.text(&e.unescape().map_err(invalid_xml)?),
            Event::CData(e) => walk.text(&String::from_utf8_lossy(&e)),
            Event::End(_) => walk.close()?,
            Event::Eof => break,
            _ => {}
        }
    }

    walk.finish()
}

/// Decode a search JSON response into its hit count.
pub fn parse_hit_count(json: &str) -> Result<i64, UpstreamError> {
    let envelope: CountEnvelope = serde_json::from_str(json)
        .map_err(|e| UpstreamError::Decode(format!("invalid search response: {}", e)))?;
    Ok(envelope.adlib_json.diagnostic.hits)
}

/// HTTP client for one Axiell API endpoint.
#[derive(Debug, Clone)]
pub struct AxiellClient {
    http: reqwest::Client,
    base_url: Url,
    list_limit: Option<u32>,
}

impl AxiellClient {
    /// Create a client from the API configuration.
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base URL {}: {}", config.base_url, e))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            list_limit: config.list_limit,
        })
    }

    /// Issue one GET with the given query and return the full body.
    async fn get_text(&self, query: &[(&str, &str)]) -> Result<String, UpstreamError> {
        let request = self
            .http
            .get(self.base_url.clone())
            .query(query)
            .build()?;

        debug!(url = %request.url(), "Fetching");

        let response = self.http.execute(request).await?;
        let status = response.status();

        // Drain the body before looking at the status so the connection is released.
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UpstreamError::Network(format!(
                "upstream returned HTTP {}",
                status
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl DatasetSource for AxiellClient {
    async fn list_datasets(&self) -> Result<Vec<String>, UpstreamError> {
        let limit = self.list_limit.map(|limit| limit.to_string());

        let mut query = vec![("command", "listdatabases"), ("output", "xml")];
        if let Some(limit) = &limit {
            query.push(("limit", limit.as_str()));
        }

        let body = self.get_text(&query).await?;
        parse_database_list(&body)
    }

    async fn fetch_count(&self, dataset: &str) -> Result<i64, UpstreamError> {
        let body = self
            .get_text(&[("database", dataset), ("search", "all")])
            .await?;
        parse_hit_count(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<adlibXML>
  <recordList>
    <record>
      <database>transfer_natural_history</database>
      <datasource>transfer_natural_history</datasource>
    </record>
    <record>
      <database>newcollect</database>
      <datasource>collect>intern</datasource>
    </record>
    <record>
      <database>photos</database>
    </record>
  </recordList>
  <diagnostic>
    <hits>3</hits>
  </diagnostic>
</adlibXML>"#;

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn api_handler(
        State(seen): State<Seen>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        seen.lock().unwrap().push(params.clone());

        if params.get("command").map(String::as_str) == Some("listdatabases") {
            return LISTING.into_response();
        }

        match params.get("database").map(String::as_str) {
            Some("newcollect") => r#"{"adlibJSON":{"diagnostic":{"hits":42}}}"#.into_response(),
            Some("my photos & prints") => {
                r#"{"adlibJSON":{"diagnostic":{"hits":7,"limit":1}}}"#.into_response()
            }
            Some("broken") => r#"{"adlibJSON":{"recordList":{}}}"#.into_response(),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "database not found").into_response(),
        }
    }

    async fn spawn_upstream() -> (SocketAddr, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route("/api/wwwopac.ashx", get(api_handler))
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (addr, seen)
    }

    fn client_for(addr: SocketAddr, list_limit: Option<u32>) -> AxiellClient {
        AxiellClient::new(&ApiConfig {
            base_url: format!("http://{}/api/wwwopac.ashx", addr),
            list_limit,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_database_list() {
        let names = parse_database_list(LISTING).unwrap();
        assert_eq!(names, vec!["transfer_natural_history", "newcollect", "photos"]);
    }

    #[test]
    fn test_parse_database_list_empty() {
        let names = parse_database_list("<adlibXML><recordList></recordList></adlibXML>").unwrap();
        assert!(names.is_empty());

        let names = parse_database_list("<adlibXML><recordList/></adlibXML>").unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn test_parse_database_list_keeps_whitespace() {
        let xml = "<adlibXML><recordList>\
            <record><database>transfer_natural_history </database></record>\
            <record><database> newcollect</database></record>\
            </recordList></adlibXML>";

        let names = parse_database_list(xml).unwrap();
        assert_eq!(names, vec!["transfer_natural_history ", " newcollect"]);
    }

    #[test]
    fn test_parse_database_list_unescapes_text() {
        let xml = "<adlibXML><recordList>\
            <record><database>photos &amp; prints</database></record>\
            <record><database><![CDATA[a<b]]></database></record>\
            <record><database></database></record>\
            </recordList></adlibXML>";

        let names = parse_database_list(xml).unwrap();
        assert_eq!(names, vec!["photos & prints", "a<b", ""]);
    }

    #[test]
    fn test_parse_database_list_record_without_database() {
        for xml in [
            "<adlibXML><recordList><record><datasource>x</datasource></record></recordList></adlibXML>",
            "<adlibXML><recordList><record/></recordList></adlibXML>",
        ] {
            let err = parse_database_list(xml).unwrap_err();
            assert!(matches!(err, UpstreamError::Decode(_)), "{}", xml);
        }
    }

    #[test]
    fn test_parse_database_list_wrong_envelope() {
        let err = parse_database_list("<adlibJSON><recordList/></adlibJSON>").unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
        assert!(err.to_string().contains("adlibXML"));
    }

    #[test]
    fn test_parse_database_list_missing_record_list() {
        let err = parse_database_list("<adlibXML><diagnostic/></adlibXML>").unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
    }

    #[test]
    fn test_parse_database_list_malformed() {
        assert!(matches!(
            parse_database_list("<adlibXML><recordList>"),
            Err(UpstreamError::Decode(_))
        ));
        assert!(matches!(
            parse_database_list(""),
            Err(UpstreamError::Decode(_))
        ));
        assert!(matches!(
            parse_database_list("<html><body>Server Error</body></html>"),
            Err(UpstreamError::Decode(_))
        ));
    }

    #[test]
    fn test_parse_hit_count() {
        assert_eq!(
            parse_hit_count(r#"{"adlibJSON":{"diagnostic":{"hits":42}}}"#).unwrap(),
            42
        );
    }

    #[test]
    fn test_parse_hit_count_full_diagnostic() {
        let json = r#"{
            "adlibJSON": {
                "recordList": { "record": [] },
                "diagnostic": {
                    "hits": 1337,
                    "hits_on_display": 0,
                    "first_item": 1,
                    "forward": 0,
                    "backward": 0,
                    "limit": 0
                }
            }
        }"#;
        assert_eq!(parse_hit_count(json).unwrap(), 1337);
    }

    #[test]
    fn test_parse_hit_count_passes_negative_through() {
        assert_eq!(
            parse_hit_count(r#"{"adlibJSON":{"diagnostic":{"hits":-1}}}"#).unwrap(),
            -1
        );
    }

    #[test]
    fn test_parse_hit_count_missing_field_is_error() {
        for json in [
            r#"{"adlibJSON":{"diagnostic":{}}}"#,
            r#"{"adlibJSON":{}}"#,
            r#"{}"#,
            r#"{"adlibJSON":{"diagnostic":{"hits":"many"}}}"#,
            r#"{"adlibJSON":{"diagnostic":{"hits":1.5}}}"#,
            "not json",
        ] {
            assert!(
                matches!(parse_hit_count(json), Err(UpstreamError::Decode(_))),
                "expected decode error for {}",
                json
            );
        }
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(UpstreamError::Network("x".into()).kind(), "network");
        assert_eq!(UpstreamError::Decode("x".into()).kind(), "decode");
    }

    #[tokio::test]
    async fn test_list_datasets_request_shape() {
        let (addr, seen) = spawn_upstream().await;
        let client = client_for(addr, Some(100));

        let names = client.list_datasets().await.unwrap();
        assert_eq!(names.len(), 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("command").unwrap(), "listdatabases");
        assert_eq!(seen[0].get("output").unwrap(), "xml");
        assert_eq!(seen[0].get("limit").unwrap(), "100");
    }

    #[tokio::test]
    async fn test_list_datasets_without_limit() {
        let (addr, seen) = spawn_upstream().await;
        let client = client_for(addr, None);

        client.list_datasets().await.unwrap();
        assert!(!seen.lock().unwrap()[0].contains_key("limit"));
    }

    #[tokio::test]
    async fn test_fetch_count() {
        let (addr, seen) = spawn_upstream().await;
        let client = client_for(addr, None);

        assert_eq!(client.fetch_count("newcollect").await.unwrap(), 42);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].get("database").unwrap(), "newcollect");
        assert_eq!(seen[0].get("search").unwrap(), "all");
    }

    #[tokio::test]
    async fn test_fetch_count_escapes_dataset_name() {
        let (addr, seen) = spawn_upstream().await;
        let client = client_for(addr, None);

        assert_eq!(client.fetch_count("my photos & prints").await.unwrap(), 7);
        assert_eq!(
            seen.lock().unwrap()[0].get("database").unwrap(),
            "my photos & prints"
        );
    }

    #[tokio::test]
    async fn test_fetch_count_decode_error() {
        let (addr, _) = spawn_upstream().await;
        let client = client_for(addr, None);

        let err = client.fetch_count("broken").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_count_http_error_status() {
        let (addr, _) = spawn_upstream().await;
        let client = client_for(addr, None);

        let err = client.fetch_count("missing").await.unwrap_err();
        assert!(matches!(err, UpstreamError::Network(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind and immediately release a port so nothing is listening on it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(addr, Some(100));

        assert!(matches!(
            client.list_datasets().await,
            Err(UpstreamError::Network(_))
        ));
        assert!(matches!(
            client.fetch_count("newcollect").await,
            Err(UpstreamError::Network(_))
        ));
    }

    #[test]
    fn test_new_rejects_invalid_base_url() {
        let result = AxiellClient::new(&ApiConfig {
            base_url: "::not a url".to_string(),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
