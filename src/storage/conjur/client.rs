use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::debug;

use crate::config::ConjurSettings;
use crate::error::{PkiError, Result};
use crate::resource::{ResourceFilter, ResourceId};
use crate::storage::trust::{self, PinnedChain};

/// Access tokens are valid for eight minutes; refresh well before that.
const TOKEN_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// How a policy document is applied to its branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Adds to the branch, never deleting (`POST`).
    Append,
    /// Adds and updates, deleting only what the document says (`PATCH`).
    Update,
}

/// The Conjur operations the adapter relies on.
///
/// Resource documents are returned as untyped JSON, the way the server sends
/// them; decoding into typed resources happens in the adapter.
pub trait ConjurApi: Send + Sync {
    fn account(&self) -> &str;

    /// Whether a trust anchor for the appliance is already configured.
    fn has_trust_anchor(&self) -> bool;

    /// Captures the chain the appliance presents, without validating it.
    fn pin_trust(&self) -> Result<PinnedChain>;

    /// Trusts `chain` for all later calls.
    fn install_trust_anchor(&self, chain: &PinnedChain) -> Result<()>;

    fn resources(&self, filter: &ResourceFilter) -> Result<Vec<Value>>;

    fn resource(&self, id: &ResourceId) -> Result<Value>;

    fn add_secret(&self, id: &ResourceId, value: &[u8]) -> Result<()>;

    fn retrieve_secret(&self, id: &ResourceId) -> Result<Vec<u8>>;

    fn load_policy(&self, mode: PolicyMode, branch: &str, policy: &str) -> Result<()>;
}

struct CachedToken {
    header: String,
    fetched_at: Instant,
}

/// Blocking REST client authenticating with a host API key.
pub struct RestClient {
    settings: ConjurSettings,
    base_url: String,
    trust_anchor: RwLock<Option<String>>,
    http: RwLock<Option<Client>>,
    token: RwLock<Option<CachedToken>>,
}

fn poisoned<T>(_: T) -> PkiError {
    PkiError::BackendUnavailable("conjur client lock poisoned".to_string())
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Maps an HTTP error status onto the crate's error kinds.
fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(PkiError::ResourceNotFound(what.to_string()));
    }
    let body = response.text().unwrap_or_default();
    Err(PkiError::BackendQueryFailed(format!(
        "{what}: HTTP {status}: {}",
        body.trim()
    )))
}

impl RestClient {
    pub fn new(settings: ConjurSettings) -> Result<Self> {
        if settings.appliance_url.is_empty() || settings.account.is_empty() {
            return Err(PkiError::Config(
                "conjur appliance_url and account must be set".to_string(),
            ));
        }
        let trust_anchor = match settings.cert_file.as_deref() {
            Some(path) if path.exists() => Some(read_trust_anchor(path)?),
            _ => None,
        };
        let base_url = match settings.appliance_url.trim_end_matches('/') {
            url if url.contains("://") => url.to_string(),
            host => format!("https://{host}"),
        };
        Ok(Self {
            settings,
            base_url,
            trust_anchor: RwLock::new(trust_anchor),
            http: RwLock::new(None),
            token: RwLock::new(None),
        })
    }

    fn client(&self) -> Result<Client> {
        let cached = self.http.read().map_err(poisoned)?.clone();
        if let Some(client) = cached {
            return Ok(client);
        }

        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(self.settings.connect_timeout_secs))
            .timeout(Duration::from_secs(self.settings.timeout_secs));
        let anchor = self.trust_anchor.read().map_err(poisoned)?.clone();
        if let Some(pem) = anchor {
            for cert in reqwest::Certificate::from_pem_bundle(pem.as_bytes())? {
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder.build()?;
        *self.http.write().map_err(poisoned)? = Some(client.clone());
        Ok(client)
    }

    fn token(&self, client: &Client) -> Result<String> {
        let cached = self
            .token
            .read()
            .map_err(poisoned)?
            .as_ref()
            .filter(|token| token.fetched_at.elapsed() < TOKEN_LIFETIME)
            .map(|token| token.header.clone());
        if let Some(header) = cached {
            return Ok(header);
        }

        debug!(login = %self.settings.authn_login, "authenticating to conjur");
        let url = format!(
            "{}/authn/{}/{}/authenticate",
            self.base_url,
            segment(&self.settings.account),
            segment(&self.settings.authn_login)
        );
        let response = client
            .post(url)
            .body(self.settings.api_key.clone())
            .send()?;
        let raw = check(response, "authenticate")?.bytes()?;
        let header = format!("Token token=\"{}\"", BASE64.encode(raw));
        *self.token.write().map_err(poisoned)? = Some(CachedToken {
            header: header.clone(),
            fetched_at: Instant::now(),
        });
        Ok(header)
    }

    /// Sends an authenticated request. No lock is held while it is in flight.
    fn send(&self, what: &str, build: impl FnOnce(&Client) -> RequestBuilder) -> Result<Response> {
        let client = self.client()?;
        let token = self.token(&client)?;
        let response = build(&client).header(AUTHORIZATION, token).send()?;
        check(response, what)
    }

    fn resource_path(&self, root: &str, id: &ResourceId) -> String {
        format!(
            "{}/{root}/{}/{}/{}",
            self.base_url,
            segment(&id.account),
            segment(&id.kind),
            segment(&id.id)
        )
    }
}

fn read_trust_anchor(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PkiError::Config(format!("reading {}: {e}", path.display())))
}

impl ConjurApi for RestClient {
    fn account(&self) -> &str {
        &self.settings.account
    }

    fn has_trust_anchor(&self) -> bool {
        self.trust_anchor
            .read()
            .map(|anchor| anchor.is_some())
            .unwrap_or(false)
    }

    fn pin_trust(&self) -> Result<PinnedChain> {
        trust::pin_on_first_contact(
            &self.base_url,
            Duration::from_secs(self.settings.connect_timeout_secs),
        )
    }

    fn install_trust_anchor(&self, chain: &PinnedChain) -> Result<()> {
        let pem = chain.to_pem();
        if let Some(path) = self.settings.cert_file.as_deref() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PkiError::Config(format!("creating {}: {e}", parent.display())))?;
            }
            std::fs::write(path, &pem)
                .map_err(|e| PkiError::Config(format!("writing {}: {e}", path.display())))?;
        }
        *self.trust_anchor.write().map_err(poisoned)? = Some(pem);
        *self.http.write().map_err(poisoned)? = None;
        Ok(())
    }

    fn resources(&self, filter: &ResourceFilter) -> Result<Vec<Value>> {
        debug!(?filter, "listing conjur resources");
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(kind) = &filter.kind {
            query.push(("kind", kind.clone()));
        }
        if let Some(search) = &filter.search {
            query.push(("search", search.clone()));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(offset) = filter.offset {
            query.push(("offset", offset.to_string()));
        }
        let url = format!("{}/resources/{}", self.base_url, segment(&self.settings.account));
        Ok(self
            .send("resources", |client| client.get(url).query(&query))?
            .json()?)
    }

    fn resource(&self, id: &ResourceId) -> Result<Value> {
        debug!(resource = %id, "fetching conjur resource");
        let url = self.resource_path("resources", id);
        Ok(self.send(&id.to_string(), |client| client.get(url))?.json()?)
    }

    fn add_secret(&self, id: &ResourceId, value: &[u8]) -> Result<()> {
        debug!(resource = %id, "storing secret");
        let url = self.resource_path("secrets", id);
        let body = value.to_vec();
        self.send(&id.to_string(), |client| client.post(url).body(body))?;
        Ok(())
    }

    fn retrieve_secret(&self, id: &ResourceId) -> Result<Vec<u8>> {
        debug!(resource = %id, "retrieving secret");
        let url = self.resource_path("secrets", id);
        Ok(self
            .send(&id.to_string(), |client| client.get(url))?
            .bytes()?
            .to_vec())
    }

    fn load_policy(&self, mode: PolicyMode, branch: &str, policy: &str) -> Result<()> {
        debug!(branch, ?mode, "loading policy");
        let url = format!(
            "{}/policies/{}/policy/{}",
            self.base_url,
            segment(&self.settings.account),
            segment(branch)
        );
        let body = policy.to_string();
        self.send(&format!("policy {branch}"), |client| match mode {
            PolicyMode::Append => client.post(url).body(body),
            PolicyMode::Update => client.patch(url).body(body),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;

    fn settings() -> ConjurSettings {
        ConjurSettings {
            appliance_url: "conjur.example.com/".to_string(),
            account: "acct".to_string(),
            authn_login: "host/pkiaas".to_string(),
            api_key: "key".to_string(),
            ..ConjurSettings::default()
        }
    }

    #[test]
    fn test_requires_url_and_account() {
        let missing = ConjurSettings {
            account: String::new(),
            ..settings()
        };
        assert!(matches!(RestClient::new(missing), Err(PkiError::Config(_))));
    }

    #[test]
    fn test_paths_are_encoded() {
        let client = RestClient::new(settings()).unwrap();
        assert_eq!(client.base_url, "https://conjur.example.com");
        let id = ResourceId::new("acct", "variable", "pki/certificates/0a");
        assert_eq!(
            client.resource_path("secrets", &id),
            "https://conjur.example.com/secrets/acct/variable/pki%2Fcertificates%2F0a"
        );
        assert!(!client.has_trust_anchor());
    }

    #[test]
    fn test_trust_anchor_loaded_from_cert_file() {
        let path = std::env::temp_dir().join(format!("pkiaas-anchor-{}.pem", std::process::id()));
        std::fs::write(&path, "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n").unwrap();
        let client = RestClient::new(ConjurSettings {
            cert_file: Some(path.clone()),
            ..settings()
        })
        .unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(client.has_trust_anchor());
    }

    struct Request {
        line: String,
        authorization: Option<String>,
        body: String,
    }

    fn read_request(stream: &TcpStream) -> Request {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let mut authorization = None;
        let mut length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("authorization") {
                    authorization = Some(value.trim().to_string());
                } else if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();
        Request {
            line: line.trim_end().to_string(),
            authorization,
            body: String::from_utf8(body).unwrap(),
        }
    }

    /// Answers one connection per canned `(status, body)` pair, in order, and
    /// hands back the requests it saw.
    fn canned_server(responses: Vec<(u16, &'static str)>) -> (ConjurSettings, JoinHandle<Vec<Request>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = ConjurSettings {
            appliance_url: format!("http://{}", listener.local_addr().unwrap()),
            ..settings()
        };
        let handle = thread::spawn(move || {
            responses
                .into_iter()
                .map(|(status, body)| {
                    let (mut stream, _) = listener.accept().unwrap();
                    let request = read_request(&stream);
                    write!(
                        stream,
                        "HTTP/1.1 {status} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                    .unwrap();
                    request
                })
                .collect()
        });
        (settings, handle)
    }

    fn secret_id() -> ResourceId {
        ResourceId::new("acct", "variable", "pki/ca/key")
    }

    #[test]
    fn test_token_is_cached_between_calls() {
        let (settings, server) = canned_server(vec![(200, "raw-token"), (200, "first"), (200, "second")]);
        let client = RestClient::new(settings).unwrap();

        assert_eq!(client.retrieve_secret(&secret_id()).unwrap(), b"first");
        assert_eq!(client.retrieve_secret(&secret_id()).unwrap(), b"second");

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].line, "POST /authn/acct/host%2Fpkiaas/authenticate HTTP/1.1");
        assert_eq!(requests[0].body, "key");
        assert_eq!(requests[0].authorization, None);

        let expected = format!("Token token=\"{}\"", BASE64.encode("raw-token"));
        for request in &requests[1..] {
            assert_eq!(request.line, "GET /secrets/acct/variable/pki%2Fca%2Fkey HTTP/1.1");
            assert_eq!(request.authorization.as_deref(), Some(expected.as_str()));
        }
    }

    #[test]
    fn test_not_found_status() {
        let (settings, server) = canned_server(vec![(200, "raw-token"), (404, "")]);
        let client = RestClient::new(settings).unwrap();
        let err = client.retrieve_secret(&secret_id()).unwrap_err();
        assert!(matches!(err, PkiError::ResourceNotFound(ref what) if what == "acct:variable:pki/ca/key"));
        server.join().unwrap();
    }

    #[test]
    fn test_server_error_status() {
        let (settings, server) = canned_server(vec![(200, "raw-token"), (500, "internal error\n")]);
        let client = RestClient::new(settings).unwrap();
        match client.load_policy(PolicyMode::Update, "pki", "- !variable x") {
            Err(PkiError::BackendQueryFailed(message)) => {
                assert!(message.contains("500"), "{message}");
                assert!(message.ends_with("internal error"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let requests = server.join().unwrap();
        assert_eq!(requests[1].line, "PATCH /policies/acct/policy/pki HTTP/1.1");
        assert_eq!(requests[1].body, "- !variable x");
    }

    #[test]
    fn test_rejected_login() {
        let (settings, server) = canned_server(vec![(401, "")]);
        let client = RestClient::new(settings).unwrap();
        assert!(matches!(
            client.retrieve_secret(&secret_id()),
            Err(PkiError::BackendQueryFailed(_))
        ));
        server.join().unwrap();

        // A failed login caches nothing.
        assert!(client.token.read().unwrap().is_none());
    }

    #[test]
    fn test_undecodable_listing() {
        let (settings, server) = canned_server(vec![(200, "raw-token"), (200, "not json")]);
        let client = RestClient::new(settings).unwrap();
        assert!(matches!(client.resources(&ResourceFilter::kind("variable")), Err(PkiError::BackendQueryFailed(_))));
        let requests = server.join().unwrap();
        assert_eq!(requests[1].line, "GET /resources/acct?kind=variable HTTP/1.1");
    }

    #[test]
    fn test_closed_port_is_unavailable() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let client = RestClient::new(ConjurSettings {
            appliance_url: format!("http://127.0.0.1:{port}"),
            ..settings()
        })
        .unwrap();
        assert!(matches!(
            client.retrieve_secret(&secret_id()),
            Err(PkiError::BackendUnavailable(_))
        ));
        assert!(client.token.read().unwrap().is_none());
    }
}
