use std::{sync::Arc, time::Duration};

use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, SET_COOKIE, USER_AGENT},
    Client, StatusCode,
};
use serde_json::{json, Value};

use super::{HANDSHAKE_PATH, LOGIN_PATH};
use crate::{
    config::AppConfig,
    errors::{FusionError, FusionResult},
};

/// Request header that carries the anti-forgery token on authenticated calls.
pub const TOKEN_HEADER: &str = "XSRF-TOKEN";

/// Response headers searched for the token, in order. Header lookup is case-insensitive.
const TOKEN_HEADER_NAMES: [&str; 2] = ["XSRF-TOKEN", "X-XSRF-TOKEN"];
/// Cookie names searched for the token, in order.
const TOKEN_COOKIE_NAMES: [&str; 2] = ["XSRF-TOKEN", "xsrf-token"];

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    pub user: String,
    pub system_code: String,
    pub timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            base_url: base_url_for(&cfg.fusion.domain),
            user: cfg.fusion.user.clone(),
            system_code: cfg.fusion.system_code.clone(),
            timeout: cfg.http_timeout(),
        }
    }
}

/// Raw HTTP outcome of one authenticated call.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

struct Session {
    client: Client,
    token: String,
}

/// Owns the single live vendor session.
///
/// A session is a fresh cookie jar plus the anti-forgery token handed out
/// at login. It lives until [`SessionManager::invalidate`] or until a new
/// one is established in its place.
pub struct SessionManager {
    settings: SessionSettings,
    current: Option<Session>,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            current: None,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_established(&self) -> bool {
        self.current.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.token.as_str())
    }

    /// Handshake, then log in and capture the anti-forgery token.
    ///
    /// Any previous session is dropped first, so a failure leaves no session behind.
    pub async fn establish(&mut self) -> FusionResult<()> {
        self.current = None;

        let jar = Arc::new(Jar::default());
        let client = self.build_client(jar.clone())?;

        self.handshake(&client).await;

        let url = self.url(LOGIN_PATH);
        let body = json!({
            "userName": self.settings.user,
            "systemCode": self.settings.system_code,
        });
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FusionError::Auth(format!("login request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FusionError::Auth(format!("login rejected with HTTP {status}: {text}")));
        }

        let jar_cookies = jar
            .cookies(response.url())
            .and_then(|v| v.to_str().ok().map(str::to_string));
        let token = extract_token(response.headers(), jar_cookies.as_deref())
            .ok_or_else(|| FusionError::Auth("login response carried no XSRF-TOKEN".to_string()))?;

        metrics::counter!("fusion_logins_total").increment(1);
        tracing::info!(base_url = %self.settings.base_url, "vendor session established");

        self.current = Some(Session { client, token });
        Ok(())
    }

    pub fn invalidate(&mut self) {
        if self.current.take().is_some() {
            tracing::debug!("vendor session invalidated");
        }
    }

    /// POST `body` to `path` with the session token, logging in first if needed.
    pub async fn post_json(&mut self, path: &str, body: &Value) -> FusionResult<RawResponse> {
        if self.current.is_none() {
            self.establish().await?;
        }
        let session = self
            .current
            .as_ref()
            .ok_or_else(|| FusionError::Auth("no session after login".to_string()))?;

        let response = session
            .client
            .post(self.url(path))
            .header(TOKEN_HEADER, &session.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }

    /// Unauthenticated warm-up request; the vendor sets initial cookies here. Failures are ignored.
    async fn handshake(&self, client: &Client) {
        let res = client
            .get(self.url(HANDSHAKE_PATH))
            .header(ACCEPT, "text/html,application/json")
            .send()
            .await;
        if let Err(e) = res {
            tracing::debug!(error = %e, "handshake request failed, continuing with login");
        }
    }

    fn build_client(&self, jar: Arc<Jar>) -> FusionResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        if let Ok(origin) = HeaderValue::from_str(&self.settings.base_url) {
            headers.insert(ORIGIN, origin);
        }
        if let Ok(referer) = HeaderValue::from_str(&format!("{}/", self.settings.base_url)) {
            headers.insert(REFERER, referer);
        }

        Client::builder()
            .cookie_provider(jar)
            .default_headers(headers)
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| FusionError::Config(format!("failed to build HTTP client: {e}")))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }
}

/// `la5.fusionsolar.huawei.com` becomes `https://la5.fusionsolar.huawei.com`; full URLs are kept.
pub fn base_url_for(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    }
}

/// First non-empty token from the response headers, the raw `Set-Cookie`
/// headers, or the cookie jar (as a `name=value; ...` header string).
pub fn extract_token(headers: &HeaderMap, jar_cookies: Option<&str>) -> Option<String> {
    let from_header = TOKEN_HEADER_NAMES.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    });
    if from_header.is_some() {
        return from_header;
    }

    let from_set_cookie = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|raw| {
            // Only the leading `name=value` pair of a Set-Cookie line is the cookie itself.
            let pair = raw.split(';').next()?;
            cookie_value(pair, &TOKEN_COOKIE_NAMES)
        });
    if from_set_cookie.is_some() {
        return from_set_cookie;
    }

    jar_cookies.and_then(|header| cookie_value(header, &TOKEN_COOKIE_NAMES))
}

fn cookie_value(header: &str, names: &[&str]) -> Option<String> {
    names.iter().find_map(|wanted| {
        header.split(';').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let value = value.trim();
            (name.trim() == *wanted && !value.is_empty()).then(|| value.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn settings(base_url: String) -> SessionSettings {
        SessionSettings {
            base_url,
            user: "api-user".to_string(),
            system_code: "secret".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn token_from_response_header() {
        let mut headers = HeaderMap::new();
        headers.insert("xsrf-token", HeaderValue::from_static("abc"));
        assert_eq!(extract_token(&headers, None).as_deref(), Some("abc"));
    }

    #[test]
    fn token_from_alternate_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-xsrf-token", HeaderValue::from_static("alt"));
        assert_eq!(extract_token(&headers, Some("XSRF-TOKEN=jar")).as_deref(), Some("alt"));
    }

    #[test]
    fn token_from_set_cookie_when_headers_absent() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("JSESSIONID=s1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("XSRF-TOKEN=cookie-tok; Path=/; Secure"));
        assert_eq!(extract_token(&headers, None).as_deref(), Some("cookie-tok"));
    }

    #[test]
    fn token_from_jar_as_last_resort() {
        let headers = HeaderMap::new();
        assert_eq!(
            extract_token(&headers, Some("JSESSIONID=s1; xsrf-token=lower")).as_deref(),
            Some("lower")
        );
    }

    #[test]
    fn empty_values_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert("xsrf-token", HeaderValue::from_static(""));
        assert_eq!(extract_token(&headers, Some("XSRF-TOKEN=")), None);
        assert_eq!(extract_token(&headers, Some("XSRF-TOKEN=; xsrf-token=b")).as_deref(), Some("b"));
    }

    #[test]
    fn base_url_normalization() {
        assert_eq!(base_url_for("la5.fusionsolar.huawei.com"), "https://la5.fusionsolar.huawei.com");
        assert_eq!(base_url_for("http://127.0.0.1:1234/"), "http://127.0.0.1:1234");
    }

    #[tokio::test]
    async fn establish_logs_in_and_sends_token() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/thirdData/login")
            .match_body(Matcher::Json(serde_json::json!({
                "userName": "api-user",
                "systemCode": "secret"
            })))
            .with_status(200)
            .with_header("XSRF-TOKEN", "tok-1")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;
        let call = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .match_header("xsrf-token", "tok-1")
            .with_status(200)
            .with_body(r#"{"success":true,"data":[]}"#)
            .create_async()
            .await;

        let mut sessions = SessionManager::new(settings(server.url()));
        assert!(!sessions.is_established());

        let raw = sessions
            .post_json("/thirdData/getStationRealKpi", &serde_json::json!({"stationCodes": "NE=1"}))
            .await
            .unwrap();

        assert_eq!(raw.status, StatusCode::OK);
        assert_eq!(sessions.token(), Some("tok-1"));
        login.assert_async().await;
        call.assert_async().await;
    }

    #[tokio::test]
    async fn token_from_cookie_is_accepted() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/thirdData/login")
            .with_status(200)
            .with_header("Set-Cookie", "XSRF-TOKEN=from-cookie; Path=/")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let mut sessions = SessionManager::new(settings(server.url()));
        sessions.establish().await.unwrap();

        assert_eq!(sessions.token(), Some("from-cookie"));
    }

    #[tokio::test]
    async fn missing_token_is_auth_error() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/thirdData/login")
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let mut sessions = SessionManager::new(settings(server.url()));
        let res = sessions.establish().await;

        assert!(matches!(res, Err(FusionError::Auth(_))));
        assert!(!sessions.is_established());
    }

    #[tokio::test]
    async fn rejected_login_is_auth_error() {
        let mut server = Server::new_async().await;
        let _login = server
            .mock("POST", "/thirdData/login")
            .with_status(401)
            .create_async()
            .await;

        let mut sessions = SessionManager::new(settings(server.url()));
        assert!(matches!(sessions.establish().await, Err(FusionError::Auth(_))));
    }

    #[tokio::test]
    async fn invalidate_forces_new_login() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/thirdData/login")
            .with_status(200)
            .with_header("XSRF-TOKEN", "tok")
            .expect(2)
            .create_async()
            .await;
        let _call = server
            .mock("POST", "/thirdData/getStationRealKpi")
            .with_status(200)
            .with_body("{}")
            .expect(2)
            .create_async()
            .await;

        let mut sessions = SessionManager::new(settings(server.url()));
        let body = serde_json::json!({"stationCodes": "NE=1"});
        sessions.post_json("/thirdData/getStationRealKpi", &body).await.unwrap();
        sessions.invalidate();
        assert!(!sessions.is_established());
        sessions.post_json("/thirdData/getStationRealKpi", &body).await.unwrap();

        login.assert_async().await;
    }
}
