use crate::augment::RawValue;
use crate::definitions::DefinitionGroup;
use reqwest::header::LOCATION;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not construct the HTTP client")]
    CreateReqwest(#[source] reqwest::Error),
    #[error("login request to {1} failed")]
    Login(#[source] reqwest::Error, String),
    #[error("authentication as `{0}` failed (expected a redirect to `{1}`)")]
    AuthenticationFailed(String, String),
    #[error("values request for group `{1}` failed")]
    Values(#[source] reqwest::Error, &'static str),
    #[error("the session expired while requesting values for group `{0}`")]
    SessionExpired(&'static str),
    #[error("values response for group `{1}` is not valid JSON")]
    ValuesJsonDecode(#[source] reqwest::Error, &'static str),
    #[error("values response for group `{0}` is neither a list nor an object with `Values`")]
    UnexpectedPayload(&'static str),
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// E-mail address of the MyUpway account.
    #[arg(long, env = "MYUPWAY_EMAIL")]
    email: String,

    /// Password of the MyUpway account.
    #[arg(long, env = "MYUPWAY_PASSWORD", hide_env_values = true)]
    password: String,

    /// The system (heat pump) ID, as seen in the MyUpway URLs.
    #[arg(long, short = 's')]
    system_id: u64,

    /// Where the MyUpway web service is reachable.
    #[arg(long, default_value = "https://myupway.com")]
    base_url: reqwest::Url,

    /// Give up on a request if it does not complete in this amount of time.
    #[arg(long, default_value = "10s")]
    timeout: humantime::Duration,
}

impl Args {
    pub fn system_id(&self) -> u64 {
        self.system_id
    }

    #[cfg(test)]
    pub(crate) fn for_test_server(base_url: &str, system_id: u64) -> Self {
        Self {
            email: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            system_id,
            base_url: base_url.parse().expect("mock server URL"),
            timeout: std::time::Duration::from_secs(5).into(),
        }
    }
}

pub struct Connection {
    http: reqwest::Client,
    args: Args,
}

impl Connection {
    /// Construct a client and log in with the configured credentials.
    pub async fn login(args: Args) -> Result<Connection, Error> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            // The login response is judged by where it redirects to.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(*args.timeout)
            .build()
            .map_err(Error::CreateReqwest)?;
        let connection = Self { http, args };
        connection.authenticate().await?;
        Ok(connection)
    }

    pub fn system_id(&self) -> u64 {
        self.args.system_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.args.base_url.as_str().trim_end_matches('/'), path)
    }

    /// (Re-)establish the session cookie.
    ///
    /// The login endpoint does not report failures with 4XX status codes. A successful login is
    /// recognized by the redirect to the `returnUrl` that was requested.
    pub async fn authenticate(&self) -> Result<(), Error> {
        let url = self.url("LogIn");
        let return_url = format!("/System/{}/Status/Overview", self.args.system_id);
        info!(message = "logging in...", url = url.as_str(), system_id = self.args.system_id);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("returnUrl", return_url.as_str()),
                ("Email", self.args.email.as_str()),
                ("Password", self.args.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Login(e, url.clone()))?;
        let status = response.status();
        let location = response.headers().get(LOCATION).and_then(|v| v.to_str().ok());
        debug!(message = "login response", %status, ?location);
        if !status.is_redirection() || !location.is_some_and(|l| redirects_to(l, &return_url)) {
            return Err(Error::AuthenticationFailed(self.args.email.clone(), return_url));
        }
        info!(message = "logged in");
        Ok(())
    }

    /// Request the current values of all registers in `group`.
    pub async fn fetch_values(&self, group: &DefinitionGroup) -> Result<Vec<RawValue>, Error> {
        let url = self.url("PrivateAPI/Values");
        let mut form = vec![("hpid", self.args.system_id.to_string())];
        form.extend(group.variables().map(|id| ("variables", id.to_string())));
        trace!(message = "requesting values", group = group.name, variables = form.len() - 1);
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Values(e, group.name))?;
        // Without a valid session the service sends us back to the login page.
        if response.status().is_redirection() {
            return Err(Error::SessionExpired(group.name));
        }
        let response = response.error_for_status().map_err(|e| Error::Values(e, group.name))?;
        let payload = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| Error::ValuesJsonDecode(e, group.name))?;
        raw_values(group.name, payload)
    }
}

fn redirects_to(location: &str, return_url: &str) -> bool {
    location == return_url || reqwest::Url::parse(location).is_ok_and(|u| u.path() == return_url)
}

/// Extract the `{id, value}` records from a values response.
///
/// Records that cannot be read are skipped, the remaining ones are still usable.
fn raw_values(group: &'static str, payload: serde_json::Value) -> Result<Vec<RawValue>, Error> {
    let records = match payload {
        serde_json::Value::Array(records) => records,
        serde_json::Value::Object(mut obj) => {
            match obj.remove("Values").or_else(|| obj.remove("values")) {
                Some(serde_json::Value::Array(records)) => records,
                _ => return Err(Error::UnexpectedPayload(group)),
            }
        }
        _ => return Err(Error::UnexpectedPayload(group)),
    };
    let values = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<RawValue>(record) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    group,
                    error = (&e as &dyn std::error::Error),
                    "skipping unreadable value record"
                );
                None
            }
        })
        .collect();
    Ok(values)
}
