use quiver_engine::{FetchError, Transport};
use std::io::Read;
use std::time::Duration;

/// Blocking HTTP(S) transport.
pub struct HttpTransport {
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: config.into(),
            user_agent: format!("quiver/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        let response = self
            .agent
            .get(url)
            .header("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| classify(url, e))?;
        Ok(Box::new(response.into_body().into_reader()))
    }
}

fn classify(url: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::StatusCode(code @ (404 | 410)) => {
            FetchError::NotFound(format!("{url}: HTTP {code}"))
        }
        ureq::Error::StatusCode(code) => FetchError::Network(format!("{url}: HTTP {code}")),
        other => FetchError::Network(format!("{url}: {other}")),
    }
}
