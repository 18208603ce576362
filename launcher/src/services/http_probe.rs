//! HTTP status probe backed by reqwest

use async_trait::async_trait;
use std::time::Duration;

use crate::traits::HttpProbe;

/// Issues one GET per call; connection errors map to `None`
#[derive(Debug, Clone, Default)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn status(&self, url: &str, timeout: Duration) -> Option<u16> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => Some(response.status().as_u16()),
            Err(_) => None,
        }
    }
}
