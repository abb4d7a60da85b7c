//! Chunked, retrying upload client
//!
//! Sends one [`UploadBundle`] to a queue-server as a sequence of POSTed
//! parts. Every attempt recomputes the session token with a fresh
//! timestamp; REDO responses and transport errors retry the same part
//! after a fixed sleep. When the server advertises a smaller POST ceiling
//! than we assumed, the upload restarts once with the smaller chunk size.

use crate::transfer::{
    chunk, codec, session, ByteCounts, TransferError, TransferResult, UpdateResponse,
    UpdateStatus, UploadBundle,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts per part before the upload is abandoned
const MAX_ATTEMPTS: u32 = 5;

/// Uploads bundles to queue-servers over the part protocol
pub struct UploadClient {
    http: reqwest::Client,
    secret: String,
    machine_id: String,
    retry_sleep: Duration,
    /// Current assumption of the server's POST ceiling; shrinks when the
    /// server advertises a smaller one
    post_max_size: usize,
}

impl UploadClient {
    pub fn new(
        http: reqwest::Client,
        secret: String,
        machine_id: String,
        retry_sleep_secs: u64,
        post_max_size: usize,
    ) -> Self {
        UploadClient {
            http,
            secret,
            machine_id,
            retry_sleep: Duration::from_secs(retry_sleep_secs),
            post_max_size,
        }
    }

    /// Sends one bundle to `server`
    ///
    /// A zero-byte upload makes no network call at all. Returns the final
    /// server status; `Stop` means the crawl ended and the caller should
    /// abandon in-flight work.
    pub async fn upload(
        &mut self,
        server: &str,
        bundle: &UploadBundle,
        counts: &ByteCounts,
    ) -> TransferResult<UpdateStatus> {
        if counts.total == 0 {
            info!(machine_id = %self.machine_id, "nothing to upload, skipping");
            return Ok(UpdateStatus::Continue);
        }

        let encoded = codec::encode_payload(bundle)?;
        let counts_json = serde_json::to_string(counts)
            .map_err(|e| TransferError::Corrupt(e.to_string()))?;

        // One restart is allowed when the server turns out to accept less
        // than we assumed
        let mut shrunk = false;
        'restart: loop {
            let parts = chunk::split_payload(&encoded, self.post_max_size)?;
            debug!(
                server,
                num_parts = parts.len(),
                bytes = encoded.len(),
                "starting upload"
            );

            for part in &parts {
                let mut attempts = 0;
                loop {
                    attempts += 1;
                    match self.send_part(server, part, bundle.crawl_time, &counts_json).await {
                        Ok(response) => {
                            if response.post_max_size < self.post_max_size {
                                self.post_max_size = response.post_max_size;
                                if shrunk {
                                    return Err(TransferError::Rejected(format!(
                                        "server ceiling {} still too small",
                                        response.post_max_size
                                    )));
                                }
                                shrunk = true;
                                info!(
                                    post_max_size = response.post_max_size,
                                    "server advertises smaller ceiling, restarting upload"
                                );
                                continue 'restart;
                            }
                            match response.status {
                                UpdateStatus::Continue => break,
                                UpdateStatus::Stop => {
                                    info!(server, "server stopped the crawl mid-upload");
                                    return Ok(UpdateStatus::Stop);
                                }
                                UpdateStatus::Redo => {
                                    warn!(
                                        server,
                                        part = part.part,
                                        attempts,
                                        "server asked for a resend"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            warn!(server, part = part.part, attempts, error = %e, "part upload failed");
                        }
                    }
                    if attempts >= MAX_ATTEMPTS {
                        return Err(TransferError::RetriesExhausted(attempts));
                    }
                    tokio::time::sleep(self.retry_sleep).await;
                }
            }

            info!(server, num_parts = parts.len(), "upload complete");
            return Ok(UpdateStatus::Continue);
        }
    }

    async fn send_part(
        &self,
        server: &str,
        part: &chunk::PayloadPart,
        crawl_time: u64,
        counts_json: &str,
    ) -> TransferResult<UpdateResponse> {
        // Fresh timestamp and token on every attempt
        let time = chrono::Utc::now().timestamp() as u64;
        let token = session::session_token(time, &self.secret);

        let form = [
            ("data", part.data.clone()),
            ("byte_counts", counts_json.to_string()),
            ("hash_data", part.hash_data.clone()),
            ("part", part.part_hash.clone()),
            ("current_part", part.part.to_string()),
            ("num_parts", part.num_parts.to_string()),
            ("crawl_time", crawl_time.to_string()),
            ("machine_id", self.machine_id.clone()),
            ("time", time.to_string()),
            ("session", token),
        ];

        let response = self
            .http
            .post(format!("{}?c=fetch&a=update", server))
            .form(&form)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| TransferError::Corrupt(format!("update response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MiniIndexShard;
    use crate::transfer::DiscoveredUrl;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn small_bundle() -> UploadBundle {
        UploadBundle {
            crawl_time: 42,
            machine_id: "f1".to_string(),
            to_crawl: vec![DiscoveredUrl {
                url: "https://example.com/a".to_string(),
                weight: 1.0,
            }],
            seen_urls: vec![7],
            robots: vec![],
            revalidations: vec![],
            summaries: vec![],
            shard: MiniIndexShard::new(),
        }
    }

    fn counts(total: u64) -> ByteCounts {
        ByteCounts {
            total,
            to_crawl: total,
            seen: 0,
            index: 0,
        }
    }

    fn client(post_max_size: usize) -> UploadClient {
        UploadClient::new(
            reqwest::Client::new(),
            "swordfish".to_string(),
            "f1".to_string(),
            0,
            post_max_size,
        )
    }

    fn ok_response(post_max_size: usize) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "CONTINUE",
            "post_max_size": post_max_size,
        }))
    }

    #[tokio::test]
    async fn test_zero_byte_upload_makes_no_network_call() {
        let server = MockServer::start().await;
        // No mock registered; any request would 404 and fail the upload
        let mut client = client(2_000_000);
        let status = client
            .upload(&server.uri(), &small_bundle(), &counts(0))
            .await
            .unwrap();
        assert_eq!(status, UpdateStatus::Continue);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("c", "fetch"))
            .and(query_param("a", "update"))
            .respond_with(ok_response(2_000_000))
            .mount(&server)
            .await;

        let mut client = client(2_000_000);
        let status = client
            .upload(&server.uri(), &small_bundle(), &counts(100))
            .await
            .unwrap();
        assert_eq!(status, UpdateStatus::Continue);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_abandons_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "STOP",
                "post_max_size": 2_000_000,
            })))
            .mount(&server)
            .await;

        let mut client = client(2_000_000);
        let status = client
            .upload(&server.uri(), &small_bundle(), &counts(100))
            .await
            .unwrap();
        assert_eq!(status, UpdateStatus::Stop);
    }

    #[tokio::test]
    async fn test_smaller_ceiling_restarts_once() {
        let server = MockServer::start().await;
        let small = chunk::PART_OVERHEAD + 64;
        Mock::given(method("POST"))
            .respond_with(ok_response(small))
            .mount(&server)
            .await;

        let mut client = client(2_000_000);
        let status = client
            .upload(&server.uri(), &small_bundle(), &counts(100))
            .await
            .unwrap();
        assert_eq!(status, UpdateStatus::Continue);
        // First attempt at the assumed ceiling, then the whole payload
        // resent in small chunks
        assert!(server.received_requests().await.unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_on_persistent_redo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "REDO",
                "post_max_size": 2_000_000,
            })))
            .mount(&server)
            .await;

        let mut client = client(2_000_000);
        let result = client
            .upload(&server.uri(), &small_bundle(), &counts(100))
            .await;
        assert!(matches!(result, Err(TransferError::RetriesExhausted(_))));
    }
}
