use crate::credential::Credential;
use crate::error::{Result, ScanError};
use crate::result::{Guild, MutualGuild, NeighborRef, ProfileResponse, Relationship};
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v9";

/// Anything the crawl can pull relationship data from.
///
/// Every call is a single request; callers are responsible for pacing.
pub trait RelationshipSource: Send + Sync {
    /// Relationships of the authenticated user (friends, requests, blocks).
    fn fetch_seed_relationships(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<Relationship>>> + Send;

    /// Mutual friends of `user_id`.
    fn fetch_neighbors(
        &self,
        credential: &Credential,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<NeighborRef>>> + Send;

    /// Guilds the authenticated user belongs to.
    fn fetch_guilds(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Vec<Guild>>> + Send;

    /// Guilds shared with `user_id`, with that user's nickname in each.
    fn fetch_mutual_guilds(
        &self,
        credential: &Credential,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<MutualGuild>>> + Send;
}

#[derive(Clone)]
pub struct RelationshipClient {
    client: Client,
    base: Url,
}

impl RelationshipClient {
    pub fn new(base: Url) -> Result<Self> {
        Self::with_timeout(base, 10)
    }

    pub fn with_timeout(mut base: Url, timeout_secs: u64) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(ScanError::InvalidUrl(base.to_string()));
        }
        // Url::join drops the last segment unless the path ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent("Mutuals/0.1 (https://github.com/trapdoorsec/mutuals)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs((timeout_secs / 2).max(1)))
            .pool_max_idle_per_host(2)
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, credential: &Credential, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let start = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, credential.as_str())
            .send()
            .await?;
        let status = response.status();
        debug!("{} {} in {:?}", status.as_u16(), url, start.elapsed());

        if !status.is_success() {
            return Err(ScanError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

impl RelationshipSource for RelationshipClient {
    async fn fetch_seed_relationships(&self, credential: &Credential) -> Result<Vec<Relationship>> {
        self.get_json(credential, "users/@me/relationships").await
    }

    async fn fetch_neighbors(
        &self,
        credential: &Credential,
        user_id: &str,
    ) -> Result<Vec<NeighborRef>> {
        self.get_json(credential, &format!("users/{}/relationships", user_id))
            .await
    }

    async fn fetch_guilds(&self, credential: &Credential) -> Result<Vec<Guild>> {
        self.get_json(credential, "users/@me/guilds").await
    }

    async fn fetch_mutual_guilds(
        &self,
        credential: &Credential,
        user_id: &str,
    ) -> Result<Vec<MutualGuild>> {
        let profile: ProfileResponse = self
            .get_json(
                credential,
                &format!("users/{}/profile?with_mutual_guilds=true", user_id),
            )
            .await?;
        Ok(profile.mutual_guilds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path, query_param},
    };

    const TOKEN: &str = "MTIzNDU2Nzg5MDEyMzQ1Njc4.GaBcDe.abcdefghijklmnopqrstuvwxyz0123";

    fn client_for(server: &MockServer) -> RelationshipClient {
        RelationshipClient::new(Url::parse(&server.uri()).unwrap()).unwrap()
    }

    fn credential() -> Credential {
        Credential::parse(TOKEN).unwrap()
    }

    #[test]
    fn test_base_path_keeps_version_segment() {
        let client = RelationshipClient::new(Url::parse(DEFAULT_API_BASE).unwrap()).unwrap();
        let url = client.endpoint("users/@me/relationships").unwrap();
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v9/users/@me/relationships"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        let result = RelationshipClient::new(Url::parse("mailto:someone@example.com").unwrap());
        assert!(matches!(result, Err(ScanError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_seed_relationships_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/relationships"))
            .and(header("authorization", TOKEN))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    {"id": "10", "type": 1, "user": {"id": "10", "username": "alice", "avatar": "abc"}},
                    {"id": "11", "type": 3, "user": {"id": "11", "username": "pending"}}
                ]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let relationships = client_for(&server)
            .fetch_seed_relationships(&credential())
            .await
            .unwrap();

        assert_eq!(relationships.len(), 2);
        assert_eq!(relationships[0].user.username, "alice");
        assert_eq!(relationships[0].user.avatar.as_deref(), Some("abc"));
        assert!(relationships[0].is_friend());
        assert!(!relationships[1].is_friend());
    }

    #[tokio::test]
    async fn test_non_success_maps_to_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/relationships"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_seed_relationships(&credential())
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Status { status: 401 }));
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.to_string(), "API 401");
    }

    #[tokio::test]
    async fn test_neighbors_for_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/10/relationships"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"id": "20", "username": "bob"}, {"id": "30"}]"#),
            )
            .mount(&server)
            .await;

        let neighbors = client_for(&server)
            .fetch_neighbors(&credential(), "10")
            .await
            .unwrap();

        let ids: Vec<&str> = neighbors.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["20", "30"]);
    }

    #[tokio::test]
    async fn test_mutual_guilds_from_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/10/profile"))
            .and(query_param("with_mutual_guilds", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"user": {"id": "10"}, "mutual_guilds": [{"id": "900", "nick": "Ali"}, {"id": "901", "nick": null}]}"#,
            ))
            .mount(&server)
            .await;

        let guilds = client_for(&server)
            .fetch_mutual_guilds(&credential(), "10")
            .await
            .unwrap();

        assert_eq!(guilds.len(), 2);
        assert_eq!(guilds[0].nick.as_deref(), Some("Ali"));
        assert!(guilds[1].nick.is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/guilds"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_guilds(&credential())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::DecodeError(_)));
    }
}
