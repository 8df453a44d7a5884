use iam_service::config::{
    AdminConfig, IamConfig, MongoConfig, SessionConfig, StoreBackend, StoreConfig,
};
use iam_service::startup::Application;
use reqwest::{Client, Response};
use secrecy::Secret;
use serde_json::{json, Value};

pub const TEST_ADMIN_USER: &str = "operator";
pub const TEST_ADMIN_PASSWORD: &str = "operator-secret";

pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
    pub client: Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let config = IamConfig {
            common: service_core::config::Config {
                port: 0, // Random port
                log_level: "debug".to_string(),
                otlp_endpoint: None,
            },
            mongodb: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: format!("iam_test_{}", uuid::Uuid::new_v4()),
                collection: "entities".to_string(),
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                operation_timeout_secs: 20,
            },
            session: SessionConfig {
                jwt_secret: Secret::new("test-secret".to_string()),
                audience: "iam-service-test".to_string(),
                ttl_hours: 1,
            },
            admin: AdminConfig {
                username: TEST_ADMIN_USER.to_string(),
                password: Secret::new(TEST_ADMIN_PASSWORD.to_string()),
            },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            http_address,
            http_port,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.http_address, path)
    }

    pub async fn post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Mints a session for `user` with the operator credential.
    pub async fn start_session(&self, user: &str) -> Response {
        self.client
            .post(self.url(&format!("/user/{}/session", user)))
            .basic_auth(TEST_ADMIN_USER, Some(TEST_ADMIN_PASSWORD))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_bearer(&self, path: &str, token: &str) -> Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Creates a user and returns its id.
    pub async fn create_user(&self, name: &str, email: &str) -> String {
        let response = self
            .post("/user", json!({ "name": name, "email": email, "role": "member" }))
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["@id"].as_str().expect("user id").to_string()
    }

    pub async fn create_resource(&self, owner: &str) -> String {
        let response = self.post("/resource", json!({ "owner": owner })).await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["@id"].as_str().expect("resource id").to_string()
    }

    pub async fn create_group(&self, name: &str, admin: &str, members: &[&str]) -> String {
        let response = self
            .post(
                "/group",
                json!({ "name": name, "admin": admin, "members": members }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["@id"].as_str().expect("group id").to_string()
    }

    pub async fn create_policy(&self, resource: &str, principals: &[&str], actions: &[&str]) -> String {
        let response = self
            .post(
                "/policy",
                json!({
                    "resource": resource,
                    "principal": principals,
                    "action": actions,
                    "issuer": "test",
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["@id"].as_str().expect("policy id").to_string()
    }

    /// Submits an access request and returns the status code with the recorded challenge.
    pub async fn challenge(&self, principal: &str, resource: &str, action: &str) -> (u16, Value) {
        let response = self
            .post(
                "/challenge",
                json!({
                    "principal": principal,
                    "resource": resource,
                    "action": action,
                    "issuer": "test",
                }),
            )
            .await;
        let status = response.status().as_u16();
        let body: Value = response.json().await.expect("Failed to parse JSON");
        (status, body)
    }
}
