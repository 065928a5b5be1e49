//! Transport tests against a local stub of the IaaS API

#[cfg(test)]
mod tests {
    use crate::client::{ClientConfig, IaasClient};
    use crate::error::IaasError;
    use crate::iaas_trait::IaasClientTrait;
    use crate::models::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const ZONE_PATH: &str = "/zone/is1b/api/cloud/1.1";

    type Hits = Arc<AtomicUsize>;

    /// Serve `router` on an ephemeral port and return its root URL
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(root: &str, retry_max: u32) -> IaasClient {
        let mut config = ClientConfig::new("token", "secret", "is1b")
            .with_api_root_url(root)
            .with_retry(retry_max, Duration::from_millis(10))
            .with_poll_interval(Duration::from_millis(10));
        config.request_timeout = Duration::from_millis(200);
        IaasClient::new(config).unwrap()
    }

    fn lb_body(availability: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "Appliance": {
                "ID": "7",
                "Name": "lb",
                "Availability": availability,
                "Instance": {"Status": status}
            }
        })
    }

    fn create_request() -> CreateLoadBalancerRequest {
        CreateLoadBalancerRequest {
            name: "a0123".to_string(),
            switch_id: ResourceId(10),
            vrid: 1,
            ip_address1: "192.0.2.11".to_string(),
            network_mask_len: 24,
            default_route: "192.0.2.1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_timed_out_create_is_sent_once() {
        let hits = Hits::default();
        let router = Router::new()
            .route(
                &format!("{}/appliance", ZONE_PATH),
                post(|State(hits): State<Hits>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    Json(lb_body("migrating", "down"))
                }),
            )
            .with_state(hits.clone());
        let root = serve(router).await;

        let result = client(&root, 3).create_load_balancer(&create_request()).await;

        assert!(matches!(result, Err(IaasError::Http(ref e)) if e.is_timeout()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_read_is_retried() {
        let hits = Hits::default();
        let router = Router::new()
            .route(
                &format!("{}/appliance/7", ZONE_PATH),
                get(|State(hits): State<Hits>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    Json(lb_body("available", "up"))
                }),
            )
            .with_state(hits.clone());
        let root = serve(router).await;

        let result = client(&root, 2).read_load_balancer(ResourceId(7)).await;

        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_throttled_requests_are_retried_up_to_retry_max() {
        let hits = Hits::default();
        let router = Router::new()
            .route(
                &format!("{}/appliance", ZONE_PATH),
                post(|State(hits): State<Hits>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::SERVICE_UNAVAILABLE, "busy")
                }),
            )
            .with_state(hits.clone());
        let root = serve(router).await;

        let err = client(&root, 2)
            .create_load_balancer(&create_request())
            .await
            .unwrap_err();

        assert!(matches!(err, IaasError::Api(ref msg) if msg.contains("503")));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_locked_then_success() {
        let hits = Hits::default();
        let router = Router::new()
            .route(
                &format!("{}/appliance/7", ZONE_PATH),
                get(|State(hits): State<Hits>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::LOCKED, "locked").into_response()
                    } else {
                        Json(lb_body("available", "up")).into_response()
                    }
                }),
            )
            .with_state(hits.clone());
        let root = serve(router).await;

        let lb = client(&root, 1).read_load_balancer(ResourceId(7)).await.unwrap();

        assert_eq!(lb.id, ResourceId(7));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_throttling_without_retry_fails_immediately() {
        let hits = Hits::default();
        let router = Router::new()
            .route(
                &format!("{}/appliance/7", ZONE_PATH),
                get(|State(hits): State<Hits>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::LOCKED, "locked")
                }),
            )
            .with_state(hits.clone());
        let root = serve(router).await;

        assert!(client(&root, 0).read_load_balancer(ResourceId(7)).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let router = Router::new()
            .route(&format!("{}/switch/404", ZONE_PATH), get(|| async { (StatusCode::NOT_FOUND, "gone") }))
            .route(&format!("{}/switch/401", ZONE_PATH), get(|| async { (StatusCode::UNAUTHORIZED, "who") }))
            .route(&format!("{}/switch/403", ZONE_PATH), get(|| async { (StatusCode::FORBIDDEN, "no") }))
            .route(
                &format!("{}/switch/500", ZONE_PATH),
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "oops") }),
            )
            .route(&format!("{}/switch/1", ZONE_PATH), get(|| async { "not json" }));
        let root = serve(router).await;
        let client = client(&root, 3);

        let err = client.read_switch(ResourceId(404)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            client.read_switch(ResourceId(401)).await,
            Err(IaasError::Authentication(_))
        ));
        assert!(matches!(
            client.read_switch(ResourceId(403)).await,
            Err(IaasError::Authentication(_))
        ));
        assert!(matches!(
            client.read_switch(ResourceId(500)).await,
            Err(IaasError::Api(ref msg)) if msg.contains("500") && msg.contains("oops")
        ));
        assert!(matches!(
            client.read_switch(ResourceId(1)).await,
            Err(IaasError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_body_is_accepted() {
        let router = Router::new().route(&format!("{}/appliance/7", ZONE_PATH), delete(|| async { StatusCode::OK }));
        let root = serve(router).await;

        client(&root, 0).delete_load_balancer(ResourceId(7)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_polls_until_copied() {
        let hits = Hits::default();
        let router = Router::new()
            .route(
                &format!("{}/appliance/7", ZONE_PATH),
                get(|State(hits): State<Hits>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        Json(lb_body("migrating", "down"))
                    } else {
                        Json(lb_body("available", "down"))
                    }
                }),
            )
            .with_state(hits.clone());
        let root = serve(router).await;

        let lb = client(&root, 0)
            .wait_until_copy_done(ResourceId(7), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(lb.is_available());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_aborts_on_failed_appliance() {
        let router = Router::new().route(
            &format!("{}/appliance/7", ZONE_PATH),
            get(|| async { Json(lb_body("failed", "down")) }),
        );
        let root = serve(router).await;

        let err = client(&root, 0)
            .wait_until_copy_done(ResourceId(7), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, IaasError::ApplianceFailed { .. }));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let router = Router::new().route(
            &format!("{}/appliance/7", ZONE_PATH),
            get(|| async { Json(lb_body("available", "up")) }),
        );
        let root = serve(router).await;

        let err = client(&root, 0)
            .wait_until_down(ResourceId(7), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_server_shutdown_falls_back_to_forced_stop() {
        let forced = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                &format!("{}/server/7", ZONE_PATH),
                get(|State(forced): State<Hits>| async move {
                    let status = if forced.load(Ordering::SeqCst) > 0 { "down" } else { "up" };
                    Json(serde_json::json!({"Server": {"ID": "7", "Instance": {"Status": status}}}))
                }),
            )
            .route(
                &format!("{}/server/7/power", ZONE_PATH),
                delete(|State(forced): State<Hits>, body: String| async move {
                    if body.contains("\"Force\":true") {
                        forced.fetch_add(1, Ordering::SeqCst);
                    }
                    StatusCode::OK
                }),
            )
            .with_state(forced.clone());
        let root = serve(router).await;

        client(&root, 0)
            .shutdown_server_by_id(ResourceId(7), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(forced.load(Ordering::SeqCst), 1);
    }
}
