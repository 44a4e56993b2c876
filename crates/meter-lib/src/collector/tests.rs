//! Integration tests for usage collection
//!
//! These tests run the HTTP source against a mock metrics backend and
//! drive full billing cycles through the loop.

#[cfg(test)]
mod mock_backend_tests {
    use crate::billing::BYTES_PER_GIB;
    use crate::collector::{
        BillingLoopBuilder, MetricsSource, PrometheusSource, QueryError, QuerySet, SourceConfig,
    };
    use crate::models::Resource;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use std::sync::Arc;
    use std::time::Duration;

    fn vector_body(samples: &[(&str, f64)]) -> String {
        let result: Vec<serde_json::Value> = samples
            .iter()
            .map(|(container, value)| {
                serde_json::json!({
                    "metric": {"container": container, "namespace": "default"},
                    "value": [1700000000.5, value.to_string()]
                })
            })
            .collect();

        serde_json::json!({
            "status": "success",
            "data": {"resultType": "vector", "result": result}
        })
        .to_string()
    }

    async fn mock_query(server: &mut ServerGuard, query: &str, status: usize, body: String) -> Mock {
        server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), query.into()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    fn source_for(server: &ServerGuard) -> PrometheusSource {
        PrometheusSource::new(SourceConfig {
            base_url: server.url(),
            timeout: Duration::from_secs(5),
            queries: QuerySet::default(),
        })
        .unwrap()
    }

    /// Mock all five queries for a single container "web" using one unit of everything
    async fn mock_healthy_backend(server: &mut ServerGuard) -> Vec<Mock> {
        let queries = QuerySet::default();
        let half_gib = BYTES_PER_GIB / 2.0;
        let values = [
            (Resource::Cpu, 3600.0),
            (Resource::Memory, BYTES_PER_GIB),
            (Resource::Storage, BYTES_PER_GIB),
            (Resource::NetworkReceive, half_gib),
            (Resource::NetworkTransmit, half_gib),
        ];

        let mut mocks = Vec::new();
        for (resource, value) in values {
            mocks.push(mock_query(server, queries.expr(resource), 200, vector_body(&[("web", value)])).await);
        }
        mocks
    }

    #[tokio::test]
    async fn test_query_decodes_instant_vector() {
        let mut server = Server::new_async().await;
        let mock = mock_query(
            &mut server,
            "container_cpu_usage_seconds_total",
            200,
            vector_body(&[("web", 12.5), ("db", 3.0)]),
        )
        .await;

        let source = source_for(&server);
        let response = source.query(Resource::Cpu).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.samples().len(), 2);
        assert_eq!(response.samples()[0].raw_value(), "12.5");
    }

    #[tokio::test]
    async fn test_query_non_2xx_is_status_error() {
        let mut server = Server::new_async().await;
        mock_query(&mut server, "container_memory_usage_bytes", 503, "unavailable".to_string()).await;

        let err = source_for(&server).query(Resource::Memory).await.unwrap_err();
        assert!(matches!(err, QueryError::Status { status: 503, .. }));
        assert_eq!(err.resource(), Resource::Memory);
    }

    #[tokio::test]
    async fn test_query_error_status_in_body() {
        let mut server = Server::new_async().await;
        mock_query(
            &mut server,
            "container_fs_usage_bytes",
            200,
            r#"{"status":"error","errorType":"bad_data","error":"invalid expression"}"#.to_string(),
        )
        .await;

        let err = source_for(&server).query(Resource::Storage).await.unwrap_err();
        match err {
            QueryError::Backend { message, .. } => assert_eq!(message, "invalid expression"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_unreachable_backend_is_transport_error() {
        let source = PrometheusSource::new(SourceConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
            queries: QuerySet::default(),
        })
        .unwrap();

        let err = source.query(Resource::Cpu).await.unwrap_err();
        assert!(matches!(err, QueryError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_collect_stops_at_first_failure() {
        let mut server = Server::new_async().await;
        let queries = QuerySet::default();

        let cpu = mock_query(&mut server, &queries.cpu, 200, vector_body(&[("web", 1.0)])).await;
        let memory = mock_query(&mut server, &queries.memory, 200, "{not json".to_string()).await;
        let storage = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::UrlEncoded("query".into(), queries.storage.clone()))
            .expect(0)
            .create_async()
            .await;

        let err = source_for(&server).collect().await.unwrap_err();

        assert!(matches!(err, QueryError::Decode { resource: Resource::Memory, .. }));
        cpu.assert_async().await;
        memory.assert_async().await;
        storage.assert_async().await;
    }

    #[tokio::test]
    async fn test_full_cycle_against_backend() {
        let mut server = Server::new_async().await;
        let _mocks = mock_healthy_backend(&mut server).await;

        let (billing_loop, mut rx) = BillingLoopBuilder::new()
            .source(Arc::new(source_for(&server)))
            .build()
            .unwrap();

        let report = billing_loop.run_once().await.unwrap().unwrap();

        assert_eq!(report.estimates.len(), 1);
        assert_eq!(report.estimates[0].entity_label, "web");
        assert!((report.estimates[0].amount - 0.036).abs() < 1e-12);

        let sent = rx.try_recv().unwrap();
        assert_eq!(sent, report);
    }

    #[tokio::test]
    async fn test_malformed_cycle_then_recovery() {
        let mut server = Server::new_async().await;
        let queries = QuerySet::default();

        let broken = mock_query(&mut server, &queries.cpu, 200, "<html>oops</html>".to_string()).await;

        let (billing_loop, mut rx) = BillingLoopBuilder::new()
            .source(Arc::new(source_for(&server)))
            .build()
            .unwrap();

        let first = billing_loop.run_once().await.unwrap();
        assert!(first.is_err());
        assert!(rx.try_recv().is_err(), "no report for an abandoned cycle");

        broken.remove_async().await;
        let _mocks = mock_healthy_backend(&mut server).await;

        let second = billing_loop.run_once().await.unwrap().unwrap();
        assert_eq!(second.estimates.len(), 1);
        assert!(rx.try_recv().is_ok());
    }
}
