use pluma_kernel::metrics::PluginMetrics;
use pluma_kernel::plugin::{HttpMethod, Middleware, MiddlewareOutcome, Plugin, PluginRequest};
use pluma_testing::{
    EventLog, Hook, MetricEvent, MockPlugin, RecordingMetrics, RejectMiddleware, TRACE_HEADER,
    TraceMiddleware,
};

#[tokio::test]
async fn test_mock_plugin_hooks() {
    let log = EventLog::new();
    let mock = MockPlugin::new("note")
        .with_dependency("storage")
        .with_event_log(log.clone());
    let probe = mock.probe();
    let plugin = mock.into_plugin();

    assert_eq!(plugin.name(), "note");
    assert_eq!(plugin.dependencies(), vec!["storage".to_string()]);

    plugin.init().await.unwrap();
    plugin.on_enable().await.unwrap();
    pluma_testing::assert_hook_called!(probe, Hook::Init, 1);
    pluma_testing::assert_hook_called!(probe, Hook::Enable, 1);
    pluma_testing::assert_hook_called!(probe, Hook::Shutdown, 0);

    probe.set_failing(Hook::Shutdown, true);
    assert!(plugin.shutdown().await.is_err());
    assert_eq!(log.entries(), vec!["note:init", "note:enable", "note:shutdown"]);
    assert_eq!(log.plugins_for(Hook::Init), vec!["note"]);
}

#[tokio::test]
async fn test_echo_route() {
    let plugin = MockPlugin::new("note")
        .with_echo_route(HttpMethod::Get, "/notes")
        .into_plugin();

    let routes = plugin.routes();
    assert_eq!(routes.len(), 1);
    let response = routes[0]
        .handler
        .handle(PluginRequest::new(HttpMethod::Get, "/plugins/note/notes"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body["plugin"], "note");
    assert_eq!(response.body["path"], "/plugins/note/notes");
}

#[tokio::test]
async fn test_middlewares() {
    let trace = TraceMiddleware::new("a");
    let request = PluginRequest::new(HttpMethod::Post, "/x");
    let request = match trace.process(request).await.unwrap() {
        MiddlewareOutcome::Continue(r) => r,
        MiddlewareOutcome::Respond(_) => panic!("trace middleware must continue"),
    };
    let request = match TraceMiddleware::new("b").process(request).await.unwrap() {
        MiddlewareOutcome::Continue(r) => r,
        MiddlewareOutcome::Respond(_) => panic!("trace middleware must continue"),
    };
    assert_eq!(request.header(TRACE_HEADER), Some("a,b"));

    let reject = RejectMiddleware::new("auth", 401);
    match reject.process(request).await.unwrap() {
        MiddlewareOutcome::Respond(response) => assert_eq!(response.status, 401),
        MiddlewareOutcome::Continue(_) => panic!("reject middleware must respond"),
    }
}

#[test]
fn test_recording_metrics() {
    let metrics = RecordingMetrics::new();
    metrics.record_plugin_error("note", "boom");
    metrics.record_plugin_reload("note", true);
    metrics.record_plugin_unregistered("chat");

    assert_eq!(metrics.errors_for("note"), vec!["boom".to_string()]);
    assert_eq!(metrics.reloads_for("note"), vec![true]);
    assert_eq!(
        metrics.events().last(),
        Some(&MetricEvent::Unregistered {
            plugin: "chat".to_string()
        })
    );
}
