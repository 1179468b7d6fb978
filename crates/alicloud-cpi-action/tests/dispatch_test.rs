mod common;

use alicloud_cpi_action::{Request, Response};
use alicloud_cpi_core::ResourceStatus;
use alicloud_cpi_core::testing::{FakeEcs, Op};
use common::TestCpi;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn request(value: Value) -> Request {
    serde_json::from_value(value).unwrap()
}

async fn call(t: &TestCpi, value: Value) -> Response {
    t.cpi().handle(&request(value), CancellationToken::new()).await
}

#[tokio::test]
async fn test_info() {
    let t = TestCpi::new();
    let response = call(&t, json!({ "method": "info", "arguments": [] })).await;

    assert!(response.is_ok());
    assert_eq!(
        response.result,
        json!({ "stemcell_formats": ["alicloud-raw", "alicloud-light"] })
    );
    assert!(t.fake.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_method() {
    let t = TestCpi::new();
    let response = call(&t, json!({ "method": "snapshot_disk", "arguments": ["d-1"] })).await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "Bosh::Clouds::NotImplemented");
    assert!(error.message.contains("snapshot_disk"));
    assert!(!error.ok_to_retry);
}

#[tokio::test]
async fn test_bad_arguments() {
    let t = TestCpi::new();
    let response = call(&t, json!({ "method": "has_vm", "arguments": [42] })).await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "InvalidCall");
    assert!(t.fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_request() {
    let t = TestCpi::with_fake(FakeEcs::new("cn-hangzhou").with_instance_ids(["i-abc123"]));
    let response = call(
        &t,
        json!({
            "method": "create_vm",
            "arguments": [
                "agent-1",
                "stemcell-42",
                { "instance_type": "ecs.n4.small" },
                { "default": {
                    "type": "manual",
                    "ip": "10.0.0.5",
                    "cloud_properties": { "vswitch_id": "vsw-1", "security_group_id": "sg-1" }
                } },
                [],
                {}
            ],
            "context": { "director_uuid": "uuid-1" }
        }),
    )
    .await;

    assert_eq!(response.error, None);
    assert_eq!(response.result, json!("i-abc123"));
}

#[tokio::test(start_paused = true)]
async fn test_create_vm_failure_names_instance() {
    let t = TestCpi::with_fake(FakeEcs::new("cn-hangzhou").with_instance_ids(["i-stuck"]));
    t.fake.on_next(Op::RunInstance, [ResourceStatus::Pending]);

    let response = call(
        &t,
        json!({
            "method": "create_vm",
            "arguments": [
                "agent-1",
                "stemcell-42",
                { "instance_type": "ecs.n4.small", "security_group_id": "sg-1" },
                {},
                [],
                {}
            ]
        }),
    )
    .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "Bosh::Clouds::VMCreationFailed");
    assert!(error.message.contains("i-stuck"));
}

#[tokio::test]
async fn test_has_vm_false_is_not_an_error() {
    let t = TestCpi::new();
    let response = call(&t, json!({ "method": "has_vm", "arguments": ["i-nope"] })).await;

    assert_eq!(response.error, None);
    assert_eq!(response.result, json!(false));
}

#[tokio::test]
async fn test_deletes_of_absent_resources_succeed() {
    let t = TestCpi::new();
    for (method, id) in [
        ("delete_vm", "i-gone"),
        ("delete_disk", "d-gone"),
        ("delete_stemcell", "m-gone"),
    ] {
        let response = call(&t, json!({ "method": method, "arguments": [id] })).await;
        assert_eq!(response, Response::ok(Value::Null), "{method}");
    }
    assert!(t.fake.verbs().is_empty());
}

#[tokio::test]
async fn test_get_disks_of_missing_vm() {
    let t = TestCpi::new();
    let response = call(&t, json!({ "method": "get_disks", "arguments": ["i-gone"] })).await;
    assert_eq!(response.error.unwrap().kind, "Bosh::Clouds::VMNotFound");
}

#[tokio::test(start_paused = true)]
async fn test_create_disk_request() {
    let t = TestCpi::with_fake(FakeEcs::new("cn-hangzhou").with_disk_ids(["d-1"]));
    let response = call(
        &t,
        json!({ "method": "create_disk", "arguments": [10240, {}, null] }),
    )
    .await;
    assert_eq!(response.result, json!("d-1"));
    assert_eq!(t.fake.disk_requests()[0].size_gb, 20);
}

#[tokio::test]
async fn test_cancelled_request_is_retryable() {
    let t = TestCpi::with_fake(FakeEcs::new("cn-hangzhou").with_disk_ids(["d-1"]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let response = t
        .cpi()
        .handle(
            &request(json!({ "method": "create_disk", "arguments": [1024, {}, null] })),
            cancel,
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.kind, "Bosh::Clouds::CloudError");
    assert!(error.ok_to_retry);
    assert!(error.message.contains("aborted"));
    assert!(t.fake.calls().is_empty());
    assert!(t.fake.disk_state("d-1").is_none());
}

#[tokio::test]
async fn test_response_serialization() {
    let t = TestCpi::new();
    t.fake
        .add_instance(FakeEcs::instance("i-1", ResourceStatus::Running));
    let response = call(&t, json!({ "method": "has_vm", "arguments": ["i-1"] })).await;

    let encoded = serde_json::to_value(&response).unwrap();
    assert_eq!(encoded, json!({ "result": true, "error": null, "log": "" }));
}
