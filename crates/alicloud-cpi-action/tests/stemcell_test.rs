mod common;

use alicloud_cpi_action::{ImageIdProp, StemcellCloudProps, StemcellLifecycle};
use alicloud_cpi_core::testing::{Call, FakeEcs, Op};
use alicloud_cpi_core::{CpiError, ImageOwner, OperationContext, ResourceStatus};
use common::{TestCpi, ctx};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

fn named(name: &str) -> StemcellCloudProps {
    StemcellCloudProps {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_stemcell_from_region_table() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-hz42", ResourceStatus::Available));

    let id = t
        .stemcells()
        .create_stemcell("/tmp/image", &named("stemcell-42"), &ctx("create_stemcell"))
        .await
        .unwrap();

    assert_eq!(id, "m-hz42");
    assert_eq!(t.fake.calls(), vec![Call::DescribeImage("m-hz42".to_string())]);
}

#[tokio::test]
async fn test_create_stemcell_prefers_cloud_properties() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-regional", ResourceStatus::Available));
    t.fake
        .add_image(FakeEcs::image("m-single", ResourceStatus::Available));

    let regional = StemcellCloudProps {
        image_id: Some(ImageIdProp::Regional(BTreeMap::from([
            ("cn-beijing".to_string(), "m-bj".to_string()),
            ("cn-hangzhou".to_string(), "m-regional".to_string()),
        ]))),
        ..named("stemcell-42")
    };
    let id = t
        .stemcells()
        .create_stemcell("", &regional, &ctx("create_stemcell"))
        .await
        .unwrap();
    assert_eq!(id, "m-regional");

    let single = StemcellCloudProps {
        image_id: Some(ImageIdProp::Single("m-single".to_string())),
        ..Default::default()
    };
    let id = t
        .stemcells()
        .create_stemcell("", &single, &ctx("create_stemcell"))
        .await
        .unwrap();
    assert_eq!(id, "m-single");
}

#[tokio::test]
async fn test_create_stemcell_regional_map_without_region_falls_back() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-default", ResourceStatus::Available));

    let props = StemcellCloudProps {
        image_id: Some(ImageIdProp::Regional(BTreeMap::from([(
            "cn-beijing".to_string(),
            "m-bj".to_string(),
        )]))),
        ..Default::default()
    };
    let id = t
        .stemcells()
        .create_stemcell("", &props, &ctx("create_stemcell"))
        .await
        .unwrap();
    assert_eq!(id, "m-default");
}

#[tokio::test(start_paused = true)]
async fn test_create_stemcell_waits_for_image() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-hz42", ResourceStatus::Creating));
    t.fake.script(
        "m-hz42",
        [
            ResourceStatus::Creating,
            ResourceStatus::Waiting,
            ResourceStatus::Available,
        ],
    );

    let id = t
        .stemcells()
        .create_stemcell("", &named("stemcell-42"), &ctx("create_stemcell"))
        .await
        .unwrap();
    assert_eq!(id, "m-hz42");
    assert_eq!(t.fake.describe_count("m-hz42"), 3);
}

#[tokio::test]
async fn test_create_stemcell_missing_image() {
    let t = TestCpi::new();
    let err = t
        .stemcells()
        .create_stemcell("", &named("stemcell-42"), &ctx("create_stemcell"))
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::NotFound { .. }));
    assert_eq!(err.kind(), "Bosh::Clouds::CloudError");
}

#[tokio::test]
async fn test_create_stemcell_failed_image() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-hz42", ResourceStatus::Failed));
    let err = t
        .stemcells()
        .create_stemcell("", &named("stemcell-42"), &ctx("create_stemcell"))
        .await
        .unwrap_err();
    assert!(matches!(err, CpiError::InvalidState { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_delete_owned_stemcell() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-1", ResourceStatus::Available));

    t.stemcells()
        .delete_stemcell("m-1", &ctx("delete_stemcell"))
        .await
        .unwrap();

    assert_eq!(t.fake.verbs(), vec![Call::DeleteImage("m-1".to_string())]);
    assert!(t.fake.image_state("m-1").is_none());
}

#[tokio::test]
async fn test_delete_public_stemcell_is_skipped() {
    let t = TestCpi::new();
    let mut image = FakeEcs::image("m-ubuntu", ResourceStatus::Available);
    image.owner = ImageOwner::System;
    t.fake.add_image(image);

    t.stemcells()
        .delete_stemcell("m-ubuntu", &ctx("delete_stemcell"))
        .await
        .unwrap();

    assert!(t.fake.verbs().is_empty());
    assert!(t.fake.image_state("m-ubuntu").is_some());
}

#[tokio::test]
async fn test_delete_absent_stemcell() {
    let t = TestCpi::new();
    t.stemcells()
        .delete_stemcell("m-gone", &ctx("delete_stemcell"))
        .await
        .unwrap();
    assert!(t.fake.verbs().is_empty());
}

#[tokio::test]
async fn test_delete_stemcell_cancelled_after_describe_keeps_image() {
    let t = TestCpi::new();
    t.fake
        .add_image(FakeEcs::image("m-1", ResourceStatus::Available));
    let token = CancellationToken::new();
    t.fake.cancel_during(Op::DescribeImage, token.clone());

    let ctx = OperationContext::new("delete_stemcell").with_cancellation(token);
    let err = t
        .stemcells()
        .delete_stemcell("m-1", &ctx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CpiError::Aborted {
            last_status: ResourceStatus::Available,
            ..
        }
    ));
    assert!(t.fake.verbs().is_empty());
    assert!(t.fake.image_state("m-1").is_some());
}
