//! Unit tests for domain value types.

use super::*;
use rstest::rstest;

fn us_east() -> Location {
    Location::region("us-east-1")
}

#[rstest]
fn zone_resolves_to_parent_region() {
    let zone = Location::zone("us-east-1a", us_east());
    assert_eq!(zone.region_id(), Some("us-east-1"));
    assert_eq!(zone.zone_id(), Some("us-east-1a"));
}

#[rstest]
fn region_resolves_to_itself_without_zone() {
    let region = us_east();
    assert_eq!(region.region_id(), Some("us-east-1"));
    assert_eq!(region.zone_id(), None);
}

#[rstest]
#[case(None, true)]
#[case(Some(Location::region("us-east-1")), true)]
#[case(Some(Location::zone("us-east-1a", Location::region("us-east-1"))), true)]
#[case(Some(Location::zone("us-east-1b", Location::region("us-east-1"))), false)]
#[case(Some(Location::region("eu-west-1")), false)]
fn location_acceptance_follows_hierarchy(
    #[case] candidate: Option<Location>,
    #[case] expected: bool,
) {
    let target = Location::zone("us-east-1a", us_east());
    assert_eq!(Location::accepts(candidate.as_ref(), &target), expected);
}

#[rstest]
#[case("us-east-1/i-123", Some(("us-east-1", "i-123")))]
#[case("i-123", None)]
#[case("/i-123", None)]
#[case("us-east-1/", None)]
fn node_ids_split_into_region_and_provider_id(
    #[case] id: &str,
    #[case] expected: Option<(&str, &str)>,
) {
    assert_eq!(split_node_id(id), expected);
}

#[rstest]
fn new_nodes_are_pending_with_qualified_ids() {
    let node = NodeMetadata::new("us-east-1", "i-9", us_east()).in_group("web");
    assert_eq!(node.id, "us-east-1/i-9");
    assert_eq!(node.status, NodeStatus::Pending);
    assert_eq!(node.region(), Some("us-east-1"));
    assert_eq!(node.group.as_deref(), Some("web"));
}

#[rstest]
fn hardware_supports_images_by_architecture() {
    let image = Image::new("img", OsFamily::Ubuntu, Architecture::Arm64);
    let x86 = Hardware::new("m1.small", 1, 1024);
    let arm = Hardware::new("a1.small", 1, 1024).with_architectures([Architecture::Arm64]);
    assert!(!x86.supports(&image));
    assert!(arm.supports(&image));
}

#[rstest]
fn credentials_serialise_without_empty_secrets() {
    let creds = LoginCredentials::for_user("ubuntu").with_private_key("KEY");
    let json = serde_json::to_string(&creds).unwrap_or_else(|err| panic!("serialise: {err}"));
    assert!(!json.contains("password"), "unexpected password field: {json}");
    let parsed: LoginCredentials =
        serde_json::from_str(&json).unwrap_or_else(|err| panic!("parse: {err}"));
    assert_eq!(parsed, creds);
}
