//! Renewal window step definitions

use chrono::Duration;
use cucumber::{given, then, when};
use ecs_ca_gateway::models::ResolvedIntent;
use ecs_ca_gateway::services::resolve_renewal_intent;

use crate::features::support::TestWorld;

#[given(expr = "a renewal window of {int} days")]
async fn renewal_window(world: &mut TestWorld, days: i64) {
    world.window_days = days;
}

#[given(expr = "the prior certificate expires in {int} days")]
async fn prior_expires_in(world: &mut TestWorld, days: i64) {
    let now = world.clock();
    world.prior_expiration = Some(now + Duration::days(days));
}

#[given(expr = "the prior certificate expired {int} days ago")]
async fn prior_expired_ago(world: &mut TestWorld, days: i64) {
    let now = world.clock();
    world.prior_expiration = Some(now - Duration::days(days));
}

#[when("the gateway chooses between renewal and reissue")]
async fn choose_intent(world: &mut TestWorld) {
    let now = world.clock();
    let expiration = world
        .prior_expiration
        .expect("prior certificate expiry must be set");
    world.resolved_intent = Some(resolve_renewal_intent(expiration, now, world.window_days));
}

#[then(expr = "the certificate should be {word}")]
async fn intent_should_be(world: &mut TestWorld, expected: String) {
    let expected = match expected.as_str() {
        "renewed" => ResolvedIntent::Renew,
        "reissued" => ResolvedIntent::Reissue,
        other => panic!("unknown intent {}", other),
    };
    assert_eq!(world.resolved_intent, Some(expected));
}
