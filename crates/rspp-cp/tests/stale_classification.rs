//! Every service must classify an explicitly stale snapshot as
//! `snapshot_stale`, at either the root or the section level.

use rspp_cp::artifact::{SnapshotAdapter, SnapshotDocument};
use rspp_cp::backend::{
    AdmissionBackend, BackendSet, FallbackMode, GraphCompilerBackend, LeaseBackend, PolicyBackend,
    ProviderHealthBackend, RegistryBackend, RolloutBackend, RoutingViewBackend, TurnLookup,
};
use rspp_cp::clock::SystemClock;
use rspp_cp::error::CpError;
use std::sync::Arc;

fn backends(document: SnapshotDocument) -> BackendSet {
    BackendSet::from_adapter(
        Arc::new(SnapshotAdapter::new("test", document)),
        Arc::new(SystemClock),
        FallbackMode::Strict,
    )
}

fn results(set: &BackendSet, lookup: &TurnLookup) -> Vec<(&'static str, Result<(), CpError>)> {
    vec![
        ("registry", set.registry.pipeline_record(lookup).map(|_| ())),
        ("rollout", set.rollout.route(lookup).map(|_| ())),
        ("routing_view", set.routing.routing(lookup).map(|_| ())),
        ("policy", set.policy.turn_policy(lookup).map(|_| ())),
        (
            "provider_health",
            set.provider_health.health(lookup).map(|_| ()),
        ),
        (
            "graph_compiler",
            set.graph_compiler.compiled_graph(lookup).map(|_| ()),
        ),
        ("admission", set.admission.decision(lookup).map(|_| ())),
        ("lease", set.lease.lease(lookup).map(|_| ())),
    ]
}

#[test]
fn root_stale_flag_makes_every_service_stale() {
    let mut document = SnapshotDocument::empty();
    document.stale = Some(true);
    let set = backends(document);
    let lookup = TurnLookup::new("tenant", "sess", "v1");
    for (name, result) in results(&set, &lookup) {
        let err = result.expect_err(name);
        assert!(err.is_stale(), "{name} did not classify stale: {err}");
        assert_eq!(err.service(), name);
    }
}

#[test]
fn section_stale_flag_only_affects_that_service() {
    let mut document = SnapshotDocument::empty();
    document.admission.stale = Some(true);
    document.admission.default = Some(Default::default());
    document.provider_health.default = Some(Default::default());
    let set = backends(document);
    let lookup = TurnLookup::new("tenant", "sess", "v1");

    let err = set.admission.decision(&lookup).unwrap_err();
    assert!(err.is_stale());

    // a sibling section without the flag still resolves
    set.provider_health.health(&lookup).unwrap();
}

#[test]
fn availability_mode_still_propagates_stale() {
    let mut document = SnapshotDocument::empty();
    document.stale = Some(true);
    let set = BackendSet::from_adapter(
        Arc::new(SnapshotAdapter::new("test", document)),
        Arc::new(SystemClock),
        FallbackMode::Availability,
    );
    let lookup = TurnLookup::new("tenant", "sess", "v1");
    for (name, result) in results(&set, &lookup) {
        assert!(result.expect_err(name).is_stale(), "{name}");
    }
}
