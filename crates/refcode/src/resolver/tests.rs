use super::*;
use crate::{
    Error,
    store::{
        StoreKind,
        memory::{MemoryConnector, Operation},
    },
    testing::{Fixture, code},
};

fn resolver(fx: &Fixture) -> Resolver<MemoryConnector, MemoryConnector> {
    let (a, b) = fx.pools(1);
    Resolver::new(a, b, fx.schema.clone())
}

#[tokio::test]
async fn all_bridged_lists_each_bridged_entity_once() {
    let fx = Fixture::new();
    fx.add_user(1, code(None));
    fx.add_user(2, code(Some("ABCDEFGH")));
    fx.add_user(3, code(None));
    fx.add_bridge(11, 1);
    fx.add_bridge(10, 1);
    fx.add_bridge(12, 2);
    // Bridge to a primary that does not exist.
    fx.add_bridge(13, 99);

    let targets = resolver(&fx).all_bridged().await.unwrap();
    assert_eq!(targets, [Target::bridged(1, 10), Target::bridged(2, 12)]);
}

#[tokio::test]
async fn entity_with_existing_referral_code_is_not_a_straggler() {
    let fx = Fixture::new();
    fx.add_user(42, code(None));
    fx.add_bridge(7, 42);
    fx.add_info(7, code(Some("REFERRAL")));
    fx.add_info(42, code(None));

    let stragglers = resolver(&fx).missing_referral().await.unwrap();
    assert!(stragglers.is_empty(), "{stragglers:?}");
}

#[tokio::test]
async fn stragglers_are_keyed_by_their_bridge_id() {
    let fx = Fixture::new();
    fx.add_user(43, code(Some("KEEPTHIS")));
    fx.add_bridge(8, 43);
    fx.add_info(8, code(None));

    fx.add_user(44, code(None));
    fx.add_bridge(9, 44);
    fx.add_info(9, code(Some("")));

    // Bridged, but the secondary record does not exist.
    fx.add_user(45, code(None));
    fx.add_bridge(99, 45);

    // Missing a code, but nothing bridges to it.
    fx.add_info(50, code(None));

    let stragglers = resolver(&fx).missing_referral().await.unwrap();
    assert_eq!(stragglers, [Target::bridged(43, 8), Target::bridged(44, 9)]);
}

#[tokio::test]
async fn transient_read_failure_discards_the_connection() {
    let fx = Fixture::population(3);
    fx.b
        .set_fault_hook(|op| matches!(op, Operation::Read(_)).then(|| Error::Connection {
            store: StoreKind::Secondary,
            reason: "server has gone away".into(),
        }));
    let resolver = resolver(&fx);

    let err = resolver.missing_referral().await.unwrap_err();
    assert!(err.is_transient());

    fx.b.clear_fault_hook();
    let stragglers = resolver.missing_referral().await.unwrap();
    assert_eq!(stragglers.len(), 3);
    assert_eq!(fx.b.connects(), 2);
    assert_eq!(fx.a.connects(), 1);
}
