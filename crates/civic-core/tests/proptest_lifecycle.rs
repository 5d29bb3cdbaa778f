use civic_core::config::PointsConfig;
use civic_core::geo::Point;
use civic_core::ledger::Ledger;
use civic_core::lifecycle::Lifecycle;
use civic_core::model::{Actor, Category, NewIssue, Priority, Status, UserId};
use civic_core::store::{AwardStore, IssueStore, MemoryStore};
use proptest::prelude::*;
use std::sync::Arc;

fn arb_status() -> impl Strategy<Value = Status> {
    prop::sample::select(Status::ALL.to_vec())
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn status_only_follows_the_table(targets in prop::collection::vec((arb_status(), any::<bool>()), 1..20)) {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = Lifecycle::new(store.clone(), Ledger::new(store.clone(), PointsConfig::default()));
        let issue = store.create_issue(&NewIssue {
            title: "Leaking hydrant".into(),
            description: String::new(),
            location: Point::new(34.05, -118.25),
            image_ref: None,
            category: Category::Water,
            priority: Priority::Medium,
            reporter_id: UserId::new("ana"),
            possible_duplicate_of: None,
        }).unwrap();

        let mut expected = Status::Submitted;
        for (target, is_employee) in targets {
            let actor = if is_employee { Actor::employee("clerk") } else { Actor::citizen("ben") };
            let legal = is_employee
                && target != Status::Merged
                && expected.can_transition_to(target).is_ok();

            let result = lifecycle.transition(issue.id, target, &actor);
            prop_assert_eq!(result.is_ok(), legal, "{} -> {}", expected, target);
            if legal {
                expected = target;
            }
            prop_assert_eq!(store.get_issue(issue.id).unwrap().unwrap().status, expected);
        }

        // Resolved pays at most once no matter how the walk went.
        let total = store.total_for(&UserId::new("ana")).unwrap();
        prop_assert!(total == 0 || total == 25);
    }
}
