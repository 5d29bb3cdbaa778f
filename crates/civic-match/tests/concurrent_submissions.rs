use civic_core::classify::NoopClassifier;
use civic_core::config::ProjectConfig;
use civic_core::error::StoreError;
use civic_core::geo::Point;
use civic_core::ledger::Ledger;
use civic_core::lock::SectionGuard;
use civic_core::model::{
    Actor, Category, Comment, Issue, IssueId, NewComment, NewIssue, Priority, Status, Submission,
    UserId,
};
use civic_core::store::{
    AwardStore, ConfirmWrite, IssueFilter, IssueStore, MemoryStore, SqliteStore,
};
use civic_match::{Resolution, Resolver};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const REPORTERS: usize = 8;

fn race_identical_reports<S: IssueStore + AwardStore + 'static>(store: Arc<S>) {
    let config = ProjectConfig::default();
    let ledger = Ledger::new(store.clone(), config.points);
    let resolver = Resolver::new(store.clone(), ledger, Arc::new(NoopClassifier), &config)
        .expect("resolver");
    let barrier = Arc::new(Barrier::new(REPORTERS));

    let handles: Vec<_> = (0..REPORTERS)
        .map(|i| {
            let resolver = resolver.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let submission =
                    Submission::new("Pothole on Main St", "", Point::new(40.7128, -74.006));
                barrier.wait();
                resolver
                    .submit(&submission, &Actor::citizen(format!("user-{i}")))
                    .expect("submit")
            })
        })
        .collect();

    let resolutions: Vec<Resolution> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();

    let issues = store.list_issues(&IssueFilter::default()).expect("list");
    assert_eq!(issues.len(), 1, "exactly one issue: {issues:?}");
    let issue = &issues[0];

    let created: Vec<_> = resolutions
        .iter()
        .filter(|r| matches!(r, Resolution::New { .. }))
        .collect();
    assert_eq!(created.len(), 1);
    assert!(resolutions.iter().all(|r| r.issue_id() == issue.id));

    let confirmers: BTreeSet<&UserId> = issue.confirmer_ids.iter().collect();
    assert_eq!(confirmers.len(), REPORTERS - 1, "no duplicate confirmers");
    assert_eq!(issue.confirmer_ids.len(), REPORTERS - 1);
    assert!(!confirmers.contains(&issue.reporter_id));

    // Tiers at 3 and 6 confirmers.
    assert_eq!(issue.priority, Priority::Critical);

    for i in 0..REPORTERS {
        let user = UserId::new(format!("user-{i}"));
        let expected = if user == issue.reporter_id { 10 } else { 5 };
        assert_eq!(store.total_for(&user).expect("total"), expected, "{user}");
    }
}

#[test]
fn identical_concurrent_reports_yield_one_issue_in_memory() {
    race_identical_reports(Arc::new(MemoryStore::new()));
}

#[test]
fn identical_concurrent_reports_yield_one_issue_in_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::open(&dir.path().join(".civic")).expect("open store");
    race_identical_reports(Arc::new(store));
}

#[test]
fn reports_in_different_cities_do_not_interfere() {
    let store = Arc::new(MemoryStore::new());
    let config = ProjectConfig::default();
    let ledger = Ledger::new(store.clone(), config.points);
    let resolver = Resolver::new(store.clone(), ledger, Arc::new(NoopClassifier), &config)
        .expect("resolver");
    let cities = [
        Point::new(40.7128, -74.006),
        Point::new(51.5074, -0.1278),
        Point::new(35.6762, 139.6503),
        Point::new(-33.8688, 151.2093),
    ];
    let barrier = Arc::new(Barrier::new(cities.len()));

    let handles: Vec<_> = cities
        .into_iter()
        .enumerate()
        .map(|(i, city)| {
            let resolver = resolver.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                resolver
                    .submit(
                        &Submission::new("Pothole on Main St", "", city),
                        &Actor::citizen(format!("user-{i}")),
                    )
                    .expect("submit")
            })
        })
        .collect();

    for handle in handles {
        assert!(matches!(
            handle.join().expect("thread"),
            Resolution::New { .. }
        ));
    }
    assert_eq!(store.list_issues(&IssueFilter::default()).expect("list").len(), 4);
}

fn new_issue(reporter: &str, priority: Priority) -> NewIssue {
    NewIssue {
        title: "Pothole on Main St".into(),
        description: String::new(),
        location: Point::new(40.7128, -74.006),
        image_ref: None,
        category: Category::Roads,
        priority,
        reporter_id: UserId::new(reporter),
        possible_duplicate_of: None,
    }
}

fn resolver_over(store: Arc<dyn IssueStore>, awards: Arc<dyn AwardStore>) -> Resolver {
    let config = ProjectConfig::default();
    let ledger = Ledger::new(awards, config.points);
    Resolver::new(store, ledger, Arc::new(NoopClassifier), &config).expect("resolver")
}

/// Pauses before every section entry so racing callers all read the issue
/// before any of them gets in.
struct SlowSections {
    inner: Arc<MemoryStore>,
    pause: Duration,
}

impl IssueStore for SlowSections {
    fn create_issue(&self, new: &NewIssue) -> Result<Issue, StoreError> {
        self.inner.create_issue(new)
    }

    fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        self.inner.get_issue(id)
    }

    fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError> {
        self.inner.list_issues(filter)
    }

    fn open_near(
        &self,
        point: Point,
        radius_m: f64,
        category: Option<Category>,
    ) -> Result<Vec<Issue>, StoreError> {
        self.inner.open_near(point, radius_m, category)
    }

    fn add_confirmer(&self, id: IssueId, user: &UserId) -> Result<ConfirmWrite, StoreError> {
        self.inner.add_confirmer(id, user)
    }

    fn raise_priority(&self, id: IssueId, at_least: Priority) -> Result<Priority, StoreError> {
        self.inner.raise_priority(id, at_least)
    }

    fn set_category(&self, id: IssueId, category: Category) -> Result<(), StoreError> {
        self.inner.set_category(id, category)
    }

    fn set_status(&self, id: IssueId, from: Status, to: Status) -> Result<bool, StoreError> {
        self.inner.set_status(id, from, to)
    }

    fn mark_merged(&self, id: IssueId, into: IssueId) -> Result<bool, StoreError> {
        self.inner.mark_merged(id, into)
    }

    fn append_comment(&self, new: &NewComment) -> Result<Comment, StoreError> {
        self.inner.append_comment(new)
    }

    fn comments_for(&self, id: IssueId) -> Result<Vec<Comment>, StoreError> {
        self.inner.comments_for(id)
    }

    fn enter_section(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<SectionGuard, StoreError> {
        thread::sleep(self.pause);
        self.inner.enter_section(keys, timeout)
    }
}

#[test]
fn racing_confirmations_cross_a_tier_once() {
    let inner = Arc::new(MemoryStore::new());
    let issue = inner.create_issue(&new_issue("ana", Priority::Low)).expect("create");
    for user in ["c1", "c2"] {
        inner.add_confirmer(issue.id, &UserId::new(user)).expect("seed");
    }
    let store = Arc::new(SlowSections {
        inner: inner.clone(),
        pause: Duration::from_millis(30),
    });
    let resolver = resolver_over(store, inner.clone());
    let barrier = Arc::new(Barrier::new(2));
    let id = issue.id;

    let handles: Vec<_> = ["c3", "c4"]
        .into_iter()
        .map(|user| {
            let resolver = resolver.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                resolver.confirm(id, &Actor::citizen(user)).expect("confirm")
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("thread").newly_added);
    }

    let stored = inner.get_issue(issue.id).expect("get").expect("issue");
    assert_eq!(stored.confirmer_ids.len(), 4);
    // One boundary (3) was crossed; the next is at 6.
    assert_eq!(stored.priority, Priority::Medium);
}

fn race_direct_confirmations<S: IssueStore + AwardStore + 'static>(store: Arc<S>) {
    let id = store.create_issue(&new_issue("ana", Priority::Low)).expect("create").id;
    let resolver = resolver_over(store.clone(), store.clone());
    let users: Vec<String> = (0..9).map(|i| format!("c{i}")).collect();
    let barrier = Arc::new(Barrier::new(users.len()));

    let handles: Vec<_> = users
        .iter()
        .cloned()
        .map(|user| {
            let resolver = resolver.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                resolver.confirm(id, &Actor::citizen(user)).expect("confirm")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let stored = store.get_issue(id).expect("get").expect("issue");
    assert_eq!(stored.confirmer_ids.len(), users.len());
    // Tiers at 3, 6 and 9: Low -> Medium -> High -> Critical.
    assert_eq!(stored.priority, Priority::Critical);
    for user in &users {
        assert_eq!(store.total_for(&UserId::new(user)).expect("total"), 5, "{user}");
    }
}

#[test]
fn concurrent_direct_confirmations_in_memory() {
    race_direct_confirmations(Arc::new(MemoryStore::new()));
}

#[test]
fn concurrent_direct_confirmations_in_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = SqliteStore::open(&dir.path().join(".civic")).expect("open store");
    race_direct_confirmations(Arc::new(store));
}

#[test]
fn merge_racing_with_reports_keeps_every_confirmer() {
    let store = Arc::new(MemoryStore::new());
    // The duplicate is older, so reports filed before the merge land on it.
    let duplicate = store.create_issue(&new_issue("ben", Priority::Medium)).expect("dup").id;
    let target = store.create_issue(&new_issue("ana", Priority::Medium)).expect("target").id;
    let resolver = resolver_over(store.clone(), store.clone());

    let reporters: Vec<String> = (0..6).map(|i| format!("user-{i}")).collect();
    let barrier = Arc::new(Barrier::new(reporters.len() + 1));

    let merger = {
        let resolver = resolver.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            resolver.merge(duplicate, target).expect("merge")
        })
    };
    let submitters: Vec<_> = reporters
        .iter()
        .cloned()
        .map(|user| {
            let resolver = resolver.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let submission =
                    Submission::new("Pothole on Main St", "", Point::new(40.7128, -74.006));
                barrier.wait();
                resolver.submit(&submission, &Actor::citizen(user)).expect("submit")
            })
        })
        .collect();

    merger.join().expect("merge thread");
    for handle in submitters {
        let resolution = handle.join().expect("thread");
        assert!(matches!(resolution, Resolution::Confirms { newly_added: true, .. }));
    }

    let merged = store.get_issue(duplicate).expect("get").expect("dup");
    assert_eq!(merged.status, Status::Merged);
    assert_eq!(merged.merged_into_id, Some(target));

    let survivor = store.get_issue(target).expect("get").expect("target");
    let confirmers: BTreeSet<&UserId> = survivor.confirmer_ids.iter().collect();
    assert_eq!(confirmers.len(), survivor.confirmer_ids.len(), "no duplicates");
    assert!(confirmers.contains(&UserId::new("ben")));
    for user in &reporters {
        assert!(confirmers.contains(&UserId::new(user)), "{user} lost in merge");
        let total = store.total_for(&UserId::new(user)).expect("total");
        assert!(total == 5 || total == 10, "{user}: {total}");
    }
    assert_eq!(survivor.confirmer_ids.len(), reporters.len() + 1);
    assert_eq!(survivor.priority, Priority::Critical);
    assert_eq!(store.list_issues(&IssueFilter::default()).expect("list").len(), 2);
}
