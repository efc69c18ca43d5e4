//! Subscription reconciliation against an in-memory store

use std::sync::Arc;

use async_trait::async_trait;
use conflux_core::error::UpdateError;
use conflux_core::models::{
    BuildSettings, ProxyBean, ProxyGroup, SubscriptionBean, SubscriptionType,
};
use conflux_core::store::{MemoryStore, ProfileStore};
use conflux_core::subscription::{FetchResponse, GroupUpdater, SubscriptionFetcher, UpdateOutcome};

struct StaticFetcher(String);

#[async_trait]
impl SubscriptionFetcher for StaticFetcher {
    async fn fetch(&self, _link: &str, _user_agent: &str) -> Result<FetchResponse, UpdateError> {
        Ok(FetchResponse {
            body: self.0.clone(),
            userinfo: None,
        })
    }
}

fn setup(sub: SubscriptionBean, body: &str) -> (Arc<MemoryStore>, GroupUpdater, i64) {
    let store = Arc::new(MemoryStore::new());
    let group = store
        .insert_group(ProxyGroup::new_subscription("sub", sub))
        .unwrap();
    let updater = GroupUpdater::new(
        store.clone(),
        Arc::new(StaticFetcher(body.to_string())),
        &BuildSettings::default(),
    );
    (store, updater, group.id)
}

#[tokio::test]
async fn duplicate_servers_collapse_to_one_profile() {
    let body = "ss://YWVzLTEyOC1nY206cHc@1.2.3.4:8388#First\n\
                ss://YWVzLTEyOC1nY206cHc@1.2.3.4:8388#Second\n";
    let (store, updater, group_id) = setup(
        SubscriptionBean {
            link: "https://sub.example.com/feed".to_string(),
            deduplication: true,
            ..Default::default()
        },
        body,
    );

    let UpdateOutcome::Success(report) = updater.update(group_id).await else {
        panic!("update failed");
    };
    let profiles = store.profiles_by_group(group_id);
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].display_name(), "First");
    assert_eq!(report.duplicate.len(), 1);
    assert_eq!(report.added, vec!["First".to_string()]);
    assert!(!updater.is_updating(group_id));
}

#[tokio::test]
async fn unchanged_feed_keeps_profile_ids() {
    let body = r#"{
        "version": 1,
        "servers": [
            {"remarks": "A", "server": "a.example.com", "server_port": 8388,
             "method": "aes-256-gcm", "password": "pw"},
            {"remarks": "B", "server": "b.example.com", "server_port": 8388,
             "method": "aes-256-gcm", "password": "pw"}
        ],
        "bytes_used": 10,
        "bytes_remaining": 90
    }"#;
    let (store, updater, group_id) = setup(
        SubscriptionBean {
            sub_type: SubscriptionType::Sip008,
            link: "https://sub.example.com/sip008".to_string(),
            ..Default::default()
        },
        body,
    );

    assert!(matches!(updater.update(group_id).await, UpdateOutcome::Success(_)));
    let before: Vec<i64> = store.profiles_by_group(group_id).iter().map(|p| p.id).collect();

    let UpdateOutcome::Success(report) = updater.update(group_id).await else {
        panic!("update failed");
    };
    assert_eq!(report.changed, 0);
    let after: Vec<i64> = store.profiles_by_group(group_id).iter().map(|p| p.id).collect();
    assert_eq!(before, after);

    let sub = store.get_group(group_id).unwrap().subscription.unwrap();
    assert_eq!(sub.bytes_used, 10);
    assert_eq!(sub.bytes_remaining, 90);
    assert!(sub.last_updated > 0);
    assert!(matches!(
        store.profiles_by_group(group_id)[0].bean,
        ProxyBean::Shadowsocks(_)
    ));
}

#[tokio::test]
async fn plain_group_is_not_updated() {
    let store = Arc::new(MemoryStore::new());
    let group = store.insert_group(ProxyGroup::new("local")).unwrap();
    let updater = GroupUpdater::new(
        store.clone(),
        Arc::new(StaticFetcher(String::new())),
        &BuildSettings::default(),
    );
    assert!(matches!(
        updater.update(group.id).await,
        UpdateOutcome::Failure { .. }
    ));
}
