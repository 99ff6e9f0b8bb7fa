// 路径监听测试
//
// 验证 Watch/UnWatch 的生命周期：注册、推送、去重、关闭
//
// 运行：cargo test --test watch_test -- --nocapture

use std::time::Duration;

use serde_json::json;

use qadiff::{ClientError, SnapshotManager};

fn market_manager() -> SnapshotManager {
    SnapshotManager::new(SnapshotManager::market_skeleton())
}

#[tokio::test]
async fn test_watch_receives_update() {
    let dm = market_manager();

    let mut rx = dm.watch(&["quotes", "SHFE.au2512"]).unwrap();

    dm.merge_data(
        &json!({"quotes": {"SHFE.au2512": {"last_price": 500.0, "volume": 1000}}}),
        true,
        false,
    );

    let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for data")
        .expect("channel closed");

    assert_eq!(data["last_price"], 500.0);
    assert_eq!(data["volume"], 1000);
}

#[tokio::test]
async fn test_watch_duplicate_path_rejected() {
    let dm = market_manager();

    let _rx = dm.watch(&["quotes", "SHFE.au2512"]).unwrap();
    let second = dm.watch(&["quotes", "SHFE.au2512"]);

    assert!(matches!(second, Err(ClientError::AlreadyWatched(_))));
}

#[tokio::test]
async fn test_unwatch_closes_channel() {
    let dm = market_manager();

    let mut rx = dm.watch(&["quotes", "SHFE.au2512"]).unwrap();
    dm.unwatch(&["quotes", "SHFE.au2512"]).unwrap();

    // 发送端已移除，通道随之关闭
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("channel should be closed");
    assert!(result.is_none());

    // 重复取消返回错误
    assert!(matches!(
        dm.unwatch(&["quotes", "SHFE.au2512"]),
        Err(ClientError::NotWatched(_))
    ));
}

#[tokio::test]
async fn test_multiple_watchers_independent_paths() {
    let dm = market_manager();

    let mut rx1 = dm.watch(&["quotes", "SHFE.au2512"]).unwrap();
    let mut rx2 = dm.watch(&["quotes", "SHFE.ag2512"]).unwrap();

    dm.merge_data(
        &json!({"quotes": {
            "SHFE.au2512": {"last_price": 500.0},
            "SHFE.ag2512": {"last_price": 6000.0}
        }}),
        true,
        false,
    );

    let gold = tokio::time::timeout(Duration::from_secs(2), rx1.recv())
        .await
        .expect("timeout")
        .expect("closed");
    let silver = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
        .await
        .expect("timeout")
        .expect("closed");

    assert_eq!(gold["last_price"], 500.0);
    assert_eq!(silver["last_price"], 6000.0);
}

#[tokio::test]
async fn test_untouched_path_not_notified() {
    let dm = market_manager();

    let mut rx = dm.watch(&["ticks", "SHFE.au2512"]).unwrap();

    dm.merge_data(
        &json!({"quotes": {"SHFE.au2512": {"last_price": 500.0}}}),
        true,
        false,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_watch_after_unwatch_allows_rewatch() {
    let dm = market_manager();

    let _rx = dm.watch(&["quotes", "A"]).unwrap();
    dm.unwatch(&["quotes", "A"]).unwrap();

    // 取消后同一路径可以重新注册
    let mut rx = dm.watch(&["quotes", "A"]).unwrap();
    dm.merge_data(&json!({"quotes": {"A": {"x": 1}}}), true, false);

    let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout")
        .expect("closed");
    assert_eq!(data["x"], 1);
}
