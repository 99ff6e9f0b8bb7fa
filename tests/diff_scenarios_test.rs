// DIFF 协议端到端场景测试
//
// 按场景验证差分合并、变更检测、序列视图与请求重放的记录行为
//
// 运行：cargo test --test diff_scenarios_test -- --nocapture

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use qadiff::protocol::diff::settlement::parse_settlement_content;
use qadiff::SnapshotManager;

fn market_manager() -> SnapshotManager {
    SnapshotManager::new(SnapshotManager::market_skeleton())
}

// ============================================================================
// 场景 1: 合并与变更检测
// ============================================================================
#[test]
fn scenario_merge_and_change_detection() {
    let dm = market_manager();

    dm.merge_data(
        &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0, "volume": 1000}}}),
        true,
        true,
    );

    assert_eq!(dm.epoch(), 1);
    assert_eq!(
        dm.get_by_path(&["quotes", "SHFE.au2602", "last_price"]),
        Some(json!(500.0))
    );
    assert!(dm.is_changing(&["quotes", "SHFE.au2602"]));
    assert!(!dm.is_changing(&["quotes", "SHFE.ag2512"]));
}

// ============================================================================
// 场景 2: epoch 标记与局部更新
// ============================================================================
#[test]
fn scenario_epoch_stamping() {
    let dm = market_manager();

    dm.merge_data(
        &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0, "volume": 1000}}}),
        true,
        true,
    );
    dm.merge_data(&json!({"quotes": {"SHFE.au2602": {"volume": 1200}}}), true, true);

    assert_eq!(dm.epoch(), 2);
    assert_eq!(
        dm.get_by_path(&["quotes", "SHFE.au2602", "volume"]),
        Some(json!(1200))
    );
    // 未被第二轮触及的字段保留
    assert_eq!(
        dm.get_by_path(&["quotes", "SHFE.au2602", "last_price"]),
        Some(json!(500.0))
    );
    assert!(dm.is_changing(&["quotes", "SHFE.au2602"]));
    assert!(!dm.is_changing(&["ticks"]));
}

// ============================================================================
// 场景 3: null 删除
// ============================================================================
#[test]
fn scenario_delete_on_null() {
    let dm = market_manager();

    dm.merge_data(
        &json!({"quotes": {"SHFE.au2602": {"last_price": 500.0}}}),
        true,
        true,
    );
    dm.merge_data(&json!({"quotes": {"SHFE.au2602": null}}), true, true);

    assert_eq!(dm.get_by_path(&["quotes", "SHFE.au2602"]), None);
}

// ============================================================================
// 场景 4: 视图宽度裁剪 + right_id 过滤
// ============================================================================
#[test]
fn scenario_view_width_and_right_id_filter() {
    let dm = market_manager();

    let mut bars = serde_json::Map::new();
    for id in 100..=110i64 {
        bars.insert(
            id.to_string(),
            json!({"datetime": id * 60_000_000_000i64,
                   "open": 1.0, "close": 2.0, "high": 3.0, "low": 0.5, "volume": 10}),
        );
    }

    dm.merge_data(
        &json!({
            "klines": {"SHFE.au2602": {"60000000000": {
                "last_id": 110,
                "trading_day_start_id": 100,
                "trading_day_end_id": 110,
                "data": bars
            }}},
            "charts": {"chart1": {
                "left_id": 100,
                "right_id": 105,
                "state": {"ins_list": "SHFE.au2602", "duration": 60000000000i64}
            }}
        }),
        true,
        true,
    );

    let series = dm
        .get_klines_data("SHFE.au2602", 60_000_000_000, Some(4))
        .unwrap();
    let ids: Vec<i64> = series.data.iter().map(|k| k.id).collect();

    // 服务端附带的 110 号实时K线被 right_id=105 截掉，宽度 4 留尾部
    assert_eq!(ids, vec![102, 103, 104, 105]);
    // 序列有序无重复
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted, ids);
}

// ============================================================================
// 场景 5: 多合约 binding 对齐
// ============================================================================
#[test]
fn scenario_multi_instrument_alignment() {
    let dm = market_manager();

    dm.merge_data(
        &json!({
            "klines": {
                "A": {"60000000000": {
                    "last_id": 12,
                    "data": {
                        "10": {"datetime": 600, "close": 1.0},
                        "11": {"datetime": 660, "close": 1.1},
                        "12": {"datetime": 720, "close": 1.2}
                    },
                    "binding": {"B": {"10": 20, "12": 22}}
                }},
                "B": {"60000000000": {
                    "last_id": 22,
                    "data": {
                        "20": {"datetime": 600, "close": 2.0},
                        "22": {"datetime": 720, "close": 2.2}
                    }
                }}
            },
            "charts": {"c1": {
                "left_id": 10, "right_id": 12,
                "state": {"ins_list": "A,B", "duration": 60000000000i64}
            }}
        }),
        true,
        true,
    );

    let symbols = vec!["A".to_string(), "B".to_string()];
    let multi = dm
        .get_multi_klines_data(&symbols, 60_000_000_000, "c1", 3)
        .unwrap();

    assert_eq!(multi.main_symbol, "A");
    assert_eq!(multi.data.len(), 3);

    // 槽位 10: A + B(20)
    assert_eq!(multi.data[0].main_id, 10);
    assert_eq!(multi.data[0].klines.get("B").map(|k| k.id), Some(20));
    // 槽位 11: 只有 A（binding 无此映射）
    assert_eq!(multi.data[1].main_id, 11);
    assert!(multi.data[1].klines.contains_key("A"));
    assert!(!multi.data[1].klines.contains_key("B"));
    // 槽位 12: A + B(22)
    assert_eq!(multi.data[2].main_id, 12);
    assert_eq!(multi.data[2].klines.get("B").map(|k| k.id), Some(22));
}

// ============================================================================
// 场景 6: 数据回调在合并后触发
// ============================================================================
#[tokio::test]
async fn scenario_on_data_after_merge() {
    use std::sync::atomic::{AtomicI64, Ordering};

    let dm = Arc::new(market_manager());
    let seen_epoch = Arc::new(AtomicI64::new(0));

    let observer = dm.clone();
    let sink = seen_epoch.clone();
    dm.on_data(move || {
        // 回调观察到的 epoch 与合并结果一致
        sink.store(observer.epoch(), Ordering::SeqCst);
    });

    dm.merge_data(&json!({"quotes": {"A": {"x": 1}}}), true, true);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(seen_epoch.load(Ordering::SeqCst), 1);
}

// ============================================================================
// 结算单解析
// ============================================================================
#[test]
fn scenario_settlement_parsing() {
    let text = "\
                        资金状况
                     Account Funds Statement
期初结存 Balance b/f:        100000.00  期末结存 Balance c/f:      100450.00

                        平仓明细 Position Closed
----------------------------------------------------------------
|成交日期    |交易所  |合约      |成交价   |手数 |
----------------------------------------------------------------
|20260715    |SHFE    |au2602    |500.00   |2    |
----------------------------------------------------------------
";

    let settlement = parse_settlement_content(text);

    assert_eq!(
        settlement.account.get("Balance b/f").map(String::as_str),
        Some("100000.00")
    );
    assert_eq!(
        settlement.account.get("Balance c/f").map(String::as_str),
        Some("100450.00")
    );
    assert_eq!(settlement.position_closed.len(), 1);
    assert_eq!(
        settlement.position_closed[0].get("合约").map(String::as_str),
        Some("au2602")
    );

    // 进入业务快照后可以按交易日读回
    let dm = SnapshotManager::new(SnapshotManager::trade_skeleton("user1"));
    let mut settlement = settlement;
    settlement.trading_day = "20260714".to_string();
    dm.merge_data(
        &json!({"trade": {"user1": {"his_settlements": {
            "20260714": serde_json::to_value(&settlement).unwrap()
        }}}}),
        true,
        true,
    );

    let stored = dm
        .get_by_path(&["trade", "user1", "his_settlements", "20260714"])
        .unwrap();
    assert_eq!(stored["trading_day"], "20260714");
}

// ============================================================================
// 类型化视图的宽松解码
// ============================================================================
#[test]
fn scenario_lossy_typed_views() {
    let dm = market_manager();

    // NaN 哨兵、整型/浮点混写、未知字段
    dm.merge_data(
        &json!({"quotes": {"SHFE.au2602": {
            "instrument_id": "SHFE.au2602",
            "last_price": 500,
            "settlement": "NaN",
            "volume": 1000.0,
            "some_future_field": {"x": 1}
        }}}),
        true,
        true,
    );

    let quote = dm.get_quote("SHFE.au2602").unwrap();
    assert_eq!(quote.last_price, 500.0);
    assert_eq!(quote.settlement, 0.0);
    assert_eq!(quote.volume, 1000);
}

// ============================================================================
// 合约目录查询
// ============================================================================
#[test]
fn scenario_quotes_by_input() {
    use async_trait::async_trait;
    use qadiff::auth::{Authenticator, BrokerInfo};
    use qadiff::{Client, ClientConfig};

    struct FakeAuth;

    #[async_trait]
    impl Authenticator for FakeAuth {
        fn base_headers(&self) -> Vec<(String, String)> {
            Vec::new()
        }
        async fn login(&self) -> qadiff::Result<()> {
            Ok(())
        }
        async fn get_td_url(&self, _: &str, _: &str) -> qadiff::Result<BrokerInfo> {
            Ok(BrokerInfo::default())
        }
        async fn get_md_url(&self, _: bool, _: bool) -> qadiff::Result<String> {
            Ok(String::new())
        }
        fn has_feature(&self, _: &str) -> bool {
            true
        }
        fn has_account(&self, _: &str) -> bool {
            true
        }
        fn has_md_grants(&self, _: &[&str]) -> qadiff::Result<()> {
            Ok(())
        }
        fn has_td_grants(&self, _: &str) -> qadiff::Result<()> {
            Ok(())
        }
        fn auth_id(&self) -> String {
            String::new()
        }
        fn access_token(&self) -> String {
            String::new()
        }
    }

    let client = Client::with_authenticator(ClientConfig::new("u", "p"), Arc::new(FakeAuth));
    client.ingest_symbols(json!({
        "SHFE.au2602": {"class": "FUTURE", "product_id": "au", "expired": false},
        "SHFE.au2512": {"class": "FUTURE", "product_id": "au", "expired": true},
        "DCE.m2605":   {"class": "FUTURE", "product_id": "m", "expired": false}
    }));

    let result = client.get_quotes_by_input("au", &HashMap::new());
    assert_eq!(result, vec!["SHFE.au2602".to_string()]);

    let mut include_expired = HashMap::new();
    include_expired.insert("include_expired".to_string(), true);
    let result = client.get_quotes_by_input("au", &include_expired);
    assert_eq!(
        result,
        vec!["SHFE.au2512".to_string(), "SHFE.au2602".to_string()]
    );
}
