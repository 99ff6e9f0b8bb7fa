//! 差分合并算法
//!
//! 在 JSON Merge Patch (RFC 7386) 的基础上扩展出 DIFF 客户端需要的合并语义：
//! 每次合并为被修改的对象节点打上 `_epoch` 版本标记，用于路径级变更检测。
//!
//! # 合并规则
//!
//! 1. 源值为 null：`delete_null_obj` 为 true 时删除目标键，否则跳过
//! 2. 源值为字符串 `"NaN"` 或 `"-"`：写入 null（服务端的无效值哨兵）
//! 3. 源值为标量（bool/数字/字符串）：直接替换
//! 4. 源值为数组：整体替换，不做位置级差分
//! 5. 源值为对象：目标槽位不是对象时先换成空对象，再递归合并；
//!    `quotes` 键走专用路径（按合约逐个建子树合并）
//! 6. 递归返回后，在当前对象节点写入 `_epoch = epoch`
//!
//! # 示例
//!
//! ```rust
//! use serde_json::json;
//! use qadiff::protocol::diff::merge::merge_object;
//!
//! let mut target = json!({"balance": 100000.0});
//! let patch = json!({"balance": 105000.0, "available": 100000.0});
//!
//! let target_obj = target.as_object_mut().unwrap();
//! merge_object(target_obj, patch.as_object().unwrap(), 1, true);
//!
//! assert_eq!(target_obj["balance"], 105000.0);
//! assert_eq!(target_obj["available"], 100000.0);
//! assert_eq!(target_obj["_epoch"], 1);
//! ```

use serde_json::{Map, Value};

/// 对象节点的版本标记键（内部保留，不属于用户数据）
pub const EPOCH_KEY: &str = "_epoch";

/// 将单个差分对象合并进目标对象，并为修改到的节点打 epoch 标记
///
/// # 参数
///
/// * `target` - 目标对象（原地修改）
/// * `source` - 差分对象
/// * `epoch` - 本次合并使用的版本号
/// * `delete_null_obj` - 源值为 null 时是否删除目标键
pub fn merge_object(
    target: &mut Map<String, Value>,
    source: &Map<String, Value>,
    epoch: i64,
    delete_null_obj: bool,
) {
    for (property, value) in source {
        match value {
            Value::Null => {
                if delete_null_obj {
                    target.remove(property);
                }
            }

            Value::String(s) if s == "NaN" || s == "-" => {
                // 服务端的无效值哨兵，落地为 null
                target.insert(property.clone(), Value::Null);
            }

            Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                target.insert(property.clone(), value.clone());
            }

            Value::Array(_) => {
                // 数组整体替换
                target.insert(property.clone(), value.clone());
            }

            Value::Object(src_obj) => {
                if property == "quotes" {
                    let quotes_target = ensure_object(target, property);
                    merge_quotes(quotes_target, src_obj, epoch, delete_null_obj);
                } else {
                    let child = ensure_object(target, property);
                    merge_object(child, src_obj, epoch, delete_null_obj);
                }
            }
        }
    }

    target.insert(EPOCH_KEY.to_string(), Value::from(epoch));
}

/// `quotes` 对象的专用合并路径
///
/// 按合约逐个处理：null 删除整个 Quote，其余递归合并进该合约的子树。
/// 非对象的合约数据直接忽略。
fn merge_quotes(
    target: &mut Map<String, Value>,
    quotes: &Map<String, Value>,
    epoch: i64,
    delete_null_obj: bool,
) {
    for (symbol, quote_data) in quotes {
        match quote_data {
            Value::Null => {
                if delete_null_obj {
                    target.remove(symbol);
                }
            }
            Value::Object(quote_obj) => {
                let child = ensure_object(target, symbol);
                merge_object(child, quote_obj, epoch, delete_null_obj);
            }
            _ => {}
        }
    }
}

/// 确保 `target[key]` 是对象并返回其可变引用
///
/// 槽位缺失或不是对象时，换成新的空对象（标量被对象覆盖时不静默丢弃更新）。
fn ensure_object<'a>(target: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let needs_reset = !matches!(target.get(key), Some(Value::Object(_)));
    if needs_reset {
        target.insert(key.to_string(), Value::Object(Map::new()));
    }
    target
        .get_mut(key)
        .and_then(Value::as_object_mut)
        .expect("slot was just ensured to be an object")
}

/// 读取对象节点上的 epoch 标记
pub fn node_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::Object(obj) => match obj.get(EPOCH_KEY) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        },
        _ => None,
    }
}
