//! 历史结算单文本解析
//!
//! `qry_settlement_info` 返回的结算单是一份对齐排版的自由文本报表，
//! 包含三类区块：
//!
//! - **资金状况**: `标签:数值` 对，数值为带符号的两位小数
//! - **平仓明细** / **成交记录**: `|` 分隔的表格，首行为列名
//!
//! 解析结果保持字符串形态（map + 表格行），不做数值转换。

use regex::Regex;
use std::collections::HashMap;

use super::types::HisSettlement;

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Account,
    PositionClosed,
    TransactionRecords,
}

/// 解析结算单正文
pub fn parse_settlement_content(text: &str) -> HisSettlement {
    let mut result = HisSettlement::default();
    if text.is_empty() {
        return result;
    }

    // 英文标签（冒号前）与带符号两位小数
    let label_re = Regex::new(r"([A-Z][a-zA-Z\.\s/\(\)]+)[:：]+").expect("static regex");
    let number_re = Regex::new(r"(-?\d+\.\d\d)").expect("static regex");
    let digits_re = Regex::new(r"^\d+$").expect("static regex");

    let lines: Vec<&str> = text.split('\n').collect();
    let mut section = Section::None;
    let mut position_closed_cols: Vec<String> = Vec::new();
    let mut transaction_cols: Vec<String> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();

        if line.contains("资金状况") {
            section = Section::Account;
            i += 2; // 跳过中文标题的英文对照行
            continue;
        }

        if line.contains("平仓明细") || line.contains("成交记录") {
            section = if line.contains("平仓明细") {
                Section::PositionClosed
            } else {
                Section::TransactionRecords
            };
            let cols = if section == Section::PositionClosed {
                &mut position_closed_cols
            } else {
                &mut transaction_cols
            };

            // 读取表头：跳过分隔线，捕获列名行，列名后的分隔线结束表头
            i += 1;
            while i < lines.len() {
                let s = lines[i].trim();
                if s.replace('-', "").is_empty() {
                    if cols.is_empty() {
                        i += 1;
                        continue;
                    }
                    break;
                }
                *cols = split_table_row(s);
                i += 1;
            }
            i += 1;
            continue;
        }

        match section {
            Section::Account => {
                if line.is_empty() || line.replace('-', "").is_empty() {
                    section = Section::None;
                    i += 1;
                    continue;
                }

                let labels: Vec<&str> = label_re
                    .captures_iter(line)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect();
                let numbers: Vec<&str> = number_re
                    .captures_iter(line)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect();

                for (label, number) in labels.iter().zip(numbers.iter()) {
                    let key = label.split(':').next().unwrap_or(label).trim().to_string();
                    result.account.insert(key, number.to_string());
                }
            }

            Section::PositionClosed | Section::TransactionRecords => {
                if line.is_empty() || line.replace('-', "").is_empty() {
                    section = Section::None;
                    i += 1;
                    continue;
                }

                let cols = if section == Section::PositionClosed {
                    &position_closed_cols
                } else {
                    &transaction_cols
                };

                let contents = split_table_row(line);
                let mut row = zip_row(cols, &contents);

                // 成交记录的列数对不上时（合约名含空格等），按第一个纯数字列
                // 重新定位 Lots，并按 Lots/Fee 的列距修正 Fee
                if section == Section::TransactionRecords && cols.len() != contents.len() {
                    let index_lots = cols.iter().position(|c| c == "Lots");
                    let index_fee = cols.iter().position(|c| c == "Fee");
                    if let (Some(index_lots), Some(index_fee)) = (index_lots, index_fee) {
                        for (pos, content) in contents.iter().enumerate().skip(1) {
                            if digits_re.is_match(content) {
                                row.insert("Lots".to_string(), content.clone());
                                let fee_pos = pos + (index_fee - index_lots);
                                if let Some(fee) = contents.get(fee_pos) {
                                    row.insert("Fee".to_string(), fee.clone());
                                }
                                break;
                            }
                        }
                    }
                }

                if section == Section::PositionClosed {
                    result.position_closed.push(row);
                } else {
                    result.transaction_records.push(row);
                }
            }

            Section::None => {}
        }

        i += 1;
    }

    result
}

/// 按 `|` 切分表格行，去掉首尾的空白单元格
fn split_table_row(line: &str) -> Vec<String> {
    let items: Vec<&str> = line.split('|').collect();
    let count = items.len();

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let name = item.trim();
            if name.is_empty() && (i == 0 || i == count - 1) {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

fn zip_row(keys: &[String], values: &[String]) -> HashMap<String, String> {
    keys.iter()
        .zip(values.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
交易结算单 Settlement Statement

                        资金状况
                     Account Funds Statement
期初结存 Balance b/f:        100000.00  基础保证金 Initial Margin:      0.00
平仓盈亏 Realized P/L:          500.00  期末结存 Balance c/f:      100450.00
手 续 费 Commission:             50.00

                        平仓明细 Position Closed
---------------------------------------------------------------------------
|成交日期    |交易所  |品种     |合约      |开平|买卖|成交价   |手数 |
---------------------------------------------------------------------------
|20260715    |SHFE    |黄金     |au2602    |平  |卖  |500.00   |2    |
|20260715    |SHFE    |白银     |ag2512    |平  |买  |6000.00  |1    |
---------------------------------------------------------------------------

                        成交记录 Transaction Record
---------------------------------------------------------------------------
|Date        |Exchange|Product  |Instrument|Lots |Price    |Fee      |
---------------------------------------------------------------------------
|20260715    |SHFE    |黄金     |au2602    |2    |500.00   |10.00    |
---------------------------------------------------------------------------
";

    #[test]
    fn test_parse_account_section() {
        let settlement = parse_settlement_content(SAMPLE);

        assert_eq!(
            settlement.account.get("Balance b/f").map(String::as_str),
            Some("100000.00")
        );
        assert_eq!(
            settlement.account.get("Realized P/L").map(String::as_str),
            Some("500.00")
        );
        assert_eq!(
            settlement.account.get("Commission").map(String::as_str),
            Some("50.00")
        );
    }

    #[test]
    fn test_parse_position_closed_rows() {
        let settlement = parse_settlement_content(SAMPLE);

        assert_eq!(settlement.position_closed.len(), 2);
        let first = &settlement.position_closed[0];
        assert_eq!(first.get("交易所").map(String::as_str), Some("SHFE"));
        assert_eq!(first.get("合约").map(String::as_str), Some("au2602"));
        assert_eq!(first.get("成交价").map(String::as_str), Some("500.00"));
    }

    #[test]
    fn test_parse_transaction_records() {
        let settlement = parse_settlement_content(SAMPLE);

        assert_eq!(settlement.transaction_records.len(), 1);
        let row = &settlement.transaction_records[0];
        assert_eq!(row.get("Lots").map(String::as_str), Some("2"));
        assert_eq!(row.get("Fee").map(String::as_str), Some("10.00"));
    }

    #[test]
    fn test_parse_empty_text() {
        let settlement = parse_settlement_content("");
        assert!(settlement.account.is_empty());
        assert!(settlement.position_closed.is_empty());
        assert!(settlement.transaction_records.is_empty());
    }
}
