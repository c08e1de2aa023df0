//! # テンプレートレンダラー
//!
//! 本文の `[[NAME]]` プレースホルダを宛先ごとのパラメータで置換する。
//!
//! ## 置換規則
//!
//! - パラメータ名との照合は大文字小文字を区別しない
//! - 対応するパラメータがないプレースホルダはそのまま残す
//! - 本文を 1 回だけ走査する。差し込んだ値に `[[X]]` が含まれていても再展開しない
//! - 大文字小文字だけが異なるパラメータ名が複数ある場合は、先に挿入されたものを使う

use std::sync::LazyLock;

use regex::{Captures, Regex};
use smsrelay_domain::params::Params;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("プレースホルダの正規表現は固定値"));

/// 本文のプレースホルダをパラメータで置換する
///
/// 同じ入力には常に同じ出力を返す。
pub fn render(body: &str, params: &Params) -> String {
    if params.is_empty() {
        return body.to_string();
    }

    PLACEHOLDER
        .replace_all(body, |caps: &Captures<'_>| match params.get_ignore_case(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
