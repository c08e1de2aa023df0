//! # テンプレートパラメータ
//!
//! 宛先ごとに本文の `[[NAME]]` プレースホルダへ差し込む値の集合。
//!
//! ## 設計方針
//!
//! - **挿入順を保持**: 永続化形式とログ出力の順序を安定させる
//! - **同名キーは置換**: 既存の名前を再挿入すると、位置はそのままで値だけ更新する
//! - **永続化形式**: `key=value&key=value`。キーと値はパーセントエンコードする
//!
//! エンコードを導入する前に書かれた行は `%` を含まない限り同じ結果に
//! デコードされるため、既存データの移行は不要。`=` を持たない古いペアは
//! 空文字列の値として読み込む。

use std::borrow::Cow;

use crate::DomainError;

/// 名前 → 値の順序付きマッピング
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// パラメータを追加する。同名のキーがあれば値を置き換える
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    /// ビルダー形式で追加する
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// 名前の完全一致で値を取得する
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    /// 大文字小文字を区別せずに値を取得する
    ///
    /// 名前は Unicode の大文字に変換して比較する（`état` と `ÉTAT` は一致する）。
    /// 大文字小文字だけが異なる名前が複数ある場合は、先に挿入されたものを返す。
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        let wanted = name.to_uppercase();
        self.0
            .iter()
            .find(|(existing, _)| existing.to_uppercase() == wanted)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 永続化形式（`key=value&key=value`）に変換する
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// 永続化形式から復元する
    ///
    /// # Errors
    ///
    /// パーセントデコード結果が UTF-8 として不正な場合は `DomainError::Validation`
    pub fn decode(raw: &str) -> Result<Self, DomainError> {
        let mut params = Self::new();
        for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(decode_component(key)?, decode_component(value)?);
        }
        Ok(params)
    }
}

fn decode_component(raw: &str) -> Result<String, DomainError> {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .map_err(|e| DomainError::Validation(format!("パラメータのデコードに失敗しました: {e}")))
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_同名キーの再挿入は位置を保ったまま値を置き換える() {
        let mut params = Params::new().with("NAME", "Alice").with("CITY", "Austin");

        params.insert("NAME", "Bob");

        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("NAME", "Bob"), ("CITY", "Austin")]);
    }

    #[test]
    fn test_get_ignore_caseは大文字小文字を区別しない() {
        let params = Params::new().with("name", "Alice");

        assert_eq!(params.get_ignore_case("NAME"), Some("Alice"));
        assert_eq!(params.get("NAME"), None);
    }

    #[test]
    fn test_get_ignore_caseはascii以外の文字も大文字小文字を区別しない() {
        let params = Params::new().with("état", "ok");

        assert_eq!(params.get_ignore_case("ÉTAT"), Some("ok"));
        assert_eq!(params.get_ignore_case("État"), Some("ok"));
    }

    #[test]
    fn test_get_ignore_caseは先に挿入された名前を優先する() {
        let params = Params::new().with("name", "first").with("NAME", "second");

        assert_eq!(params.get_ignore_case("Name"), Some("first"));
    }

    #[test]
    fn test_区切り文字を含む値もエンコードで保持される() {
        let params = Params::new()
            .with("LINK", "https://example.com/?a=1&b=2")
            .with("GREETING", "50% off");

        let encoded = params.encode();
        let decoded = Params::decode(&encoded).unwrap();

        assert!(!encoded.contains("a=1&b=2"));
        assert_eq!(decoded, params);
    }

    #[rstest]
    #[case::単一ペア("NAME=Alice", vec![("NAME", "Alice")])]
    #[case::複数ペア("NAME=Alice&CITY=Austin", vec![("NAME", "Alice"), ("CITY", "Austin")])]
    #[case::空白を含む値("NAME=Mary Ann", vec![("NAME", "Mary Ann")])]
    #[case::等号のないペア("FLAG", vec![("FLAG", "")])]
    #[case::空文字列("", vec![])]
    fn test_エスケープされていない既存データをそのまま読み込める(
        #[case] raw: &str,
        #[case] expected: Vec<(&str, &str)>,
    ) {
        let params = Params::decode(raw).unwrap();

        assert_eq!(params.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_不正なutf8のパーセント列はバリデーションエラー() {
        let result = Params::decode("NAME=%FF%FE");

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}
