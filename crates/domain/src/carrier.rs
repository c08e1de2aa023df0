//! # キャリアゲートウェイ
//!
//! キャリアネットワーク名と、そのネットワークのメール→SMS ゲートウェイの
//! アドレステンプレートの対応表。
//!
//! ## 設計方針
//!
//! - **不変な値**: 起動時に一度だけ構築し、`Arc` で共有する
//! - **逆引きは派生**: ドメイン → ネットワークの逆引きは正引きエントリから構築時に導出する
//! - **順序に意味がある**: 複数ネットワークが同じドメインを共有する場合
//!   （`att` と `tracfone` はどちらも `txt.att.net`）、逆引きはテーブル順で先のものを返す
//!
//! テンプレートは `{}` をちょうど 1 つ含む。`{}` だけのテンプレートは
//! 汎用ネットワーク（購読者 ID が完全なメールアドレス）を表し、逆引きの対象外となる。

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::DomainError;

const PLACEHOLDER: &str = "{}";

/// キャリアネットワーク名
///
/// 前後の空白を除去し、小文字に正規化して保持する。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("{_0}")]
pub struct Network(String);

impl Network {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_lowercase();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "ネットワーク名は必須です".to_string(),
            ));
        }
        if value.chars().any(|c| c.is_whitespace() || c == '=' || c == ';') {
            return Err(DomainError::Validation(format!(
                "ネットワーク名に使用できない文字が含まれています: {value}"
            )));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GatewayEntry {
    network:  Network,
    template: String,
    /// テンプレートの固定ドメイン部分（小文字）。汎用エントリは `None`
    domain:   Option<String>,
}

impl GatewayEntry {
    fn new(network: Network, template: String) -> Result<Self, DomainError> {
        let placeholders = template.matches(PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(DomainError::Validation(format!(
                "ゲートウェイテンプレートには `{PLACEHOLDER}` がちょうど 1 つ必要です: \
                 network={network}, template={template}"
            )));
        }

        let domain = template
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty() && !domain.contains(PLACEHOLDER))
            .map(str::to_lowercase);

        Ok(Self {
            network,
            template,
            domain,
        })
    }
}

/// ネットワーク ↔ ゲートウェイアドレスの対応表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierGatewayTable {
    entries: Vec<GatewayEntry>,
}

impl CarrierGatewayTable {
    /// `(ネットワーク名, テンプレート)` の並びから対応表を構築する
    ///
    /// # Errors
    ///
    /// - ネットワーク名が不正、または重複している
    /// - テンプレートの `{}` が 1 つでない
    pub fn new<I, N, T>(entries: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        let mut built: Vec<GatewayEntry> = Vec::new();
        for (network, template) in entries {
            let network = Network::new(network)?;
            if built.iter().any(|entry| entry.network == network) {
                return Err(DomainError::Validation(format!(
                    "ネットワークが重複しています: {network}"
                )));
            }
            built.push(GatewayEntry::new(network, template.into())?);
        }

        Ok(Self { entries: built })
    }

    /// `net={}@domain;net={}@domain` 形式の設定文字列から構築する
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let pairs = raw
            .split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                pair.split_once('=')
                    .map(|(network, template)| (network.to_string(), template.trim().to_string()))
                    .ok_or_else(|| {
                        DomainError::Validation(format!(
                            "ゲートウェイ定義は `network=template` 形式である必要があります: {pair}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(pairs)
    }

    /// 米国主要キャリアと汎用メールネットワークからなる既定の対応表
    pub fn default_table() -> Self {
        const DEFAULT_GATEWAYS: [(&str, &str); 9] = [
            ("att", "{}@txt.att.net"),
            ("metropcs", "{}@mymetropcs.com"),
            ("sprint", "{}@messaging.sprintpcs.com"),
            ("tmobile", "{}@tmomail.net"),
            ("tracfone", "{}@txt.att.net"),
            ("uscellular", "{}@email.uscc.net"),
            ("verizon", "{}@vtext.com"),
            ("virgin", "{}@vmobl.com"),
            ("email", "{}"),
        ];

        let entries = DEFAULT_GATEWAYS
            .iter()
            .map(|(network, template)| GatewayEntry {
                network:  Network(network.to_string()),
                template: template.to_string(),
                domain:   template.split_once('@').map(|(_, domain)| domain.to_string()),
            })
            .collect();

        Self { entries }
    }

    /// ネットワークと購読者 ID からゲートウェイアドレスを組み立てる
    ///
    /// 未知のネットワークは `None`（呼び出し側で配信不能として扱う）。
    pub fn network_to_address(&self, network: &Network, subscriber_id: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| entry.network == *network)
            .map(|entry| entry.template.replacen(PLACEHOLDER, subscriber_id, 1))
    }

    /// アドレスのドメイン部分からネットワークを逆引きする
    ///
    /// ドメインの比較は大文字小文字を区別しない。同じドメインを共有する
    /// ネットワークが複数ある場合はテーブル順で先のものを返す。
    pub fn address_domain_to_network(&self, domain: &str) -> Option<&Network> {
        let domain = domain.trim().to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.domain.as_deref() == Some(domain.as_str()))
            .map(|entry| &entry.network)
    }

    /// 固定ドメインを持たない汎用ネットワーク
    pub fn generic_network(&self) -> Option<&Network> {
        self.entries
            .iter()
            .find(|entry| entry.domain.is_none())
            .map(|entry| &entry.network)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.entries.iter().map(|entry| &entry.network)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CarrierGatewayTable {
    fn default() -> Self {
        Self::default_table()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn network(name: &str) -> Network {
        Network::new(name).unwrap()
    }

    #[rstest]
    #[case("att", "5551234567@txt.att.net")]
    #[case("verizon", "5551234567@vtext.com")]
    #[case("tmobile", "5551234567@tmomail.net")]
    #[case("virgin", "5551234567@vmobl.com")]
    fn test_既定テーブルでゲートウェイアドレスを組み立てる(
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        let table = CarrierGatewayTable::default_table();

        assert_eq!(
            table.network_to_address(&network(name), "5551234567"),
            Some(expected.to_string())
        );
    }

    #[test]
    fn test_未知のネットワークはnoneを返す() {
        let table = CarrierGatewayTable::default_table();

        assert_eq!(table.network_to_address(&network("unknown"), "5551234567"), None);
    }

    #[test]
    fn test_汎用ネットワークは購読者idをそのままアドレスにする() {
        let table = CarrierGatewayTable::default_table();

        assert_eq!(
            table.network_to_address(&network("email"), "someone@example.com"),
            Some("someone@example.com".to_string())
        );
        assert_eq!(table.generic_network(), Some(&network("email")));
    }

    #[test]
    fn test_逆引きは大文字小文字を区別しない() {
        let table = CarrierGatewayTable::default_table();

        assert_eq!(
            table.address_domain_to_network("VText.com"),
            Some(&network("verizon"))
        );
    }

    #[test]
    fn test_共有ドメインの逆引きはテーブル順で先のネットワークを返す() {
        let table = CarrierGatewayTable::default_table();

        assert_eq!(
            table.address_domain_to_network("txt.att.net"),
            Some(&network("att"))
        );
    }

    #[test]
    fn test_共有ドメイン以外は正引きと逆引きが往復する() {
        let table = CarrierGatewayTable::default_table();
        let shared = ["tracfone"];

        for net in table.networks().filter(|n| !shared.contains(&n.as_str())) {
            let Some(address) = table.network_to_address(net, "5551234567") else {
                panic!("{net} のアドレスが組み立てられること");
            };
            let Some((_, domain)) = address.rsplit_once('@') else {
                // 汎用ネットワークは固定ドメインを持たない
                continue;
            };
            assert_eq!(table.address_domain_to_network(domain), Some(net));
        }
    }

    #[test]
    fn test_既定テーブルは検証付きコンストラクタと同じ内容になる() {
        let defaults = CarrierGatewayTable::default_table();
        let rebuilt = CarrierGatewayTable::new(
            defaults
                .entries
                .iter()
                .map(|e| (e.network.as_str().to_string(), e.template.clone())),
        )
        .unwrap();

        assert_eq!(rebuilt, defaults);
    }

    #[rstest]
    #[case::プレースホルダなし(vec![("att", "fixed@txt.att.net")])]
    #[case::プレースホルダ2つ(vec![("att", "{}{}@txt.att.net")])]
    #[case::ネットワーク重複(vec![("att", "{}@a.com"), ("ATT", "{}@b.com")])]
    #[case::空のネットワーク名(vec![(" ", "{}@a.com")])]
    fn test_不正な定義はバリデーションエラー(#[case] entries: Vec<(&str, &str)>) {
        let result = CarrierGatewayTable::new(entries);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_設定文字列から対応表を構築できる() {
        let table = CarrierGatewayTable::parse("Acme = {}@sms.acme.test ; email={}").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.network_to_address(&network("acme"), "42"),
            Some("42@sms.acme.test".to_string())
        );
        assert_eq!(
            table.address_domain_to_network("sms.acme.test"),
            Some(&network("acme"))
        );
    }

    #[test]
    fn test_等号のない設定文字列はバリデーションエラー() {
        let result = CarrierGatewayTable::parse("att");

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }
}
