use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Column labels of the provider's trade table.
///
/// Variant order is the canonical output order, so any ordered collection
/// keyed by `Label` serializes correctly regardless of parse order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Symbol,
    Time,
    Type,
    Volume,
    Price,
    StopLoss,
    TakeProfit,
}

impl Label {
    pub const CANONICAL: [Label; 7] = [
        Label::Symbol,
        Label::Time,
        Label::Type,
        Label::Volume,
        Label::Price,
        Label::StopLoss,
        Label::TakeProfit,
    ];

    /// The label text as it appears in the page markup and output header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Symbol => "Symbol",
            Label::Time => "Time",
            Label::Type => "Type",
            Label::Volume => "Volume",
            Label::Price => "Price",
            Label::StopLoss => "S/L",
            Label::TakeProfit => "T/P",
        }
    }

    pub fn from_markup(raw: &str) -> Option<Label> {
        let raw = raw.trim();
        Label::CANONICAL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeType {
    Buy,
    Sell,
    BuyStop,
    SellStop,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "Buy",
            TradeType::Sell => "Sell",
            TradeType::BuyStop => "Buy Stop",
            TradeType::SellStop => "Sell Stop",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeType {
    type Err = ();

    /// Accepts `Buy Stop`, `BuyStop` and `buy  stop` alike; the caller is
    /// expected to have normalized entities already.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .split_whitespace()
            .collect::<String>()
            .to_ascii_lowercase();
        match compact.as_str() {
            "buy" => Ok(TradeType::Buy),
            "sell" => Ok(TradeType::Sell),
            "buystop" => Ok(TradeType::BuyStop),
            "sellstop" => Ok(TradeType::SellStop),
            _ => Err(()),
        }
    }
}

/// One trade row as published by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    trade_type: TradeType,
    fields: BTreeMap<Label, String>,
}

impl TradeRecord {
    /// Builds a record from labeled cell values. The `Type` field is always
    /// set from `trade_type`, whatever the cells said.
    pub fn new<I>(trade_type: TradeType, cells: I) -> Self
    where
        I: IntoIterator<Item = (Label, String)>,
    {
        let mut fields: BTreeMap<Label, String> = cells
            .into_iter()
            .filter(|(label, _)| *label != Label::Type)
            .collect();
        fields.insert(Label::Type, trade_type.to_string());
        Self { trade_type, fields }
    }

    pub fn trade_type(&self) -> TradeType {
        self.trade_type
    }

    pub fn get(&self, label: Label) -> Option<&str> {
        self.fields.get(&label).map(String::as_str)
    }

    pub fn symbol(&self) -> Option<&str> {
        self.get(Label::Symbol)
    }

    /// Present fields in canonical label order.
    pub fn fields(&self) -> impl Iterator<Item = (Label, &str)> {
        self.fields.iter().map(|(l, v)| (*l, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values joined in canonical order. Empty values keep their column.
    /// Any `delimiter` inside a value (a thousands separator in `2,150.10`)
    /// is dropped so columns never shift.
    pub fn to_line(&self, delimiter: char) -> String {
        let values: Vec<String> = self
            .fields()
            .map(|(_, v)| v.replace(delimiter, ""))
            .collect();
        values.join(&delimiter.to_string())
    }
}
