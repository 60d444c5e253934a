//! Search result pages returned by the claims source.

use serde_json::Value;

use crate::error::BfdError;

/// One page, or the accumulation of every page of a fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    /// The `total` the server reported on the first page, if any.
    pub total: Option<u64>,
    /// `entry[].resource` in server order.
    pub entries: Vec<Value>,
    /// `link[relation=next].url`, absent on the last page.
    pub next: Option<String>,
}

impl Bundle {
    /// Parses a searchset page.
    pub fn from_json(body: &str) -> Result<Self, BfdError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self, BfdError> {
        match value.get("resourceType").and_then(Value::as_str) {
            Some("Bundle") => {}
            Some(other) => return Err(BfdError::Parse(format!("expected Bundle, got {other}"))),
            None => return Err(BfdError::Parse("response has no resourceType".into())),
        }

        let next = value
            .get("link")
            .and_then(Value::as_array)
            .and_then(|links| {
                links
                    .iter()
                    .find(|l| l.get("relation").and_then(Value::as_str) == Some("next"))
            })
            .and_then(|l| l.get("url").and_then(Value::as_str))
            .map(str::to_string);

        let total = value.get("total").and_then(Value::as_u64);

        let entries = match value.get_mut("entry").map(Value::take) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|mut e| e.get_mut("resource").map(Value::take))
                .collect(),
            Some(_) => return Err(BfdError::Parse("Bundle.entry is not an array".into())),
        };

        Ok(Self {
            total,
            entries,
            next,
        })
    }

    /// Folds a later page into the accumulator.
    pub fn append(&mut self, page: Bundle) {
        self.entries.extend(page.entries);
        self.next = page.next;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `id` of the first entry, used to resolve a beneficiary from an identifier search.
    pub fn first_id(&self) -> Option<&str> {
        self.entries
            .first()
            .and_then(|e| e.get("id"))
            .and_then(Value::as_str)
    }
}
