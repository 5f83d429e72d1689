use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::quote::ServiceLineItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTemplateId(pub i64);

impl fmt::Display for PricingTemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only defaults used to seed a new quote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingTemplate {
    pub id: PricingTemplateId,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub terms: String,
    #[serde(default)]
    pub services: Vec<ServiceLineItem>,
    pub currency_code: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTemplateId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Sms,
    Email,
}

/// Operator-managed SMS or email body. Bodies may contain `{{name}}` and
/// `:quoteId` tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: MessageTemplateId,
    pub channel: MessageChannel,
    pub name: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}
