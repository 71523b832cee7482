//! Dynamic permission rules.
//!
//! Rules are typed, serializable conditions evaluated against a request
//! context. They act as an additional gate on an otherwise granted
//! permission: when at least one rule applies, one of them must match.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use warden_core::Metadata;

/// Context a rule is evaluated against.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub user_id: Uuid,
    pub permission: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub now: DateTime<Utc>,
    /// Caller-supplied attributes, e.g. `{"hour": 14}`
    pub attributes: Metadata,
}

impl RuleContext {
    /// Look up an attribute, falling back to the built-in context fields.
    fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.attributes.get(key) {
            return Some(value.clone());
        }
        match key {
            "user_id" => Some(Value::String(self.user_id.to_string())),
            "permission" => Some(Value::String(self.permission.clone())),
            "resource_type" => Some(Value::String(self.resource_type.clone())),
            "resource_id" => self.resource_id.clone().map(Value::String),
            _ => None,
        }
    }

    /// Hour-of-day used by time-window rules: the `hour` attribute when
    /// supplied, else the evaluation clock.
    fn hour(&self) -> u32 {
        self.attributes
            .get("hour")
            .and_then(Value::as_u64)
            .map_or_else(|| self.now.hour(), |h| (h % 24) as u32)
    }
}

/// A serializable rule condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Hour-of-day window, inclusive on both ends. A window whose start is
    /// after its end wraps around midnight.
    TimeWindow { start_hour: u32, end_hour: u32 },
    /// An attribute equals a value exactly
    AttributeEquals { key: String, value: Value },
    /// An attribute is one of a set of values
    AttributeIn { key: String, values: Vec<Value> },
    /// All inner conditions hold
    AllOf { conditions: Vec<RuleCondition> },
    /// At least one inner condition holds
    AnyOf { conditions: Vec<RuleCondition> },
    /// The inner condition does not hold
    Not { condition: Box<RuleCondition> },
}

impl RuleCondition {
    pub fn evaluate(&self, ctx: &RuleContext) -> bool {
        match self {
            Self::TimeWindow {
                start_hour,
                end_hour,
            } => {
                let hour = ctx.hour();
                if start_hour <= end_hour {
                    (*start_hour..=*end_hour).contains(&hour)
                } else {
                    hour >= *start_hour || hour <= *end_hour
                }
            }
            Self::AttributeEquals { key, value } => ctx.lookup(key).as_ref() == Some(value),
            Self::AttributeIn { key, values } => ctx
                .lookup(key)
                .is_some_and(|found| values.contains(&found)),
            Self::AllOf { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Self::AnyOf { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
            Self::Not { condition } => !condition.evaluate(ctx),
        }
    }
}

/// A registered dynamic rule, indexed by permission name and resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicRule {
    pub rule_id: Uuid,
    pub name: String,
    pub description: String,
    /// Permission name this rule gates
    pub permission: String,
    pub resource_type: String,
    pub condition: RuleCondition,
    /// Higher priority rules are evaluated first
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for registering a dynamic rule.
#[derive(Debug, Clone)]
pub struct DynamicRuleDef {
    pub name: String,
    pub description: String,
    pub permission: String,
    pub resource_type: String,
    pub condition: RuleCondition,
    pub priority: i32,
}

impl DynamicRuleDef {
    pub fn new(
        name: impl Into<String>,
        permission: impl Into<String>,
        resource_type: impl Into<String>,
        condition: RuleCondition,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            permission: permission.into(),
            resource_type: resource_type.into(),
            condition,
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(attributes: Metadata) -> RuleContext {
        RuleContext {
            user_id: Uuid::new_v4(),
            permission: "doc.edit".into(),
            resource_type: "doc".into(),
            resource_id: Some("d1".into()),
            now: Utc::now(),
            attributes,
        }
    }

    #[test]
    fn time_window_uses_hour_attribute() {
        let business_hours = RuleCondition::TimeWindow {
            start_hour: 9,
            end_hour: 17,
        };
        assert!(business_hours.evaluate(&ctx(Metadata::from([("hour".into(), json!(14))]))));
        assert!(!business_hours.evaluate(&ctx(Metadata::from([("hour".into(), json!(22))]))));
    }

    #[test]
    fn time_window_wraps_past_midnight() {
        let night = RuleCondition::TimeWindow {
            start_hour: 22,
            end_hour: 6,
        };
        assert!(night.evaluate(&ctx(Metadata::from([("hour".into(), json!(23))]))));
        assert!(night.evaluate(&ctx(Metadata::from([("hour".into(), json!(3))]))));
        assert!(!night.evaluate(&ctx(Metadata::from([("hour".into(), json!(12))]))));
    }

    #[test]
    fn attribute_conditions() {
        let equals = RuleCondition::AttributeEquals {
            key: "department".into(),
            value: json!("engineering"),
        };
        assert!(equals.evaluate(&ctx(Metadata::from([
            ("department".into(), json!("engineering"))
        ]))));
        assert!(!equals.evaluate(&ctx(Metadata::new())));

        let one_of = RuleCondition::AttributeIn {
            key: "resource_type".into(),
            values: vec![json!("doc"), json!("sheet")],
        };
        // Falls back to the built-in context field
        assert!(one_of.evaluate(&ctx(Metadata::new())));
    }

    #[test]
    fn combinators() {
        let condition = RuleCondition::AllOf {
            conditions: vec![
                RuleCondition::TimeWindow {
                    start_hour: 0,
                    end_hour: 23,
                },
                RuleCondition::Not {
                    condition: Box::new(RuleCondition::AttributeEquals {
                        key: "blocked".into(),
                        value: json!(true),
                    }),
                },
            ],
        };
        assert!(condition.evaluate(&ctx(Metadata::new())));
        assert!(!condition.evaluate(&ctx(Metadata::from([("blocked".into(), json!(true))]))));
    }

    #[test]
    fn conditions_round_trip_through_serde() {
        let condition = RuleCondition::AnyOf {
            conditions: vec![
                RuleCondition::TimeWindow {
                    start_hour: 9,
                    end_hour: 17,
                },
                RuleCondition::AttributeEquals {
                    key: "override".into(),
                    value: json!(true),
                },
            ],
        };
        let encoded = serde_json::to_string(&condition).unwrap();
        let decoded: RuleCondition = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.evaluate(&ctx(Metadata::from([("hour".into(), json!(10))]))));
    }
}
